//! Detection of markers the host page renders itself.

use crate::host::{HostPage, NodeRef};
use crate::protocol::PointOfInterest;
use crate::sites::{NativeDetection, NativeMode};

/// True if the page already shows its own markers for `pois` inside `scope`.
pub fn detect(
    host: &dyn HostPage,
    scope: NodeRef,
    pois: &[PointOfInterest],
    config: &NativeDetection,
) -> bool {
    match config.mode {
        NativeMode::Off => false,
        NativeMode::Selectors => config
            .selectors
            .iter()
            .any(|selector| !host.query_all(scope, selector).is_empty()),
        NativeMode::Coordinates => coordinate_match_ratio(host, scope, pois, config)
            .map(|ratio| ratio >= config.min_match_ratio)
            .unwrap_or(false),
    }
}

/// Share of POIs that have an element carrying matching coordinates.
/// `None` when there is nothing to compare.
fn coordinate_match_ratio(
    host: &dyn HostPage,
    scope: NodeRef,
    pois: &[PointOfInterest],
    config: &NativeDetection,
) -> Option<f64> {
    if pois.is_empty() {
        return None;
    }
    let selector = format!("[{}][{}]", config.lat_attr, config.lng_attr);
    let placed: Vec<(f64, f64)> = host
        .query_all(scope, &selector)
        .into_iter()
        .filter_map(|node| {
            let lat = host.attribute(node, &config.lat_attr)?.trim().parse().ok()?;
            let lng = host.attribute(node, &config.lng_attr)?.trim().parse().ok()?;
            Some((lat, lng))
        })
        .collect();
    if placed.is_empty() {
        return None;
    }

    let matched = pois
        .iter()
        .filter(|poi| {
            placed.iter().any(|(lat, lng)| {
                near(*lat, poi.latitude, config.tolerance) && near(*lng, poi.longitude, config.tolerance)
            })
        })
        .count();
    if matched == 0 {
        return None;
    }
    Some(matched as f64 / pois.len() as f64)
}

fn near(a: f64, b: f64, tolerance: f64) -> bool {
    if tolerance <= 0.0 {
        a == b
    } else {
        (a - b).abs() <= tolerance
    }
}
