//! Reading state out of captured instances.
//!
//! Object shapes drift between engine versions, so each reader tries the
//! known shapes in order and reports a malformed instance only when none fit.

use crate::engine::EngineKind;
use crate::error::{BridgeError, Result};
use crate::geo::{Bounds, LatLng};
use crate::host::{call_for_value, read_number, HostPage, HostValue, NodeRef, ObjectRef};

/// Current viewport of an instance.
pub fn read_bounds(host: &dyn HostPage, object: ObjectRef, engine: EngineKind) -> Result<Bounds> {
    let raw = call_for_value(host, object, "getBounds")?;
    match engine {
        EngineKind::EngineA => bounds_from_corner_methods(host, &raw)
            .or_else(|| bounds_from_edges(host, &raw))
            .or_else(|| bounds_from_json(host, &raw)),
        EngineKind::EngineB => bounds_from_corner_props(host, &raw)
            .or_else(|| bounds_from_edge_methods(host, &raw))
            .or_else(|| bounds_from_edges(host, &raw)),
        EngineKind::Unknown => None,
    }
    .ok_or_else(|| {
        BridgeError::malformed(format!("{} bounds of {} have no known shape", engine, object))
    })
    .and_then(|b| {
        b.validate()?;
        Ok(b)
    })
}

/// Current zoom level, if the instance reports one.
pub fn read_zoom(host: &dyn HostPage, object: ObjectRef) -> Option<f64> {
    if !host.has_method(object, "getZoom") {
        return None;
    }
    host.call(object, "getZoom", &[])
        .ok()?
        .as_f64()
        .filter(|z| z.is_finite())
}

/// Container element through the engine's public accessor.
pub fn container_of(host: &dyn HostPage, object: ObjectRef, engine: EngineKind) -> Option<NodeRef> {
    let profile = engine.profile()?;
    if !host.has_method(object, profile.container_method) {
        return None;
    }
    host.call(object, profile.container_method, &[])
        .ok()?
        .as_node()
}

/// Container element from an internal field, for versions or wrappers where
/// the accessor is missing or throws.
pub fn internal_container(
    host: &dyn HostPage,
    object: ObjectRef,
    engine: EngineKind,
) -> Option<NodeRef> {
    let profile = engine.profile()?;
    let target = HostValue::Object(object);
    profile
        .internal_container_fields
        .iter()
        .find_map(|field| host.get(&target, field).ok()?.as_node())
}

/// Element an overlay surface should be appended to, and the element whose
/// size defines the viewport in pixels.
pub fn overlay_mount(
    host: &dyn HostPage,
    object: ObjectRef,
    engine: EngineKind,
) -> Result<(NodeRef, NodeRef)> {
    let profile = engine.profile().ok_or_else(|| BridgeError::HostApiMissing {
        primitive: format!("overlay mount for {}", engine),
    })?;
    let container = container_of(host, object, engine)
        .or_else(|| internal_container(host, object, engine))
        .ok_or_else(|| BridgeError::HostApiMissing {
            primitive: format!("{}()", profile.container_method),
        })?;

    let pane = profile.overlay_pane.and_then(|(method, name)| {
        if !host.has_method(object, method) {
            return None;
        }
        host.call(object, method, &[HostValue::Str(name.to_string())])
            .ok()?
            .as_node()
    });

    Ok((pane.unwrap_or(container), container))
}

fn lat_lng_of(host: &dyn HostPage, value: &HostValue) -> Option<LatLng> {
    let lat = read_number(host, value, "lat")?;
    let lng = read_number(host, value, "lng")?;
    Some(LatLng::new(lat, lng))
}

/// `getNorthEast()` / `getSouthWest()` returning lat/lng objects.
fn bounds_from_corner_methods(host: &dyn HostPage, raw: &HostValue) -> Option<Bounds> {
    let obj = raw.as_object()?;
    if !host.has_method(obj, "getNorthEast") || !host.has_method(obj, "getSouthWest") {
        return None;
    }
    let ne = lat_lng_of(host, &host.call(obj, "getNorthEast", &[]).ok()?)?;
    let sw = lat_lng_of(host, &host.call(obj, "getSouthWest", &[]).ok()?)?;
    Bounds::from_corners(ne, sw).ok()
}

/// `_northEast` / `_southWest` plain props.
fn bounds_from_corner_props(host: &dyn HostPage, raw: &HostValue) -> Option<Bounds> {
    let ne = lat_lng_of(host, &host.get(raw, "_northEast").ok()?)?;
    let sw = lat_lng_of(host, &host.get(raw, "_southWest").ok()?)?;
    Bounds::from_corners(ne, sw).ok()
}

/// `getNorth()` and friends.
fn bounds_from_edge_methods(host: &dyn HostPage, raw: &HostValue) -> Option<Bounds> {
    let obj = raw.as_object()?;
    let mut edges = [0.0f64; 4];
    for (slot, method) in edges
        .iter_mut()
        .zip(["getNorth", "getSouth", "getEast", "getWest"])
    {
        if !host.has_method(obj, method) {
            return None;
        }
        *slot = host.call(obj, method, &[]).ok()?.as_f64()?;
    }
    Bounds::new(edges[0], edges[1], edges[2], edges[3]).ok()
}

/// Plain `{north, south, east, west}` numbers.
fn bounds_from_edges(host: &dyn HostPage, raw: &HostValue) -> Option<Bounds> {
    let north = read_number(host, raw, "north")?;
    let south = read_number(host, raw, "south")?;
    let east = read_number(host, raw, "east")?;
    let west = read_number(host, raw, "west")?;
    Bounds::new(north, south, east, west).ok()
}

/// `toJSON()` returning the plain edge shape.
fn bounds_from_json(host: &dyn HostPage, raw: &HostValue) -> Option<Bounds> {
    let obj = raw.as_object()?;
    if !host.has_method(obj, "toJSON") {
        return None;
    }
    let json = host.call(obj, "toJSON", &[]).ok()?;
    bounds_from_edges(host, &json)
}
