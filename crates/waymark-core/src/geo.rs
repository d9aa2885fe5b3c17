//! Viewport bounds and the projection used to place markers.

use serde::{Deserialize, Serialize};

use crate::config::PortalConfig;
use crate::error::{BridgeError, Result};

/// Web-Mercator latitude limit.
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// A viewport rectangle in degrees.
///
/// Always finite with `north >= south`. `east` may be less than `west` when
/// the viewport crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    /// Build validated bounds.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        let bounds = Self {
            north,
            south,
            east,
            west,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Build bounds from two corners.
    pub fn from_corners(north_east: LatLng, south_west: LatLng) -> Result<Self> {
        Self::new(north_east.lat, south_west.lat, north_east.lng, south_west.lng)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("north", self.north),
            ("south", self.south),
            ("east", self.east),
            ("west", self.west),
        ] {
            if !value.is_finite() {
                return Err(BridgeError::InvalidBounds {
                    message: format!("{} is not finite ({})", name, value),
                });
            }
        }
        if self.north < self.south {
            return Err(BridgeError::InvalidBounds {
                message: format!("north {} is below south {}", self.north, self.south),
            });
        }
        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        self.north.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.west.is_finite()
    }

    /// Bounds reduced to six decimal digits for stable comparisons.
    pub fn quantized(&self) -> Self {
        let digits = PortalConfig::BOUNDS_PRECISION;
        Self {
            north: quantize(self.north, digits),
            south: quantize(self.south, digits),
            east: quantize(self.east, digits),
            west: quantize(self.west, digits),
        }
    }

    /// Canonical JSON text of the quantized bounds. Two bounds are "the same
    /// viewport" when their keys are byte-identical.
    pub fn quantized_key(&self) -> String {
        let q = self.quantized();
        serde_json::to_string(&q).unwrap_or_else(|_| {
            format!("{},{},{},{}", q.north, q.south, q.east, q.west)
        })
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.east < self.west
    }

    /// Longitude span in degrees, unwrapping an antimeridian crossing.
    pub fn lng_span(&self) -> f64 {
        let span = self.east - self.west;
        if span < 0.0 {
            span + 360.0
        } else {
            span
        }
    }

    pub fn contains(&self, point: LatLng) -> bool {
        if !point.is_finite() {
            return false;
        }
        if point.lat < self.south || point.lat > self.north {
            return false;
        }
        let offset = unwrap_lng(point.lng, self.west) - self.west;
        offset >= 0.0 && offset <= self.lng_span()
    }
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Finite and within [-90, 90] latitude and [-180, 180] longitude.
    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Reduce `value` to `digits` decimals, truncating toward zero.
///
/// A tiny guard absorbs binary representation error (0.3 * 1e6 is
/// 299999.99999999994), so values that print with at most `digits` decimals
/// survive unchanged. Negative zero collapses to zero so the JSON key is stable.
pub fn quantize(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let scaled = value * scale;
    if !scaled.is_finite() {
        return value;
    }
    let guarded = scaled + scaled.signum() * 1e-6;
    let result = guarded.trunc() / scale;
    if result == 0.0 {
        0.0
    } else {
        result
    }
}

/// Shift `lng` by whole turns into `[west, west + 360]`.
///
/// A point exactly one turn east of `west` keeps its offset of 360 so the
/// east edge of a full-width viewport still lands on the right border.
fn unwrap_lng(lng: f64, west: f64) -> f64 {
    let delta = lng - west;
    if !delta.is_finite() {
        return west;
    }
    let offset = delta.rem_euclid(360.0);
    if offset == 0.0 && delta > 0.0 {
        west + 360.0
    } else {
        west + offset
    }
}

fn mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln()
}

/// Maps geographic points onto the pixel space of a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    bounds: Bounds,
    width: f64,
    height: f64,
    top_y: f64,
    bottom_y: f64,
}

impl Projection {
    /// Returns `None` for an empty container or a degenerate viewport.
    pub fn new(bounds: Bounds, width: f64, height: f64) -> Option<Self> {
        if width <= 0.0 || height <= 0.0 || !bounds.is_finite() {
            return None;
        }
        let top_y = mercator_y(bounds.north);
        let bottom_y = mercator_y(bounds.south);
        if (top_y - bottom_y).abs() < f64::EPSILON || bounds.lng_span() <= 0.0 {
            return None;
        }
        Some(Self {
            bounds,
            width,
            height,
            top_y,
            bottom_y,
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Pixel position of `point` relative to the container's top-left corner.
    pub fn to_pixel(&self, point: LatLng) -> (f64, f64) {
        let lng = unwrap_lng(point.lng, self.bounds.west);
        let x = (lng - self.bounds.west) / self.bounds.lng_span() * self.width;
        let y = (self.top_y - mercator_y(point.lat)) / (self.top_y - self.bottom_y) * self.height;
        (x, y)
    }

    /// True if the pixel lies within the container grown by `margin`.
    pub fn in_view(&self, (x, y): (f64, f64), margin: f64) -> bool {
        x >= -margin && x <= self.width + margin && y >= -margin && y <= self.height + margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_finite() {
        assert!(Bounds::new(f64::NAN, 0.0, 1.0, 0.0).is_err());
        assert!(Bounds::new(1.0, 0.0, f64::INFINITY, 0.0).is_err());
    }

    #[test]
    fn test_rejects_inverted_latitudes() {
        let err = Bounds::new(10.0, 20.0, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidBounds { .. }));
    }

    #[test]
    fn test_allows_antimeridian_crossing() {
        let bounds = Bounds::new(10.0, -10.0, -170.0, 170.0).unwrap();
        assert!(bounds.crosses_antimeridian());
        assert!((bounds.lng_span() - 20.0).abs() < 1e-9);
        assert!(bounds.contains(LatLng::new(0.0, 179.0)));
        assert!(bounds.contains(LatLng::new(0.0, -175.0)));
        assert!(!bounds.contains(LatLng::new(0.0, 0.0)));
    }

    #[test]
    fn test_quantize_truncates_beyond_sixth_decimal() {
        assert_eq!(quantize(40.0000009, 6), 40.0);
        assert_eq!(quantize(40.0000001, 6), 40.0);
        assert_eq!(quantize(-73.9857129, 6), -73.985712);
        assert_eq!(quantize(0.3, 6), 0.3);
        assert_eq!(quantize(-0.0000001, 6), 0.0);
    }

    #[test]
    fn test_quantized_key_equality() {
        let a = Bounds::new(40.0000009, 39.5, -73.5, -74.0).unwrap();
        let b = Bounds::new(40.0000001, 39.5, -73.5, -74.0).unwrap();
        let c = Bounds::new(40.000002, 39.5, -73.5, -74.0).unwrap();
        assert_eq!(a.quantized_key(), b.quantized_key());
        assert_ne!(a.quantized_key(), c.quantized_key());
    }

    #[test]
    fn test_projection_corners() {
        let bounds = Bounds::new(10.0, -10.0, 20.0, 0.0).unwrap();
        let projection = Projection::new(bounds, 200.0, 100.0).unwrap();

        let (x, y) = projection.to_pixel(LatLng::new(10.0, 0.0));
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);

        let (x, y) = projection.to_pixel(LatLng::new(-10.0, 20.0));
        assert!((x - 200.0).abs() < 1e-9 && (y - 100.0).abs() < 1e-9);

        let (_, y) = projection.to_pixel(LatLng::new(0.0, 10.0));
        assert!((y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_rejects_empty_container() {
        let bounds = Bounds::new(10.0, -10.0, 20.0, 0.0).unwrap();
        assert!(Projection::new(bounds, 0.0, 100.0).is_none());
    }

    #[test]
    fn test_in_view_margin() {
        let bounds = Bounds::new(10.0, -10.0, 20.0, 0.0).unwrap();
        let projection = Projection::new(bounds, 100.0, 100.0).unwrap();
        assert!(projection.in_view((-5.0, 50.0), 16.0));
        assert!(!projection.in_view((-20.0, 50.0), 16.0));
    }

    #[test]
    fn test_quantize_keeps_values_too_large_to_scale() {
        assert_eq!(quantize(1e305, 6), 1e305);
        assert_eq!(quantize(-f64::MAX, 6), -f64::MAX);
    }

    #[test]
    fn test_to_pixel_handles_extreme_longitudes() {
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let projection = Projection::new(bounds, 200.0, 200.0).unwrap();
        let (x, _) = projection.to_pixel(LatLng::new(0.5, 1e300));
        assert!(x.is_finite());
        assert!(!bounds.contains(LatLng::new(0.5, f64::INFINITY)));
        assert!(!bounds.contains(LatLng::new(f64::NAN, 0.5)));

        let wide = Bounds::new(1.0, 0.0, 1e300, -1e300).unwrap();
        let projection = Projection::new(wide, 200.0, 200.0).unwrap();
        let (x, _) = projection.to_pixel(LatLng::new(0.5, 0.5));
        assert!(x.is_finite());
    }

    #[test]
    fn test_unwrap_lng_keeps_full_turn_on_east_edge() {
        assert_eq!(unwrap_lng(180.0, -180.0), 180.0);
        assert_eq!(unwrap_lng(-180.0, -180.0), -180.0);
        assert_eq!(unwrap_lng(-170.0, 170.0), 190.0);
        assert_eq!(unwrap_lng(725.0, 0.0), 5.0);
    }
}
