//! One marker drawn on a batched surface.

use crate::host::DrawCommand;
use crate::protocol::{MarkerEvent, PointOfInterest};
use crate::sites::MarkerStyle;

/// Pooled drawing state for a single POI. Reassigned wholesale when it is
/// taken back out of the pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerSprite {
    pub poi_id: String,
    pub lat: f64,
    pub lng: f64,
    pub x: f64,
    pub y: f64,
    pub fill: String,
    pub stroke: String,
    pub logo: Option<String>,
    pub label: String,
}

impl MarkerSprite {
    pub fn blank() -> Self {
        Self::default()
    }

    /// Point this sprite at `poi`, drawn at pixel `(x, y)`.
    pub fn assign(&mut self, poi: &PointOfInterest, (x, y): (f64, f64)) {
        self.poi_id.clone_from(&poi.id);
        self.lat = poi.latitude;
        self.lng = poi.longitude;
        self.x = x;
        self.y = y;
        self.fill.clone_from(&poi.color);
        self.stroke.clone_from(&poi.secondary_color);
        self.logo.clone_from(&poi.logo_data);
        self.label.clone_from(&poi.name);
    }

    /// Update position and appearance. Returns `true` if anything visible
    /// changed.
    pub fn refresh(&mut self, poi: &PointOfInterest, at: (f64, f64)) -> bool {
        let before = self.clone();
        self.assign(poi, at);
        *self != before
    }

    /// Drop references to POI data before the sprite goes back to the pool.
    pub fn reset(&mut self) {
        self.poi_id.clear();
        self.logo = None;
        self.label.clear();
    }

    pub fn hit(&self, x: f64, y: f64, style: &MarkerStyle) -> bool {
        let reach = style.radius_px + style.stroke_width_px;
        let dx = x - self.x;
        let dy = y - self.y;
        dx * dx + dy * dy <= reach * reach
    }

    pub fn event(&self) -> MarkerEvent {
        MarkerEvent {
            id: self.poi_id.clone(),
            lat: self.lat,
            lng: self.lng,
        }
    }

    pub fn draw(&self, style: &MarkerStyle, out: &mut Vec<DrawCommand>) {
        out.push(DrawCommand::Circle {
            x: self.x,
            y: self.y,
            radius: style.radius_px,
            fill: self.fill.clone(),
            stroke: self.stroke.clone(),
            stroke_width: style.stroke_width_px,
        });
        if let Some(data) = &self.logo {
            out.push(DrawCommand::Image {
                x: self.x - style.logo_size_px / 2.0,
                y: self.y - style.logo_size_px / 2.0,
                size: style.logo_size_px,
                data: data.clone(),
            });
        }
        if style.labels {
            out.push(DrawCommand::Label {
                x: self.x,
                y: self.y + style.radius_px + style.stroke_width_px + 2.0,
                text: self.label.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poi() -> PointOfInterest {
        PointOfInterest {
            id: "p1".to_string(),
            name: "Pier 39".to_string(),
            latitude: 37.8087,
            longitude: -122.4098,
            color: "#0a0".to_string(),
            secondary_color: "#fff".to_string(),
            logo_data: Some("data:image/png;base64,AAAA".to_string()),
            group_name: None,
        }
    }

    #[test]
    fn test_refresh_reports_movement() {
        let mut sprite = MarkerSprite::blank();
        sprite.assign(&poi(), (10.0, 10.0));
        assert!(!sprite.refresh(&poi(), (10.0, 10.0)));
        assert!(sprite.refresh(&poi(), (11.0, 10.0)));
    }

    #[test]
    fn test_hit_radius_includes_stroke() {
        let mut sprite = MarkerSprite::blank();
        sprite.assign(&poi(), (50.0, 50.0));
        let style = MarkerStyle::default();
        assert!(sprite.hit(58.0, 50.0, &style));
        assert!(!sprite.hit(60.0, 50.0, &style));
    }

    #[test]
    fn test_draw_emits_logo_and_optional_label() {
        let mut sprite = MarkerSprite::blank();
        sprite.assign(&poi(), (5.0, 5.0));
        let mut out = Vec::new();
        sprite.draw(&MarkerStyle::default(), &mut out);
        assert_eq!(out.len(), 2);

        let labelled = MarkerStyle {
            labels: true,
            ..Default::default()
        };
        out.clear();
        sprite.draw(&labelled, &mut out);
        assert!(matches!(out.last(), Some(DrawCommand::Label { text, .. }) if text == "Pier 39"));
    }
}
