//! Per-entry overlay state: pooled sprites, the active set and the surface.

use std::collections::{HashMap, HashSet};

use crate::host::HostPage;
use crate::protocol::PointOfInterest;
use crate::render::pool::{ElementPool, PoolStats};
use crate::render::sprite::MarkerSprite;
use crate::render::surface::Surface;
use crate::sites::MarkerStyle;

/// A POI that should be visible, with its pixel position.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub poi: &'a PointOfInterest,
    pub at: (f64, f64),
}

/// What one diff pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub added: usize,
    pub kept: usize,
    pub removed: usize,
    pub moved: usize,
}

impl SyncStats {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0 || self.moved > 0
    }
}

#[derive(Debug)]
pub struct OverlayState {
    pool: ElementPool<MarkerSprite>,
    active: HashMap<String, MarkerSprite>,
    /// Draw order of the active sprites.
    order: Vec<String>,
    native_markers_detected: bool,
    native_announced: bool,
    native_probes_left: u32,
    surface: Option<Surface>,
    dirty: bool,
    view_key: Option<String>,
    hovered: Option<String>,
    warned: bool,
}

impl OverlayState {
    pub fn new(max_pool_size: usize, native_probe_attempts: u32) -> Self {
        Self {
            pool: ElementPool::new(max_pool_size),
            active: HashMap::new(),
            order: Vec::new(),
            native_markers_detected: false,
            native_announced: false,
            native_probes_left: native_probe_attempts,
            surface: None,
            dirty: false,
            view_key: None,
            hovered: None,
            warned: false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_ids(&self) -> &[String] {
        &self.order
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn native_markers_detected(&self) -> bool {
        self.native_markers_detected
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.view_key = None;
    }

    pub fn hovered(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    pub(crate) fn set_surface(&mut self, surface: Surface) {
        self.surface = Some(surface);
    }

    pub(crate) fn surface_mut(&mut self) -> Option<&mut Surface> {
        self.surface.as_mut()
    }

    pub(crate) fn view_key(&self) -> Option<&str> {
        self.view_key.as_deref()
    }

    pub(crate) fn set_view_key(&mut self, key: String) {
        self.view_key = Some(key);
    }

    pub(crate) fn set_hovered(&mut self, id: Option<String>) {
        self.hovered = id;
    }

    /// Spend one native probe. Returns `false` once the budget is used up.
    pub(crate) fn take_native_probe(&mut self) -> bool {
        if self.native_probes_left == 0 {
            return false;
        }
        self.native_probes_left -= 1;
        true
    }

    /// Record confirmed native markers. Returns `true` the first time only.
    pub(crate) fn confirm_native(&mut self) -> bool {
        self.native_markers_detected = true;
        if self.native_announced {
            return false;
        }
        self.native_announced = true;
        true
    }

    /// Warn-once latch for missing host primitives.
    pub(crate) fn should_warn(&mut self) -> bool {
        !std::mem::replace(&mut self.warned, true)
    }

    /// Diff the active sprites against `visible`: keep and move sprites for
    /// POIs still visible, take sprites from the pool for new ones, and
    /// return the rest to the pool.
    pub fn sync(&mut self, visible: &[Placement<'_>]) -> SyncStats {
        let mut stats = SyncStats::default();
        let wanted: HashSet<&str> = visible.iter().map(|p| p.poi.id.as_str()).collect();

        for id in std::mem::take(&mut self.order) {
            if wanted.contains(id.as_str()) {
                continue;
            }
            if let Some(mut sprite) = self.active.remove(&id) {
                sprite.reset();
                self.pool.release(sprite);
                stats.removed += 1;
            }
        }

        let mut placed: HashSet<&str> = HashSet::with_capacity(visible.len());
        for placement in visible {
            let id = &placement.poi.id;
            // Duplicate ids in one POI set: first one wins.
            if !placed.insert(id.as_str()) {
                continue;
            }
            match self.active.get_mut(id) {
                Some(sprite) => {
                    stats.kept += 1;
                    if sprite.refresh(placement.poi, placement.at) {
                        stats.moved += 1;
                    }
                }
                None => {
                    let mut sprite = self.pool.acquire(MarkerSprite::blank);
                    sprite.assign(placement.poi, placement.at);
                    self.active.insert(id.clone(), sprite);
                    stats.added += 1;
                }
            }
            self.order.push(id.clone());
        }

        if stats.changed() {
            self.dirty = true;
        }
        stats
    }

    /// Topmost active sprite under `(x, y)`.
    pub fn hit_test(&self, x: f64, y: f64, style: &MarkerStyle) -> Option<&MarkerSprite> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.active.get(id))
            .find(|sprite| sprite.hit(x, y, style))
    }

    pub fn sprite(&self, id: &str) -> Option<&MarkerSprite> {
        self.active.get(id)
    }

    /// Paint the active sprites if anything changed since the last paint.
    pub fn flush(&mut self, host: &dyn HostPage, style: &MarkerStyle) -> crate::error::Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let painted = match &self.surface {
            Some(surface) => {
                let sprites = self.order.iter().filter_map(|id| self.active.get(id));
                surface.paint(host, sprites, style)?;
                true
            }
            None => false,
        };
        self.dirty = false;
        Ok(painted)
    }

    /// Return every active sprite to the pool and blank the surface.
    pub fn clear_markers(&mut self) {
        for id in std::mem::take(&mut self.order) {
            if let Some(mut sprite) = self.active.remove(&id) {
                sprite.reset();
                self.pool.release(sprite);
            }
        }
        self.hovered = None;
        self.view_key = None;
        self.dirty = self.surface.is_some();
    }

    /// Drop everything, including the surface element.
    pub fn release(&mut self, host: &dyn HostPage) {
        self.clear_markers();
        if let Some(surface) = self.surface.take() {
            surface.remove(host);
        }
        self.pool.clear();
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poi(id: &str) -> PointOfInterest {
        PointOfInterest {
            id: id.to_string(),
            name: id.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            color: "#000".to_string(),
            secondary_color: "#fff".to_string(),
            logo_data: None,
            group_name: None,
        }
    }

    #[test]
    fn test_sync_reuses_and_returns_sprites() {
        let pois: Vec<PointOfInterest> = ["a", "b", "c"].iter().map(|id| poi(id)).collect();
        let mut overlay = OverlayState::new(10, 0);

        let all: Vec<Placement> = pois.iter().map(|p| Placement { poi: p, at: (1.0, 1.0) }).collect();
        let first = overlay.sync(&all);
        assert_eq!(first.added, 3);
        assert!(overlay.is_dirty());

        let some = vec![Placement {
            poi: &pois[1],
            at: (2.0, 1.0),
        }];
        let second = overlay.sync(&some);
        assert_eq!(second.removed, 2);
        assert_eq!(second.kept, 1);
        assert_eq!(second.moved, 1);
        assert_eq!(overlay.pool_len(), 2);
        assert_eq!(overlay.active_ids(), &["b".to_string()]);

        let third = overlay.sync(&all);
        assert_eq!(third.added, 2);
        assert_eq!(overlay.pool_len(), 0);
        assert_eq!(overlay.pool_stats().created, 3);
        assert_eq!(overlay.pool_stats().reused, 2);
    }

    #[test]
    fn test_sync_unchanged_is_clean() {
        let p = poi("a");
        let mut overlay = OverlayState::new(10, 0);
        let placements = vec![Placement { poi: &p, at: (3.0, 3.0) }];
        overlay.sync(&placements);
        overlay.dirty = false;
        let stats = overlay.sync(&placements);
        assert!(!stats.changed());
        assert!(!overlay.is_dirty());
    }

    #[test]
    fn test_pool_bound_holds_on_mass_release() {
        let pois: Vec<PointOfInterest> = (0..50).map(|i| poi(&format!("p{}", i))).collect();
        let mut overlay = OverlayState::new(8, 0);
        let all: Vec<Placement> = pois.iter().map(|p| Placement { poi: p, at: (0.0, 0.0) }).collect();
        overlay.sync(&all);
        overlay.sync(&[]);
        assert_eq!(overlay.pool_len(), 8);
        assert_eq!(overlay.pool_stats().discarded, 42);
    }

    #[test]
    fn test_hit_test_prefers_topmost() {
        let a = poi("a");
        let b = poi("b");
        let mut overlay = OverlayState::new(10, 0);
        overlay.sync(&[
            Placement { poi: &a, at: (10.0, 10.0) },
            Placement { poi: &b, at: (12.0, 10.0) },
        ]);
        let style = MarkerStyle::default();
        assert_eq!(overlay.hit_test(11.0, 10.0, &style).unwrap().poi_id, "b");
        assert!(overlay.hit_test(100.0, 100.0, &style).is_none());
    }

    #[test]
    fn test_native_confirmation_announces_once() {
        let mut overlay = OverlayState::new(10, 2);
        assert!(overlay.take_native_probe());
        assert!(overlay.take_native_probe());
        assert!(!overlay.take_native_probe());
        assert!(overlay.confirm_native());
        assert!(!overlay.confirm_native());
        assert!(overlay.native_markers_detected());
    }
}
