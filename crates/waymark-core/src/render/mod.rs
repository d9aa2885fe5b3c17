//! Batched marker rendering.
//!
//! Every registry entry gets one drawing surface mounted over its map. A
//! render pass projects the POI set into the surface's pixel space, culls
//! what is off screen and diffs the result against the pooled sprites.
//! Painting happens separately in [`MarkerRenderEngine::flush`], at most once
//! per animation frame.

pub mod native;
pub mod overlay;
pub mod pool;
pub mod sprite;
pub mod surface;

use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::RenderSettings;
use crate::engine::EngineKind;
use crate::error::Result;
use crate::geo::Projection;
use crate::host::{HostPage, PointerEvent, PointerKind, PointerHook};
use crate::protocol::{MessagePort, OutboundMessage, PointOfInterest};
use crate::registry::RegistryEntry;

pub use overlay::{OverlayState, Placement, SyncStats};
pub use pool::{ElementPool, PoolStats};
pub use sprite::MarkerSprite;
pub use surface::Surface;

/// Why a render pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    OverlayDisabled,
    UnknownEngine,
    NoBounds,
    NoSurface,
    EmptyViewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Skipped(SkipReason),
    /// The page draws its own markers. `newly_confirmed` is set on the pass
    /// that first saw them.
    Native { newly_confirmed: bool },
    Rendered { visible: usize, changed: bool },
}

impl RenderOutcome {
    /// True if the entry needs a paint on the next frame.
    pub fn needs_frame(&self) -> bool {
        matches!(self, RenderOutcome::Rendered { changed: true, .. })
    }
}

pub struct MarkerRenderEngine {
    settings: RenderSettings,
    pointer: PointerHook,
    port: Rc<dyn MessagePort>,
}

impl MarkerRenderEngine {
    pub fn new(settings: RenderSettings, pointer: PointerHook, port: Rc<dyn MessagePort>) -> Self {
        Self {
            settings,
            pointer,
            port,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Bring the entry's overlay in line with `pois` and its current viewport.
    pub fn render_markers(
        &self,
        host: &dyn HostPage,
        pois: &[PointOfInterest],
        entry: &mut RegistryEntry,
    ) -> RenderOutcome {
        if !entry.is_active() {
            return RenderOutcome::Skipped(SkipReason::Inactive);
        }
        let site = entry.site().clone();
        let object = entry.instance().object;
        let engine = entry.instance().engine;
        let scope = entry.container().unwrap_or_else(|| host.document_root());
        let bounds = entry.bounds();
        let id = entry.id().clone();
        let overlay = entry.overlay_mut();

        if !site.features.overlay_enabled {
            if overlay.surface().is_some() {
                overlay.release(host);
            }
            return RenderOutcome::Skipped(SkipReason::OverlayDisabled);
        }

        if overlay.native_markers_detected() {
            return RenderOutcome::Native {
                newly_confirmed: false,
            };
        }
        if !pois.is_empty()
            && overlay.take_native_probe()
            && native::detect(host, scope, pois, &site.native)
        {
            overlay.release(host);
            let newly_confirmed = overlay.confirm_native();
            if newly_confirmed {
                info!("Native markers detected on {}, overlay suppressed", id);
                self.port.post(OutboundMessage::NativeActive {});
            }
            return RenderOutcome::Native { newly_confirmed };
        }

        if let EngineKind::Unknown = engine {
            if overlay.should_warn() {
                warn!("No renderer for {}: engine unknown", id);
            }
            return RenderOutcome::Skipped(SkipReason::UnknownEngine);
        }

        let Some(bounds) = bounds else {
            return RenderOutcome::Skipped(SkipReason::NoBounds);
        };

        if overlay.surface().is_none() {
            match Surface::mount(host, object, engine, &site.style, self.pointer.clone()) {
                Ok(surface) => {
                    debug!("Mounted surface {} for {}", surface.node, id);
                    overlay.set_surface(surface);
                    overlay.mark_dirty();
                }
                Err(e) => {
                    if overlay.should_warn() {
                        warn!("Skipping overlay for {}: {}", id, e);
                    }
                    return RenderOutcome::Skipped(SkipReason::NoSurface);
                }
            }
        }

        let (width, height, resized) = match overlay.surface_mut() {
            Some(surface) => {
                let resized = surface.resize(host).unwrap_or_else(|e| {
                    debug!("Resize of {} failed: {}", surface.node, e);
                    false
                });
                (surface.width, surface.height, resized)
            }
            None => return RenderOutcome::Skipped(SkipReason::NoSurface),
        };
        if resized {
            overlay.mark_dirty();
        }

        let view_key = format!("{}|{}x{}", bounds.quantized_key(), width, height);
        if !overlay.is_dirty() && overlay.view_key() == Some(view_key.as_str()) {
            return RenderOutcome::Rendered {
                visible: overlay.active_count(),
                changed: false,
            };
        }

        let Some(projection) = Projection::new(bounds, width, height) else {
            overlay.clear_markers();
            return RenderOutcome::Skipped(SkipReason::EmptyViewport);
        };
        let margin = self.settings.cull_margin_px;
        let placements: Vec<Placement> = pois
            .iter()
            .filter(|poi| poi.has_valid_position())
            .filter_map(|poi| {
                let at = projection.to_pixel(poi.position());
                projection
                    .in_view(at, margin)
                    .then_some(Placement { poi, at })
            })
            .collect();

        let stats = overlay.sync(&placements);
        overlay.set_view_key(view_key);
        if stats.changed() {
            debug!(
                "{}: +{} -{} ~{} ({} visible)",
                id,
                stats.added,
                stats.removed,
                stats.moved,
                overlay.active_count()
            );
        }
        RenderOutcome::Rendered {
            visible: overlay.active_count(),
            changed: overlay.is_dirty(),
        }
    }

    /// Paint the entry's surface if it is dirty.
    pub fn flush(&self, host: &dyn HostPage, entry: &mut RegistryEntry) -> Result<bool> {
        let site = entry.site().clone();
        entry.overlay_mut().flush(host, &site.style)
    }

    /// True if `event` came from this entry's surface.
    pub fn owns_event(&self, entry: &RegistryEntry, event: &PointerEvent) -> bool {
        entry
            .overlay()
            .surface()
            .map(|s| s.node == event.surface)
            .unwrap_or(false)
    }

    /// Translate delegated pointer activity into marker messages, post them
    /// and return what was posted.
    pub fn handle_pointer(
        &self,
        entry: &mut RegistryEntry,
        event: PointerEvent,
    ) -> Vec<OutboundMessage> {
        if !self.owns_event(entry, &event) {
            return Vec::new();
        }
        let site = entry.site().clone();
        let overlay = entry.overlay_mut();
        let mut out = Vec::new();

        match event.kind {
            PointerKind::Click => {
                if let Some(sprite) = overlay.hit_test(event.x, event.y, &site.style) {
                    out.push(OutboundMessage::MarkerClick(sprite.event()));
                }
            }
            PointerKind::Move => {
                let hit = overlay
                    .hit_test(event.x, event.y, &site.style)
                    .map(|s| s.poi_id.clone());
                let previous = overlay.hovered().map(str::to_string);
                if hit != previous {
                    if let Some(sprite) = previous.as_deref().and_then(|id| overlay.sprite(id)) {
                        out.push(OutboundMessage::MarkerLeave(sprite.event()));
                    }
                    if let Some(sprite) = hit.as_deref().and_then(|id| overlay.sprite(id)) {
                        out.push(OutboundMessage::MarkerHover(sprite.event()));
                    }
                    overlay.set_hovered(hit);
                }
            }
            PointerKind::Leave => {
                if let Some(sprite) = overlay.hovered().and_then(|id| overlay.sprite(id)) {
                    out.push(OutboundMessage::MarkerLeave(sprite.event()));
                }
                overlay.set_hovered(None);
            }
        }

        for message in &out {
            self.port.post(message.clone());
        }
        out
    }
}
