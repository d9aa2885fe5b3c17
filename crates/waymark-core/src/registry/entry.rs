//! Registry entry: one captured instance with its locked origin metadata.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::engine::EngineKind;
use crate::geo::Bounds;
use crate::host::{NodeRef, ObjectRef};
use crate::render::OverlayState;
use crate::sites::SiteConfig;

/// Stable identifier handed out by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-owning handle to a host map object and the engine that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedInstance {
    pub object: ObjectRef,
    pub engine: EngineKind,
    pub listeners_attached: bool,
}

impl CapturedInstance {
    pub fn new(object: ObjectRef, engine: EngineKind) -> Self {
        Self {
            object,
            engine,
            listeners_attached: false,
        }
    }
}

/// Where the locked domain came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainSource {
    ExplicitContainer,
    ContainerAccessor,
    InternalContainer,
    TopLocation,
    Fallback,
}

/// One managed map instance.
///
/// `domain` and `site` are fixed at construction and have no setters;
/// everything after registration goes through [`RegistryEntry::touch`] and
/// [`RegistryEntry::update_bounds`].
#[derive(Debug)]
pub struct RegistryEntry {
    id: EntryId,
    instance: CapturedInstance,
    domain: String,
    domain_source: DomainSource,
    site: Arc<SiteConfig>,
    container: Option<NodeRef>,
    overlay: OverlayState,
    bounds: Option<Bounds>,
    zoom: Option<f64>,
    created_at: Millis,
    last_update: Millis,
    active: bool,
}

impl RegistryEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: EntryId,
        instance: CapturedInstance,
        domain: String,
        domain_source: DomainSource,
        site: Arc<SiteConfig>,
        container: Option<NodeRef>,
        overlay: OverlayState,
        now: Millis,
    ) -> Self {
        Self {
            id,
            instance,
            domain,
            domain_source,
            site,
            container,
            overlay,
            bounds: None,
            zoom: None,
            created_at: now,
            last_update: now,
            active: true,
        }
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    pub fn instance(&self) -> &CapturedInstance {
        &self.instance
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn domain_source(&self) -> DomainSource {
        self.domain_source
    }

    pub fn site(&self) -> &Arc<SiteConfig> {
        &self.site
    }

    pub fn container(&self) -> Option<NodeRef> {
        self.container
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn zoom(&self) -> Option<f64> {
        self.zoom
    }

    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    pub fn last_update(&self) -> Millis {
        self.last_update
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn overlay(&self) -> &OverlayState {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut OverlayState {
        &mut self.overlay
    }

    pub fn touch(&mut self, now: Millis) {
        self.last_update = self.last_update.max(now);
    }

    /// Record a new viewport reading. Returns `true` if the bounds changed.
    pub fn update_bounds(&mut self, bounds: Bounds, zoom: Option<f64>, now: Millis) -> bool {
        let changed = self
            .bounds
            .map(|old| old.quantized_key() != bounds.quantized_key())
            .unwrap_or(true);
        self.bounds = Some(bounds);
        if zoom.is_some() {
            self.zoom = zoom;
        }
        self.touch(now);
        changed
    }

    pub(crate) fn mark_listeners_attached(&mut self) {
        self.instance.listeners_attached = true;
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    pub(crate) fn reactivate(&mut self, now: Millis) {
        self.active = true;
        self.touch(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RegistryEntry {
        RegistryEntry::new(
            EntryId("map-1-abcd1234".to_string()),
            CapturedInstance::new(ObjectRef(7), EngineKind::EngineA),
            "a.example".to_string(),
            DomainSource::ContainerAccessor,
            Arc::new(SiteConfig::default()),
            Some(NodeRef(3)),
            OverlayState::new(4, 0),
            1_000,
        )
    }

    #[test]
    fn test_update_bounds_reports_change() {
        let mut entry = entry();
        let a = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();
        assert!(entry.update_bounds(a, Some(3.0), 2_000));
        assert!(!entry.update_bounds(a, None, 3_000));
        assert_eq!(entry.zoom(), Some(3.0));
        assert_eq!(entry.last_update(), 3_000);
        assert_eq!(entry.domain(), "a.example");
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut entry = entry();
        entry.touch(5_000);
        entry.touch(4_000);
        assert_eq!(entry.last_update(), 5_000);
    }
}
