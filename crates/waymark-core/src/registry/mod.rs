//! Per-instance registry.
//!
//! The registry is the only owner of entry state. It guarantees that one
//! host object maps to at most one entry, that an entry's domain and site
//! config are resolved exactly once, and that detached or silent entries are
//! swept away.

pub mod domain;
pub mod entry;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Millis;
use crate::config::{RegistryConfig, RenderSettings};
use crate::error::{BridgeError, Result};
use crate::geo::Bounds;
use crate::host::{HostPage, NodeRef, ObjectRef};
use crate::render::OverlayState;
use crate::sites::SiteConfigProvider;

pub use domain::{resolve_domain, DomainResolution};
pub use entry::{CapturedInstance, DomainSource, EntryId, RegistryEntry};

/// Outcome of [`InstanceRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: EntryId,
    /// `false` when the instance was already registered.
    pub created: bool,
}

/// Why an entry was swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Detached,
    Expired,
}

pub struct InstanceRegistry {
    /// Insertion sequence -> entry. Iteration order is registration order.
    entries: BTreeMap<u64, RegistryEntry>,
    by_object: HashMap<ObjectRef, u64>,
    by_id: HashMap<EntryId, u64>,
    next_seq: u64,
    sites: Arc<dyn SiteConfigProvider>,
    render: RenderSettings,
}

impl InstanceRegistry {
    pub fn new(sites: Arc<dyn SiteConfigProvider>, render: RenderSettings) -> Self {
        Self {
            entries: BTreeMap::new(),
            by_object: HashMap::new(),
            by_id: HashMap::new(),
            next_seq: 1,
            sites,
            render,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, object: ObjectRef) -> bool {
        self.by_object.contains_key(&object)
    }

    /// Register an instance, or refresh it if it is already known.
    ///
    /// Domain and site config are resolved here and never again.
    pub fn register(
        &mut self,
        host: &dyn HostPage,
        instance: CapturedInstance,
        container: Option<NodeRef>,
        now: Millis,
    ) -> Result<Registration> {
        if let Some(seq) = self.by_object.get(&instance.object).copied() {
            if let Some(entry) = self.entries.get_mut(&seq) {
                if !entry.is_active() {
                    entry.reactivate(now);
                } else {
                    entry.touch(now);
                }
                return Ok(Registration {
                    id: entry.id().clone(),
                    created: false,
                });
            }
        }

        if !instance.engine.is_known() {
            return Err(BridgeError::malformed(format!(
                "{} does not match any engine signature",
                instance.object
            )));
        }

        let resolved = resolve_domain(host, instance.object, instance.engine, container);
        let site = self.sites.resolve(&resolved.domain);

        let seq = self.next_seq;
        self.next_seq += 1;
        let suffix = Uuid::new_v4().simple().to_string();
        let id = EntryId(format!(
            "{}-{}-{}",
            RegistryConfig::ID_PREFIX,
            seq,
            &suffix[..8]
        ));

        let overlay = OverlayState::new(
            self.render.max_pool_size,
            self.render.native_probe_attempts,
        );
        let entry = RegistryEntry::new(
            id.clone(),
            instance,
            resolved.domain,
            resolved.source,
            site,
            resolved.container,
            overlay,
            now,
        );
        info!(
            "Registered {} ({}) for {} via {:?}",
            id,
            instance.engine,
            entry.domain(),
            entry.domain_source()
        );

        self.entries.insert(seq, entry);
        self.by_object.insert(instance.object, seq);
        self.by_id.insert(id.clone(), seq);
        Ok(Registration { id, created: true })
    }

    pub fn get(&self, id: &EntryId) -> Option<&RegistryEntry> {
        self.by_id.get(id).and_then(|seq| self.entries.get(seq))
    }

    pub fn get_mut(&mut self, id: &EntryId) -> Option<&mut RegistryEntry> {
        let seq = self.by_id.get(id)?;
        self.entries.get_mut(seq)
    }

    pub fn entry_for(&self, object: ObjectRef) -> Option<&RegistryEntry> {
        self.by_object
            .get(&object)
            .and_then(|seq| self.entries.get(seq))
    }

    pub fn entry_for_mut(&mut self, object: ObjectRef) -> Option<&mut RegistryEntry> {
        let seq = self.by_object.get(&object)?;
        self.entries.get_mut(seq)
    }

    pub fn touch(&mut self, object: ObjectRef, now: Millis) -> Result<()> {
        self.entry_for_mut(object)
            .map(|entry| entry.touch(now))
            .ok_or_else(|| BridgeError::UnknownEntry {
                id: object.to_string(),
            })
    }

    /// Store a viewport reading. Never touches domain or site config.
    /// Returns `true` if the bounds changed.
    pub fn update_bounds(
        &mut self,
        object: ObjectRef,
        bounds: Bounds,
        zoom: Option<f64>,
        now: Millis,
    ) -> Result<bool> {
        bounds.validate()?;
        let entry = self
            .entry_for_mut(object)
            .ok_or_else(|| BridgeError::UnknownEntry {
                id: object.to_string(),
            })?;
        Ok(entry.update_bounds(bounds, zoom, now))
    }

    pub fn mark_listeners_attached(&mut self, object: ObjectRef) {
        if let Some(entry) = self.entry_for_mut(object) {
            entry.mark_listeners_attached();
        }
    }

    /// Remove one entry, releasing its overlay.
    pub fn unregister(&mut self, host: &dyn HostPage, id: &EntryId) -> Option<RegistryEntry> {
        let seq = self.by_id.remove(id)?;
        let mut entry = self.entries.remove(&seq)?;
        self.by_object.remove(&entry.instance().object);
        entry.overlay_mut().release(host);
        entry.deactivate();
        info!("Unregistered {}", id);
        Some(entry)
    }

    /// Sweep entries whose container left the document or that have been
    /// silent longer than `max_age_ms`.
    pub fn cleanup(
        &mut self,
        host: &dyn HostPage,
        now: Millis,
        max_age_ms: u64,
    ) -> Vec<(EntryId, EvictionReason)> {
        let mut evicted = Vec::new();
        for entry in self.entries.values() {
            let reason = match entry.container() {
                Some(container) if !host.is_connected(container) => Some(EvictionReason::Detached),
                _ if now.saturating_sub(entry.last_update()) > max_age_ms => {
                    Some(EvictionReason::Expired)
                }
                _ => None,
            };
            if let Some(reason) = reason {
                evicted.push((entry.id().clone(), reason));
            }
        }

        for (id, reason) in &evicted {
            debug!("Evicting {}: {:?}", id, reason);
            self.unregister(host, id);
        }
        evicted
    }

    /// Active entries in registration order.
    pub fn active_entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values().filter(|e| e.is_active())
    }

    pub fn active_entries_mut(&mut self) -> impl Iterator<Item = &mut RegistryEntry> {
        self.entries.values_mut().filter(|e| e.is_active())
    }

    pub fn active_ids(&self) -> Vec<EntryId> {
        self.active_entries().map(|e| e.id().clone()).collect()
    }

    /// Release every overlay and mark every entry inactive. Entries stay
    /// registered so their domains survive a disable/enable cycle.
    /// Deactivate one entry, keeping it registered. Returns `false` if the
    /// id is unknown.
    pub fn deactivate(&mut self, host: &dyn HostPage, id: &EntryId) -> bool {
        let Some(entry) = self.get_mut(id) else {
            return false;
        };
        entry.overlay_mut().release(host);
        entry.deactivate();
        true
    }

    pub fn deactivate_all(&mut self, host: &dyn HostPage) {
        for entry in self.entries.values_mut() {
            entry.overlay_mut().release(host);
            entry.deactivate();
        }
    }

    /// Reactivate every entry after a disable.
    pub fn reactivate_all(&mut self, now: Millis) {
        for entry in self.entries.values_mut() {
            entry.reactivate(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;
    use crate::host::sim::SimPage;
    use crate::sites::{SiteConfig, SiteConfigTable};

    fn registry() -> InstanceRegistry {
        let sites = SiteConfigTable::default().with_site(
            "a.example",
            SiteConfig {
                name: "a".to_string(),
                ..Default::default()
            },
        );
        InstanceRegistry::new(Arc::new(sites), RenderSettings::default())
    }

    fn page_with_map() -> (SimPage, ObjectRef, NodeRef) {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        let div = page.create_container(page.body(), 200.0, 200.0);
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let map = page.construct_map(EngineKind::EngineA, div, bounds, 5.0).unwrap();
        (page, map, div)
    }

    #[test]
    fn test_register_is_idempotent() {
        let (page, map, div) = page_with_map();
        let mut registry = registry();
        let instance = CapturedInstance::new(map, EngineKind::EngineA);

        let first = registry.register(&page, instance, Some(div), 0).unwrap();
        let second = registry.register(&page, instance, None, 100).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&first.id).unwrap().last_update(), 100);
        assert_eq!(registry.get(&first.id).unwrap().site().name, "a");
    }

    #[test]
    fn test_id_format() {
        let (page, map, _) = page_with_map();
        let mut registry = registry();
        let reg = registry
            .register(&page, CapturedInstance::new(map, EngineKind::EngineA), None, 0)
            .unwrap();
        let parts: Vec<&str> = reg.id.as_str().split('-').collect();
        assert_eq!(parts[0], "map");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let page = SimPage::new("https://a.example/");
        let plain = page.new_object(vec![]);
        let mut registry = registry();
        let err = registry
            .register(&page, CapturedInstance::new(plain, EngineKind::Unknown), None, 0)
            .unwrap_err();
        assert!(err.is_candidate_error());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_bounds_keeps_domain() {
        let (page, map, div) = page_with_map();
        let mut registry = registry();
        let reg = registry
            .register(&page, CapturedInstance::new(map, EngineKind::EngineA), Some(div), 0)
            .unwrap();

        for i in 0..20 {
            let b = Bounds::new(i as f64 + 1.0, i as f64, 1.0, 0.0).unwrap();
            registry.update_bounds(map, b, Some(4.0), i * 10).unwrap();
        }
        assert_eq!(registry.get(&reg.id).unwrap().domain(), "a.example");

        let bad = Bounds {
            north: f64::NAN,
            south: 0.0,
            east: 1.0,
            west: 0.0,
        };
        assert!(registry.update_bounds(map, bad, None, 500).is_err());
    }

    #[test]
    fn test_cleanup_evicts_detached_and_expired() {
        let (page, map, div) = page_with_map();
        let other_div = page.create_container(page.body(), 100.0, 100.0);
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let other = page
            .construct_map(EngineKind::EngineA, other_div, bounds, 5.0)
            .unwrap();
        let mut registry = registry();
        let a = registry
            .register(&page, CapturedInstance::new(map, EngineKind::EngineA), Some(div), 0)
            .unwrap();
        let b = registry
            .register(&page, CapturedInstance::new(other, EngineKind::EngineA), None, 0)
            .unwrap();

        page.detach(div);
        let evicted = registry.cleanup(&page, 1_000, 300_000);
        assert_eq!(evicted, vec![(a.id.clone(), EvictionReason::Detached)]);
        assert!(registry.get(&b.id).is_some());

        let evicted = registry.cleanup(&page, 400_000, 300_000);
        assert_eq!(evicted, vec![(b.id, EvictionReason::Expired)]);
        assert!(registry.is_empty());
        assert!(!registry.contains(map));
    }

    #[test]
    fn test_deactivate_single_entry() {
        let (page, map, div) = page_with_map();
        let mut registry = registry();
        let reg = registry
            .register(&page, CapturedInstance::new(map, EngineKind::EngineA), Some(div), 0)
            .unwrap();

        assert!(registry.deactivate(&page, &reg.id));
        assert!(registry.contains(map));
        assert_eq!(registry.active_entries().count(), 0);
        assert!(!registry.deactivate(&page, &EntryId("missing".to_string())));

        registry.reactivate_all(10);
        assert!(registry.get(&reg.id).unwrap().is_active());
    }

    #[test]
    fn test_deactivate_all_hides_entries() {
        let (page, map, _) = page_with_map();
        let mut registry = registry();
        registry
            .register(&page, CapturedInstance::new(map, EngineKind::EngineA), None, 0)
            .unwrap();
        registry.deactivate_all(&page);
        assert_eq!(registry.active_entries().count(), 0);
        registry.reactivate_all(10);
        assert_eq!(registry.active_entries().count(), 1);
    }
}
