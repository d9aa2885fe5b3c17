//! Discovery of instances that were created before interception.
//!
//! Strategies, cheapest first:
//! 1. engine-maintained instance registries
//! 2. container selectors, descending into shadow roots that are not chrome
//! 3. probe properties on matched elements and their ancestors
//! 4. a bounded property walk from each matched element
//! 5. component-tree state hanging off matched elements
//!
//! Every hit goes straight to [`InstanceRegistry::register`], which does the
//! de-duplication.

pub mod fiber;
pub mod walk;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::clock::Millis;
use crate::config::DiscoverySettings;
use crate::engine::extract::container_of;
use crate::engine::{all_container_selectors, all_probe_props, probe, EngineKind, PROFILES};
use crate::host::{HostPage, HostValue, NodeRef, ObjectRef};
use crate::registry::{CapturedInstance, EntryId, InstanceRegistry};

use walk::WalkLimits;

/// Scan cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Nothing managed yet: scan every tick.
    Idle,
    /// At least one instance managed: scan every Nth tick.
    Settled,
}

/// What one `run` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub scanned: bool,
    pub candidates: usize,
    pub registered: Vec<EntryId>,
    pub failed: usize,
}

/// A candidate and the element it was found through, if any.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    object: ObjectRef,
    engine: EngineKind,
    found_at: Option<NodeRef>,
}

pub struct DiscoveryScanner {
    settings: DiscoverySettings,
    extra_selectors: Vec<String>,
    ticks: u64,
    scans: u64,
}

impl DiscoveryScanner {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self {
            settings,
            extra_selectors: Vec::new(),
            ticks: 0,
            scans: 0,
        }
    }

    /// Site-specific container selectors tried after the engines' own.
    pub fn with_selectors(mut self, selectors: Vec<String>) -> Self {
        self.extra_selectors = selectors;
        self
    }

    pub fn mode(&self, registry: &InstanceRegistry) -> ScanMode {
        if registry.is_empty() {
            ScanMode::Idle
        } else {
            ScanMode::Settled
        }
    }

    /// Number of scans actually performed.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Called once per tick. Scans if the cadence allows.
    pub fn run(
        &mut self,
        host: &dyn HostPage,
        registry: &mut InstanceRegistry,
        now: Millis,
    ) -> ScanReport {
        let tick = self.ticks;
        self.ticks += 1;
        let due = match self.mode(registry) {
            ScanMode::Idle => true,
            ScanMode::Settled => tick % self.settings.settled_scan_every.max(1) == 0,
        };
        if !due {
            return ScanReport::default();
        }

        self.scans += 1;
        let candidates = self.collect(host);
        let mut report = ScanReport {
            scanned: true,
            candidates: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            let container = container_of(host, candidate.object, candidate.engine)
                .or(candidate.found_at);
            let instance = CapturedInstance::new(candidate.object, candidate.engine);
            match registry.register(host, instance, container, now) {
                Ok(registration) if registration.created => {
                    debug!(
                        "Discovered {} {} as {}",
                        candidate.engine, candidate.object, registration.id
                    );
                    report.registered.push(registration.id);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Discarding candidate {}: {}", candidate.object, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Every candidate visible right now, de-duplicated, in strategy order.
    fn collect(&self, host: &dyn HostPage) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |candidate: Candidate, out: &mut Vec<Candidate>| {
            if seen.insert(candidate.object) {
                out.push(candidate);
            }
        };

        for candidate in self.from_engine_registries(host) {
            push(candidate, &mut out);
        }

        let elements = self.container_elements(host);
        trace!("Discovery matched {} container elements", elements.len());
        let limits = WalkLimits {
            max_depth: self.settings.property_walk_depth,
            frontier_limit: self.settings.frontier_limit,
        };
        for element in elements {
            for candidate in self.from_element(host, element, limits) {
                push(candidate, &mut out);
            }
        }
        out
    }

    fn from_engine_registries(&self, host: &dyn HostPage) -> Vec<Candidate> {
        let mut out = Vec::new();
        for profile in PROFILES.iter() {
            let Some(path) = profile.instance_registry_path else {
                continue;
            };
            let list = host.global(path);
            let Ok(keys) = host.keys(&list) else {
                continue;
            };
            for key in keys {
                let Some(object) = host.get(&list, &key).ok().and_then(|v| v.as_object()) else {
                    continue;
                };
                let engine = probe(host, object);
                if engine.is_known() {
                    out.push(Candidate {
                        object,
                        engine,
                        found_at: None,
                    });
                }
            }
        }
        out
    }

    /// Elements matching any container selector, across shadow roots.
    fn container_elements(&self, host: &dyn HostPage) -> Vec<NodeRef> {
        let selectors: Vec<&str> = all_container_selectors()
            .into_iter()
            .chain(self.extra_selectors.iter().map(String::as_str))
            .collect();
        let selector = selectors.join(", ");

        let mut out = Vec::new();
        let mut scopes = vec![(host.document_root(), 0usize)];
        while let Some((scope, depth)) = scopes.pop() {
            out.extend(host.query_all(scope, &selector));
            if depth >= self.settings.shadow_depth {
                continue;
            }
            for node in host.query_all(scope, "*") {
                if self.is_chrome(host, node) {
                    continue;
                }
                if let Some(root) = host.shadow_root(node) {
                    scopes.push((root, depth + 1));
                }
            }
        }
        out
    }

    /// Icons, buttons and similar UI chrome never host a map.
    fn is_chrome(&self, host: &dyn HostPage, node: NodeRef) -> bool {
        let tag = host.tag_name(node).unwrap_or_default().to_ascii_lowercase();
        if self.settings.chrome_tags.iter().any(|t| *t == tag) {
            return true;
        }
        host.class_list(node).iter().any(|class| {
            let class = class.to_ascii_lowercase();
            self.settings
                .chrome_class_fragments
                .iter()
                .any(|fragment| class.contains(fragment.as_str()))
        })
    }

    fn from_element(
        &self,
        host: &dyn HostPage,
        element: NodeRef,
        limits: WalkLimits,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        let probe_props = all_probe_props();

        let mut node = Some(element);
        for _ in 0..=self.settings.ancestor_probe_depth {
            let Some(current) = node else {
                break;
            };
            let target = HostValue::Node(current);
            for prop in &probe_props {
                let Some(object) = host.get(&target, prop).ok().and_then(|v| v.as_object()) else {
                    continue;
                };
                let engine = probe(host, object);
                if engine.is_known() {
                    out.push(Candidate {
                        object,
                        engine,
                        found_at: Some(current),
                    });
                }
            }
            for root in fiber::component_roots(host, current) {
                if let Some((object, engine)) = fiber::find_in_tree(
                    host,
                    root,
                    self.settings.component_tree_hops,
                    self.settings.state_chain_hops,
                ) {
                    out.push(Candidate {
                        object,
                        engine,
                        found_at: Some(current),
                    });
                }
            }
            node = host.parent(current);
        }

        if out.is_empty() {
            for (object, engine) in walk::find_instances(host, HostValue::Node(element), limits) {
                out.push(Candidate {
                    object,
                    engine,
                    found_at: Some(element),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderSettings;
    use crate::geo::Bounds;
    use crate::host::sim::{ComponentSlot, SimPage};
    use crate::sites::SiteConfigTable;
    use std::sync::Arc;

    fn registry() -> InstanceRegistry {
        InstanceRegistry::new(Arc::new(SiteConfigTable::default()), RenderSettings::default())
    }

    fn bounds() -> Bounds {
        Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap()
    }

    #[test]
    fn test_engine_registry_strategy() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineB);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineB, div, bounds(), 3.0).unwrap();

        let mut registry = registry();
        let mut scanner = DiscoveryScanner::new(DiscoverySettings::default());
        let report = scanner.run(&page, &mut registry, 0);
        assert_eq!(report.registered.len(), 1);
        assert_eq!(registry.entry_for(map).unwrap().container(), Some(div));
    }

    #[test]
    fn test_probe_prop_on_ancestor() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        let outer = page.create_container(page.body(), 100.0, 100.0);
        let div = page.create_container(outer, 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineA, div, bounds(), 3.0).unwrap();
        page.set_node_prop(outer, "mapInstance", HostValue::Object(map));

        let mut registry = registry();
        let mut scanner = DiscoveryScanner::new(DiscoverySettings::default());
        scanner.run(&page, &mut registry, 0);
        assert!(registry.contains(map));
        assert_eq!(registry.entry_for(map).unwrap().container(), Some(div));
    }

    #[test]
    fn test_component_tree_strategy() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineA, div, bounds(), 3.0).unwrap();
        page.attach_component_tree(div, map, 4, ComponentSlot::Ref);

        let mut registry = registry();
        let mut scanner = DiscoveryScanner::new(DiscoverySettings::default());
        scanner.run(&page, &mut registry, 0);
        assert!(registry.contains(map));
    }

    #[test]
    fn test_shadow_descent_skips_chrome() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);

        let widget = page.create_element_in(page.body(), "map-widget");
        let shadow = page.attach_shadow(widget).unwrap();
        let div = page.create_container(shadow, 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineA, div, bounds(), 3.0).unwrap();
        page.set_node_prop(div, "__map", HostValue::Object(map));

        let button = page.create_element_in(page.body(), "button");
        let hidden = page.attach_shadow(button).unwrap();
        let other_div = page.create_container(hidden, 100.0, 100.0);
        let other = page
            .construct_map(EngineKind::EngineA, other_div, bounds(), 3.0)
            .unwrap();
        page.set_node_prop(other_div, "__map", HostValue::Object(other));

        let mut registry = registry();
        let mut scanner = DiscoveryScanner::new(DiscoverySettings::default());
        scanner.run(&page, &mut registry, 0);
        assert!(registry.contains(map));
        assert!(!registry.contains(other));
    }

    #[test]
    fn test_broken_candidate_does_not_stop_scan() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineB);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let good = page.construct_map(EngineKind::EngineB, div, bounds(), 3.0).unwrap();
        let fake = page.new_object(vec![]);
        page.add_method(fake, "getBounds");
        page.add_method(fake, "getContainer");
        page.poison(fake);
        page.set_global(
            "L.__instances",
            HostValue::Array(vec![HostValue::Object(fake), HostValue::Object(good)]),
        );

        let mut registry = registry();
        let mut scanner = DiscoveryScanner::new(DiscoverySettings::default());
        let report = scanner.run(&page, &mut registry, 0);
        assert!(registry.contains(good));
        assert_eq!(report.candidates, 2);
    }

    #[test]
    fn test_backoff_once_settled() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineB);
        let mut registry = registry();
        let mut scanner = DiscoveryScanner::new(DiscoverySettings::default());

        for t in 0..5 {
            assert!(scanner.run(&page, &mut registry, t).scanned);
        }
        let div = page.create_container(page.body(), 100.0, 100.0);
        page.construct_map(EngineKind::EngineB, div, bounds(), 3.0).unwrap();
        for t in 5..40 {
            scanner.run(&page, &mut registry, t);
        }
        // 5 idle scans, one that found the map, then every 10th of ticks 6..40.
        assert!(scanner.scans() <= 5 + 1 + 4);
        assert_eq!(scanner.mode(&registry), ScanMode::Settled);
    }
}
