//! Bounded breadth-first walk over host object properties.

use std::collections::{HashSet, VecDeque};

use crate::engine::{probe, EngineKind, COMPONENT_TREE_PREFIXES};
use crate::host::{HostPage, HostValue, NodeRef, ObjectRef};

/// Limits for one walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkLimits {
    pub max_depth: usize,
    /// Most values the walk will visit before giving up.
    pub frontier_limit: usize,
}

#[derive(Default)]
struct Visited {
    objects: HashSet<ObjectRef>,
    nodes: HashSet<NodeRef>,
}

impl Visited {
    /// Returns `false` if the value was seen before. Arrays have no identity
    /// and are always new.
    fn insert(&mut self, value: &HostValue) -> bool {
        match value {
            HostValue::Object(obj) => self.objects.insert(*obj),
            HostValue::Node(node) => self.nodes.insert(*node),
            _ => true,
        }
    }

    fn len(&self) -> usize {
        self.objects.len() + self.nodes.len()
    }
}

/// Every map instance reachable from `root` within `limits`, in discovery
/// order. Keys owned by a component framework are left to the component
/// tree walk.
pub fn find_instances(
    host: &dyn HostPage,
    root: HostValue,
    limits: WalkLimits,
) -> Vec<(ObjectRef, EngineKind)> {
    let mut found = Vec::new();
    let mut visited = Visited::default();
    let mut queue: VecDeque<(HostValue, usize)> = VecDeque::new();

    visited.insert(&root);
    queue.push_back((root, 0));

    while let Some((value, depth)) = queue.pop_front() {
        if let HostValue::Object(obj) = value {
            let kind = probe(host, obj);
            if kind.is_known() {
                found.push((obj, kind));
                // An instance's own internals are not searched.
                continue;
            }
        }
        if depth >= limits.max_depth {
            continue;
        }

        let Ok(keys) = host.keys(&value) else {
            continue;
        };
        for key in keys {
            if COMPONENT_TREE_PREFIXES.iter().any(|p| key.starts_with(p)) {
                continue;
            }
            let Ok(child) = host.get(&value, &key) else {
                continue;
            };
            if !child.is_traversable() || !visited.insert(&child) {
                continue;
            }
            if visited.len() > limits.frontier_limit {
                return found;
            }
            queue.push_back((child, depth + 1));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Bounds;
    use crate::host::sim::SimPage;

    fn limits() -> WalkLimits {
        WalkLimits {
            max_depth: 2,
            frontier_limit: 64,
        }
    }

    fn page_with_map() -> (SimPage, ObjectRef) {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let map = page.construct_map(EngineKind::EngineA, div, bounds, 3.0).unwrap();
        (page, map)
    }

    #[test]
    fn test_finds_instance_two_levels_down() {
        let (page, map) = page_with_map();
        let inner = page.new_object(vec![("view", HostValue::Object(map))]);
        let outer = page.new_object(vec![("store", HostValue::Object(inner))]);

        let found = find_instances(&page, HostValue::Object(outer), limits());
        assert_eq!(found, vec![(map, EngineKind::EngineA)]);
    }

    #[test]
    fn test_depth_cap() {
        let (page, map) = page_with_map();
        let a = page.new_object(vec![("map", HostValue::Object(map))]);
        let b = page.new_object(vec![("a", HostValue::Object(a))]);
        let c = page.new_object(vec![("b", HostValue::Object(b))]);
        assert!(find_instances(&page, HostValue::Object(c), limits()).is_empty());
    }

    #[test]
    fn test_cycles_terminate() {
        let (page, map) = page_with_map();
        let a = page.new_object(vec![]);
        let b = page.new_object(vec![("back", HostValue::Object(a))]);
        page.set_object_prop(a, "next", HostValue::Object(b));
        page.set_object_prop(a, "self", HostValue::Object(a));
        page.set_object_prop(b, "map", HostValue::Object(map));

        let found = find_instances(
            &page,
            HostValue::Object(a),
            WalkLimits {
                max_depth: 10,
                frontier_limit: 64,
            },
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_throwing_getter_is_skipped() {
        let (page, map) = page_with_map();
        let holder = page.new_object(vec![
            ("broken", HostValue::Null),
            ("ok", HostValue::Object(map)),
        ]);
        page.poison_prop(holder, "broken");
        let found = find_instances(&page, HostValue::Object(holder), limits());
        assert_eq!(found, vec![(map, EngineKind::EngineA)]);
    }

    #[test]
    fn test_frontier_limit() {
        let (page, map) = page_with_map();
        let mut props: Vec<(String, HostValue)> = (0..20)
            .map(|i| (format!("k{:02}", i), HostValue::Object(page.new_object(vec![]))))
            .collect();
        props.push(("zz".to_string(), HostValue::Object(map)));
        let root = page.new_object(props.iter().map(|(k, v)| (k.as_str(), v.clone())).collect());

        let found = find_instances(
            &page,
            HostValue::Object(root),
            WalkLimits {
                max_depth: 2,
                frontier_limit: 5,
            },
        );
        assert!(found.is_empty());
    }
}
