//! Last-resort search through a component framework's internal tree.
//!
//! Frameworks hang a node of their reconciliation tree off each rendered
//! element. A map created inside a component usually sits in that node's
//! props, or in a ref kept in its linked list of hook states.

use std::collections::HashSet;

use crate::engine::{probe, EngineKind, COMPONENT_TREE_PREFIXES};
use crate::host::{HostPage, HostValue, NodeRef, ObjectRef};

/// Component-tree nodes attached to an element.
pub fn component_roots(host: &dyn HostPage, element: NodeRef) -> Vec<ObjectRef> {
    let target = HostValue::Node(element);
    let Ok(keys) = host.keys(&target) else {
        return Vec::new();
    };
    keys.iter()
        .filter(|key| COMPONENT_TREE_PREFIXES.iter().any(|p| key.starts_with(p)))
        .filter_map(|key| host.get(&target, key).ok()?.as_object())
        .collect()
}

/// Walk up from `start` through at most `hops` parents, looking at props and
/// at most `state_hops` hook states per node.
pub fn find_in_tree(
    host: &dyn HostPage,
    start: ObjectRef,
    hops: usize,
    state_hops: usize,
) -> Option<(ObjectRef, EngineKind)> {
    let mut seen = HashSet::new();
    let mut current = start;
    for _ in 0..=hops {
        if !seen.insert(current) {
            return None;
        }
        let node = HostValue::Object(current);
        if let Some(found) = search_props(host, &node) {
            return Some(found);
        }
        if let Some(found) = search_state_chain(host, &node, state_hops) {
            return Some(found);
        }
        current = host.get(&node, "return").ok()?.as_object()?;
    }
    None
}

fn search_props(host: &dyn HostPage, node: &HostValue) -> Option<(ObjectRef, EngineKind)> {
    let props = host.get(node, "memoizedProps").ok()?;
    if !props.is_traversable() {
        return None;
    }
    host.keys(&props)
        .ok()?
        .iter()
        .find_map(|key| match_value(host, &host.get(&props, key).ok()?))
}

fn search_state_chain(
    host: &dyn HostPage,
    node: &HostValue,
    state_hops: usize,
) -> Option<(ObjectRef, EngineKind)> {
    let mut state = host.get(node, "memoizedState").ok()?;
    for _ in 0..state_hops {
        if !state.is_traversable() {
            return None;
        }
        if let Some(found) = host
            .get(&state, "memoizedState")
            .ok()
            .and_then(|value| match_value(host, &value))
        {
            return Some(found);
        }
        state = host.get(&state, "next").ok()?;
    }
    None
}

/// The value itself, or a ref holding it in `current`.
fn match_value(host: &dyn HostPage, value: &HostValue) -> Option<(ObjectRef, EngineKind)> {
    let obj = value.as_object()?;
    let kind = probe(host, obj);
    if kind.is_known() {
        return Some((obj, kind));
    }
    let inner = host.get(value, "current").ok()?.as_object()?;
    let kind = probe(host, inner);
    kind.is_known().then_some((inner, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Bounds;
    use crate::host::sim::{ComponentSlot, SimPage};

    fn setup(engine: EngineKind) -> (SimPage, ObjectRef, NodeRef) {
        let page = SimPage::new("https://a.example/");
        page.load_engine(engine);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let map = page.construct_map(engine, div, bounds, 3.0).unwrap();
        (page, map, div)
    }

    #[test]
    fn test_finds_map_in_props() {
        let (page, map, div) = setup(EngineKind::EngineA);
        page.attach_component_tree(div, map, 3, ComponentSlot::Prop);

        let roots = component_roots(&page, div);
        assert_eq!(roots.len(), 1);
        assert_eq!(
            find_in_tree(&page, roots[0], 15, 10),
            Some((map, EngineKind::EngineA))
        );
    }

    #[test]
    fn test_finds_map_in_ref_state() {
        let (page, map, div) = setup(EngineKind::EngineB);
        page.attach_component_tree(div, map, 0, ComponentSlot::Ref);

        let root = component_roots(&page, div)[0];
        assert_eq!(
            find_in_tree(&page, root, 15, 10),
            Some((map, EngineKind::EngineB))
        );
        assert_eq!(find_in_tree(&page, root, 15, 1), None);
    }

    #[test]
    fn test_hop_limit() {
        let (page, map, div) = setup(EngineKind::EngineA);
        page.attach_component_tree(div, map, 20, ComponentSlot::Prop);
        let root = component_roots(&page, div)[0];
        assert_eq!(find_in_tree(&page, root, 15, 10), None);
    }
}
