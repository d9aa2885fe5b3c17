//! Map engines the bridge knows how to capture.
//!
//! Engines are told apart by what their instances can do, not by name: an
//! object that exposes the right pair of accessor methods is a map. The
//! probe turns that duck-typing into a closed [`EngineKind`] so the rest of
//! the crate can match exhaustively.

pub mod extract;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::{HostPage, ObjectRef};

/// Closed set of engine tags produced by [`probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineKind {
    /// Instances expose `getBounds` and `getDiv`.
    EngineA,
    /// Instances expose `getBounds` and `getContainer`.
    EngineB,
    Unknown,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::EngineA => "engine_a",
            EngineKind::EngineB => "engine_b",
            EngineKind::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EngineKind::Unknown)
    }

    pub fn profile(&self) -> Option<&'static EngineProfile> {
        PROFILES.iter().find(|p| p.kind == *self)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and how to find one engine in a page.
#[derive(Debug)]
pub struct EngineProfile {
    pub kind: EngineKind,
    /// Global path of the map constructor.
    pub constructor_path: &'static str,
    /// Global path of the shared instance prototype.
    pub prototype_path: &'static str,
    /// Methods an instance must expose, all of them.
    pub signature: &'static [&'static str],
    /// Zero-argument method returning the container element.
    pub container_method: &'static str,
    /// Internal fields that hold the container on some versions.
    pub internal_container_fields: &'static [&'static str],
    /// Event fired after the viewport settles.
    pub bounds_event: &'static str,
    /// Prototype methods wrapped as a safety net for missed instances.
    pub backdoor_methods: &'static [&'static str],
    /// Global path of an engine-maintained list of live instances.
    pub instance_registry_path: Option<&'static str>,
    /// Elements the engine creates inside or on its container.
    pub container_selectors: &'static [&'static str],
    /// Element properties pages commonly park an instance on.
    pub element_probe_props: &'static [&'static str],
    /// Method and argument returning the pane overlays should mount in.
    pub overlay_pane: Option<(&'static str, &'static str)>,
}

pub static PROFILES: [EngineProfile; 2] = [
    EngineProfile {
        kind: EngineKind::EngineA,
        constructor_path: "google.maps.Map",
        prototype_path: "google.maps.Map.prototype",
        signature: &["getBounds", "getDiv"],
        container_method: "getDiv",
        internal_container_fields: &["__container", "_div"],
        bounds_event: "bounds_changed",
        backdoor_methods: &["setCenter", "setZoom", "fitBounds", "panTo", "setOptions"],
        instance_registry_path: None,
        container_selectors: &[".gm-style", "[data-map-engine=a]"],
        element_probe_props: &["__gm_map", "__map", "map", "mapInstance"],
        overlay_pane: None,
    },
    EngineProfile {
        kind: EngineKind::EngineB,
        constructor_path: "L.Map",
        prototype_path: "L.Map.prototype",
        signature: &["getBounds", "getContainer"],
        container_method: "getContainer",
        internal_container_fields: &["_container"],
        bounds_event: "moveend",
        backdoor_methods: &["setView", "setZoom", "fitBounds", "panTo", "invalidateSize"],
        instance_registry_path: Some("L.__instances"),
        container_selectors: &[".leaflet-container", "[data-map-engine=b]"],
        element_probe_props: &["_leaflet_map", "__map", "map", "mapInstance"],
        overlay_pane: Some(("getPane", "overlayPane")),
    },
];

/// Key prefixes a component framework uses to hang its internal state off
/// rendered elements.
pub const COMPONENT_TREE_PREFIXES: &[&str] = &["__reactFiber$", "__reactInternalInstance$"];

/// Classify an object by the methods it exposes.
pub fn probe(host: &dyn HostPage, object: ObjectRef) -> EngineKind {
    for profile in PROFILES.iter() {
        if profile
            .signature
            .iter()
            .all(|method| host.has_method(object, method))
        {
            return profile.kind;
        }
    }
    EngineKind::Unknown
}

/// Union of every engine's container selectors.
pub fn all_container_selectors() -> Vec<&'static str> {
    let mut selectors: Vec<&'static str> = Vec::new();
    for profile in PROFILES.iter() {
        for selector in profile.container_selectors {
            if !selectors.contains(selector) {
                selectors.push(selector);
            }
        }
    }
    selectors
}

/// Union of every engine's element probe properties.
pub fn all_probe_props() -> Vec<&'static str> {
    let mut props: Vec<&'static str> = Vec::new();
    for profile in PROFILES.iter() {
        for prop in profile.element_probe_props {
            if !props.contains(prop) {
                props.push(prop);
            }
        }
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Bounds;
    use crate::host::sim::SimPage;

    #[test]
    fn test_profiles_cover_known_kinds() {
        assert!(EngineKind::EngineA.profile().is_some());
        assert!(EngineKind::EngineB.profile().is_some());
        assert!(EngineKind::Unknown.profile().is_none());
    }

    #[test]
    fn test_probe_by_signature() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        page.load_engine(EngineKind::EngineB);
        let body = page.body();
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();

        let a_div = page.create_container(body, 400.0, 300.0);
        let a = page.construct_map(EngineKind::EngineA, a_div, bounds, 10.0).unwrap();
        let b_div = page.create_container(body, 400.0, 300.0);
        let b = page.construct_map(EngineKind::EngineB, b_div, bounds, 10.0).unwrap();
        let plain = page.new_object(vec![]);

        assert_eq!(probe(&page, a), EngineKind::EngineA);
        assert_eq!(probe(&page, b), EngineKind::EngineB);
        assert_eq!(probe(&page, plain), EngineKind::Unknown);
    }

    #[test]
    fn test_selector_union_is_deduplicated() {
        let props = all_probe_props();
        assert_eq!(props.iter().filter(|p| **p == "__map").count(), 1);
        assert!(all_container_selectors().contains(&".leaflet-container"));
    }
}
