//! JSON page fixtures for the simulated host.
//!
//! A fixture describes the page as it looks when the bridge is injected
//! (element tree, frames, engines already loaded, maps already built) and a
//! list of timed script actions the driver replays against it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ComponentSlot, SimPage};
use crate::engine::EngineKind;
use crate::error::{BridgeError, Result};
use crate::geo::Bounds;
use crate::host::{HostValue, NodeRef, PointerKind};

fn default_tag() -> String {
    "div".to_string()
}

fn default_true() -> bool {
    true
}

fn default_zoom() -> f64 {
    12.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFixture {
    pub url: String,
    /// The page itself is embedded in a frame the bridge cannot see past.
    #[serde(default)]
    pub nested: bool,
    #[serde(default = "default_true")]
    pub surfaces: bool,
    /// Engines loaded before injection.
    #[serde(default)]
    pub engines: Vec<EngineKind>,
    /// Children of the top document body.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub actions: Vec<TimedAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Client width and height.
    #[serde(default)]
    pub size: Option<(f64, f64)>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    /// Content of an attached shadow root.
    #[serde(default)]
    pub shadow: Option<Vec<NodeSpec>>,
    /// Turns this node into an `iframe` holding another document.
    #[serde(default)]
    pub frame: Option<FrameSpec>,
    /// A map built on this node before injection.
    #[serde(default)]
    pub map: Option<MapSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSpec {
    pub url: String,
    #[serde(default)]
    pub cross_origin: bool,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSpec {
    pub engine: EngineKind,
    pub bounds: Bounds,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub attach: MapAttach,
}

/// How a pre-existing map can be reached from the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapAttach {
    /// Only through the engine's own container markup or instance registry.
    #[default]
    None,
    /// Expando property on the container, or on an ancestor `levels` up.
    Property {
        name: String,
        #[serde(default)]
        levels: usize,
    },
    /// Component-tree state on the container.
    Component { hops: usize, slot: ComponentSlot },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedAction {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: ScriptAction,
}

/// Page-side script steps. Nodes are addressed by element id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptAction {
    LoadEngine {
        engine: EngineKind,
    },
    AddNode {
        parent: String,
        node: NodeSpec,
    },
    CreateMap {
        container: String,
        engine: EngineKind,
        bounds: Bounds,
        #[serde(default = "default_zoom")]
        zoom: f64,
    },
    PanTo {
        container: String,
        lat: f64,
        lng: f64,
    },
    FitBounds {
        container: String,
        bounds: Bounds,
    },
    SetZoom {
        container: String,
        zoom: f64,
    },
    Detach {
        node: String,
    },
    Move {
        node: String,
        parent: String,
    },
    Pointer {
        container: String,
        kind: PointerKind,
        x: f64,
        y: f64,
    },
}

impl PageFixture {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| BridgeError::io_with_path(e, path))?;
        Self::from_json_str(&text)
    }

    /// Build the page as it stands at injection time.
    pub fn build(&self) -> Result<SimPage> {
        let page = SimPage::new(&self.url);
        page.set_nested(self.nested);
        page.set_surfaces_supported(self.surfaces);
        for engine in &self.engines {
            page.load_engine(*engine);
        }
        let body = page.body();
        for spec in &self.nodes {
            build_node(&page, body, spec)?;
        }
        Ok(page)
    }

    /// Actions ordered by time; equal times keep file order.
    pub fn timeline(&self) -> Vec<TimedAction> {
        let mut actions = self.actions.clone();
        actions.sort_by_key(|a| a.at_ms);
        actions
    }
}

fn build_node(page: &SimPage, parent: NodeRef, spec: &NodeSpec) -> Result<NodeRef> {
    if let Some(frame) = &spec.frame {
        let Some(frame_ref) = page.add_frame(parent, &frame.url, frame.cross_origin) else {
            return Err(BridgeError::Config {
                message: format!("cannot embed frame {}", frame.url),
            });
        };
        let element = page
            .children(parent)
            .last()
            .copied()
            .ok_or_else(|| BridgeError::Other("frame element missing".to_string()))?;
        apply_identity(page, element, spec);
        if let Some(body) = page.frame_body(frame_ref) {
            for child in &frame.nodes {
                build_node(page, body, child)?;
            }
        }
        return Ok(element);
    }

    let node = page.create_element_in(parent, &spec.tag);
    apply_identity(page, node, spec);
    if let Some((w, h)) = spec.size {
        page.set_size(node, w, h);
    }
    for child in &spec.children {
        build_node(page, node, child)?;
    }
    if let Some(shadow) = &spec.shadow {
        if let Some(root) = page.attach_shadow(node) {
            for child in shadow {
                build_node(page, root, child)?;
            }
        }
    }
    if let Some(map) = &spec.map {
        build_map(page, node, map)?;
    }
    Ok(node)
}

fn apply_identity(page: &SimPage, node: NodeRef, spec: &NodeSpec) {
    if let Some(id) = &spec.id {
        page.set_attr(node, "id", id);
    }
    for class in &spec.classes {
        page.add_class(node, class);
    }
    for (name, value) in &spec.attrs {
        page.set_attr(node, name, value);
    }
}

fn build_map(page: &SimPage, container: NodeRef, spec: &MapSpec) -> Result<()> {
    page.load_engine(spec.engine);
    let map = page.construct_map(spec.engine, container, spec.bounds, spec.zoom)?;
    match &spec.attach {
        MapAttach::None => {}
        MapAttach::Property { name, levels } => {
            let mut target = container;
            for _ in 0..*levels {
                match crate::host::HostPage::parent(page, target) {
                    Some(parent) => target = parent,
                    None => break,
                }
            }
            page.set_node_prop(target, name, HostValue::Object(map));
        }
        MapAttach::Component { hops, slot } => {
            page.attach_component_tree(container, map, *hops, *slot);
        }
    }
    Ok(())
}

fn node_by_id(page: &SimPage, id: &str) -> Result<NodeRef> {
    page.find_by_id(id).ok_or_else(|| BridgeError::Config {
        message: format!("no element with id '{}'", id),
    })
}

fn map_on(page: &SimPage, container: &str) -> Result<crate::host::ObjectRef> {
    let node = node_by_id(page, container)?;
    page.map_for_container(node)
        .ok_or_else(|| BridgeError::Config {
            message: format!("no map built on '{}'", container),
        })
}

impl ScriptAction {
    pub fn apply(&self, page: &SimPage) -> Result<()> {
        match self {
            ScriptAction::LoadEngine { engine } => page.load_engine(*engine),
            ScriptAction::AddNode { parent, node } => {
                let parent = node_by_id(page, parent)?;
                build_node(page, parent, node)?;
            }
            ScriptAction::CreateMap {
                container,
                engine,
                bounds,
                zoom,
            } => {
                let node = node_by_id(page, container)?;
                page.construct_map(*engine, node, *bounds, *zoom)?;
            }
            ScriptAction::PanTo {
                container,
                lat,
                lng,
            } => page.pan_to(map_on(page, container)?, *lat, *lng)?,
            ScriptAction::FitBounds { container, bounds } => {
                page.fit_bounds(map_on(page, container)?, *bounds)?
            }
            ScriptAction::SetZoom { container, zoom } => {
                page.set_zoom(map_on(page, container)?, *zoom)?
            }
            ScriptAction::Detach { node } => page.detach(node_by_id(page, node)?),
            ScriptAction::Move { node, parent } => {
                page.move_node(node_by_id(page, node)?, node_by_id(page, parent)?)
            }
            ScriptAction::Pointer {
                container,
                kind,
                x,
                y,
            } => {
                let root = node_by_id(page, container)?;
                let surface = page
                    .surfaces_under(root)
                    .into_iter()
                    .next()
                    .ok_or_else(|| BridgeError::Config {
                        message: format!("no overlay surface under '{}'", container),
                    })?;
                page.dispatch_pointer(surface, *kind, *x, *y);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostPage;

    const PAGE: &str = r#"{
        "url": "https://shop.example/stores",
        "engines": ["EngineA"],
        "nodes": [
            {"id": "a", "size": [640, 480],
             "map": {"engine": "EngineA", "bounds": {"north": 1, "south": 0, "east": 1, "west": 0}}},
            {"tag": "store-widget", "shadow": [
                {"id": "b", "size": [300, 200],
                 "map": {"engine": "EngineB", "bounds": {"north": 2, "south": 1, "east": 2, "west": 1},
                         "attach": {"kind": "property", "name": "__map"}}}
            ]},
            {"frame": {"url": "https://ads.example/", "cross_origin": true}}
        ],
        "actions": [
            {"at_ms": 900, "action": "detach", "node": "a"},
            {"at_ms": 100, "action": "pan_to", "container": "a", "lat": 0.2, "lng": 0.3}
        ]
    }"#;

    #[test]
    fn test_build_fixture() {
        let fixture = PageFixture::from_json_str(PAGE).unwrap();
        let page = fixture.build().unwrap();

        let a = page.find_by_id("a").unwrap();
        let b = page.find_by_id("b").unwrap();
        assert!(page.map_for_container(a).is_some());
        assert!(page.is_connected(b));
        assert!(page.query_all(page.document_root(), "#b").is_empty());
        assert!(matches!(
            page.get(&HostValue::Node(b), "__map").unwrap(),
            HostValue::Object(_)
        ));
        assert_eq!(page.query_all(page.document_root(), "iframe").len(), 1);
    }

    #[test]
    fn test_timeline_sorted_and_applied() {
        let fixture = PageFixture::from_json_str(PAGE).unwrap();
        let page = fixture.build().unwrap();
        let timeline = fixture.timeline();
        assert_eq!(timeline[0].at_ms, 100);

        for step in &timeline {
            step.action.apply(&page).unwrap();
        }
        let a = page.find_by_id("a").unwrap();
        assert!(!page.is_connected(a));
    }

    #[test]
    fn test_unknown_node_is_config_error() {
        let fixture = PageFixture::from_json_str(PAGE).unwrap();
        let page = fixture.build().unwrap();
        let err = ScriptAction::Detach {
            node: "missing".to_string(),
        }
        .apply(&page)
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }
}
