//! In-memory page used by the tests and the CLI driver.
//!
//! `SimPage` models the parts of a browser page the bridge relies on: a
//! global namespace with live bindings, an object heap with prototypes and
//! two engine implementations, an element tree with frames and shadow roots,
//! and drawing surfaces that record what was painted on them.
//!
//! Page-side script operations (loading an engine, constructing maps,
//! panning, moving nodes around) are inherent methods. Hooks installed by
//! the bridge are always invoked after the internal borrow is released.

mod dom;
pub mod fixture;
mod heap;
mod selector;

pub use fixture::{MapAttach, PageFixture, ScriptAction, TimedAction};

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use tracing::debug;

use self::dom::Dom;
use self::heap::{recentre, rezoom, Heap, ObjectKind, SimMap, SimObject, ENGINE_A_METHODS, ENGINE_B_METHODS};
use crate::config::RenderConfig;
use crate::engine::EngineKind;
use crate::geo::Bounds;
use crate::host::{
    BindingState, ConstructHook, DrawCommand, FrameRef, HostError, HostPage, HostValue,
    ListenerHook, MethodHook, NodeRef, ObjectRef, PointerEvent, PointerHook, PointerKind,
};

/// Where a component-tree node keeps a reference to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentSlot {
    /// In the props of an ancestor component.
    Prop,
    /// In a ref hook (`memoizedState -> {current}`) of an ancestor component.
    Ref,
}

struct PageState {
    dom: Dom,
    heap: Heap,
    window: ObjectRef,
    traps: BTreeMap<String, ConstructHook>,
}

impl PageState {
    fn resolve(&self, path: &str) -> HostValue {
        let mut current = HostValue::Object(self.window);
        for segment in path.split('.') {
            let Some(obj) = current.as_object() else {
                return HostValue::Undefined;
            };
            current = match self.heap.get(obj) {
                Ok(o) => o.props.get(segment).cloned().unwrap_or_default(),
                Err(_) => return HostValue::Undefined,
            };
        }
        current
    }

    /// Object at `path`, creating empty namespace objects along the way.
    fn ensure_namespace(&mut self, path: &str) -> ObjectRef {
        let mut current = self.window;
        for segment in path.split('.') {
            let existing = self
                .heap
                .get(current)
                .ok()
                .and_then(|o| o.props.get(segment))
                .and_then(|v| v.as_object());
            current = match existing {
                Some(obj) => obj,
                None => {
                    let created = self.heap.plain(Vec::new());
                    if let Ok(parent) = self.heap.get_mut(current) {
                        parent
                            .props
                            .insert(segment.to_string(), HostValue::Object(created));
                    }
                    created
                }
            };
        }
        current
    }

    fn bind(&mut self, path: &str, value: HostValue) {
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => (self.ensure_namespace(parent), name),
            None => (self.window, path),
        };
        if let Ok(obj) = self.heap.get_mut(parent) {
            obj.props.insert(name.to_string(), value);
        }
    }

    fn map(&self, object: ObjectRef) -> Option<&SimMap> {
        match &self.heap.get(object).ok()?.kind {
            ObjectKind::Map(map) => Some(map),
            _ => None,
        }
    }

    fn map_mut(&mut self, object: ObjectRef) -> Option<&mut SimMap> {
        match &mut self.heap.get_mut(object).ok()?.kind {
            ObjectKind::Map(map) => Some(map),
            _ => None,
        }
    }

    fn check_node(&self, node: NodeRef) -> Result<(), HostError> {
        self.dom.node(node).map(|_| ())
    }
}

/// Result of dispatching a method: the return value plus the event it
/// fired, if any.
struct Dispatch {
    value: HostValue,
    fired: Option<(ObjectRef, &'static str)>,
}

impl Dispatch {
    fn value(value: HostValue) -> Self {
        Self { value, fired: None }
    }
}

pub struct SimPage {
    state: RefCell<PageState>,
    surfaces_supported: Cell<bool>,
    context: Cell<FrameRef>,
    nested: Cell<bool>,
}

impl SimPage {
    /// Empty top-level page at `url`.
    pub fn new(url: &str) -> Self {
        let dom = Dom::new(url);
        let top = dom.top();
        let mut heap = Heap::default();
        let window = heap.plain(Vec::new());
        Self {
            state: RefCell::new(PageState {
                dom,
                heap,
                window,
                traps: BTreeMap::new(),
            }),
            surfaces_supported: Cell::new(true),
            context: Cell::new(top),
            nested: Cell::new(false),
        }
    }

    // ---- frames and contexts ----

    pub fn top_frame(&self) -> FrameRef {
        self.state.borrow().dom.top()
    }

    /// Body of the top document.
    pub fn body(&self) -> NodeRef {
        let state = self.state.borrow();
        let top = state.dom.top();
        state
            .dom
            .frame(top)
            .map(|f| f.body)
            .unwrap_or(NodeRef(0))
    }

    pub fn frame_body(&self, frame: FrameRef) -> Option<NodeRef> {
        self.state.borrow().dom.frame(frame).ok().map(|f| f.body)
    }

    /// Append an `iframe` to `parent` holding a fresh document at `url`.
    pub fn add_frame(&self, parent: NodeRef, url: &str, cross_origin: bool) -> Option<FrameRef> {
        let mut state = self.state.borrow_mut();
        if !state.dom.exists(parent) {
            return None;
        }
        let element = state.dom.create("iframe");
        state.dom.node_mut(element).attrs.insert("src".to_string(), url.to_string());
        state.dom.append(parent, element);
        Some(state.dom.new_frame(url, cross_origin, Some(element)))
    }

    /// Run the bridge inside `frame` instead of the top document.
    pub fn set_bridge_context(&self, frame: FrameRef) {
        self.context.set(frame);
    }

    /// Mark the whole page as embedded in a frame the bridge cannot see.
    pub fn set_nested(&self, nested: bool) {
        self.nested.set(nested);
    }

    pub fn set_surfaces_supported(&self, supported: bool) {
        self.surfaces_supported.set(supported);
    }

    // ---- element tree ----

    pub fn create_element_in(&self, parent: NodeRef, tag: &str) -> NodeRef {
        let mut state = self.state.borrow_mut();
        let node = state.dom.create(tag);
        if state.dom.exists(parent) {
            state.dom.append(parent, node);
        }
        node
    }

    /// A sized `div` appended to `parent`.
    pub fn create_container(&self, parent: NodeRef, width: f64, height: f64) -> NodeRef {
        let node = self.create_element_in(parent, "div");
        self.set_size(node, width, height);
        node
    }

    pub fn set_size(&self, node: NodeRef, width: f64, height: f64) {
        let mut state = self.state.borrow_mut();
        if state.dom.exists(node) {
            state.dom.node_mut(node).size = (width, height);
        }
    }

    pub fn set_attr(&self, node: NodeRef, name: &str, value: &str) {
        let mut state = self.state.borrow_mut();
        if !state.dom.exists(node) {
            return;
        }
        let n = state.dom.node_mut(node);
        match name {
            "id" => n.id = Some(value.to_string()),
            "class" => n.classes = value.split_whitespace().map(String::from).collect(),
            _ => {
                n.attrs.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn add_class(&self, node: NodeRef, class: &str) {
        let mut state = self.state.borrow_mut();
        if !state.dom.exists(node) {
            return;
        }
        let n = state.dom.node_mut(node);
        if !n.classes.iter().any(|c| c == class) {
            n.classes.push(class.to_string());
        }
    }

    /// Expando property on an element, as page scripts set them.
    pub fn set_node_prop(&self, node: NodeRef, key: &str, value: HostValue) {
        let mut state = self.state.borrow_mut();
        if state.dom.exists(node) {
            state.dom.node_mut(node).props.insert(key.to_string(), value);
        }
    }

    pub fn attach_shadow(&self, host: NodeRef) -> Option<NodeRef> {
        let mut state = self.state.borrow_mut();
        if !state.dom.exists(host) {
            return None;
        }
        Some(state.dom.attach_shadow(host))
    }

    pub fn move_node(&self, node: NodeRef, new_parent: NodeRef) {
        let mut state = self.state.borrow_mut();
        if state.dom.exists(node) && state.dom.exists(new_parent) {
            state.dom.append(new_parent, node);
        }
    }

    pub fn detach(&self, node: NodeRef) {
        let mut state = self.state.borrow_mut();
        if state.dom.exists(node) {
            state.dom.detach(node);
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        self.state.borrow().dom.find_by_id(id)
    }

    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.state
            .borrow()
            .dom
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn style(&self, node: NodeRef, property: &str) -> Option<String> {
        self.state
            .borrow()
            .dom
            .node(node)
            .ok()
            .and_then(|n| n.styles.get(property).cloned())
    }

    /// Last draw list painted onto `surface`.
    pub fn painted(&self, surface: NodeRef) -> Vec<DrawCommand> {
        self.state
            .borrow()
            .dom
            .node(surface)
            .map(|n| n.painted.clone())
            .unwrap_or_default()
    }

    /// Overlay surfaces mounted anywhere below `root`.
    pub fn surfaces_under(&self, root: NodeRef) -> Vec<NodeRef> {
        let selector = format!("[{}]", RenderConfig::SURFACE_MARKER_ATTR);
        self.state.borrow().dom.query_all(root, &selector)
    }

    pub fn paint_count(&self, surface: NodeRef) -> u64 {
        self.state
            .borrow()
            .dom
            .node(surface)
            .map(|n| n.paint_count)
            .unwrap_or(0)
    }

    /// Deliver a pointer event to every listener on `surface`.
    pub fn dispatch_pointer(&self, surface: NodeRef, kind: PointerKind, x: f64, y: f64) {
        let listeners = {
            let state = self.state.borrow();
            match state.dom.node(surface) {
                Ok(n) => n.pointer_listeners.clone(),
                Err(_) => return,
            }
        };
        let event = PointerEvent {
            surface,
            kind,
            x,
            y,
        };
        for listener in listeners {
            listener(event);
        }
    }

    // ---- objects ----

    pub fn new_object(&self, props: Vec<(&str, HostValue)>) -> ObjectRef {
        self.state
            .borrow_mut()
            .heap
            .plain(props.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub fn add_method(&self, object: ObjectRef, name: &str) {
        if let Ok(obj) = self.state.borrow_mut().heap.get_mut(object) {
            obj.methods.insert(name.to_string());
        }
    }

    /// Canned return value for a method of a plain object.
    pub fn set_return(&self, object: ObjectRef, method: &str, value: HostValue) {
        if let Ok(obj) = self.state.borrow_mut().heap.get_mut(object) {
            obj.methods.insert(method.to_string());
            obj.returns.insert(method.to_string(), value);
        }
    }

    pub fn set_object_prop(&self, object: ObjectRef, key: &str, value: HostValue) {
        if let Ok(obj) = self.state.borrow_mut().heap.get_mut(object) {
            obj.props.insert(key.to_string(), value);
        }
    }

    /// Make every method call on `object` throw.
    pub fn poison(&self, object: ObjectRef) {
        if let Ok(obj) = self.state.borrow_mut().heap.get_mut(object) {
            obj.poisoned = true;
        }
    }

    /// Make reading `key` on `object` throw.
    pub fn poison_prop(&self, object: ObjectRef, key: &str) {
        if let Ok(obj) = self.state.borrow_mut().heap.get_mut(object) {
            obj.throwing_props.insert(key.to_string());
        }
    }

    pub fn bounds_literal(&self, bounds: Bounds) -> HostValue {
        HostValue::Object(self.state.borrow_mut().heap.bounds_literal(bounds))
    }

    pub fn lat_lng(&self, lat: f64, lng: f64) -> HostValue {
        HostValue::Object(self.state.borrow_mut().heap.lat_lng(lat, lng, false))
    }

    /// Bind a value at a dotted global path.
    pub fn set_global(&self, path: &str, value: HostValue) {
        self.state.borrow_mut().bind(path, value);
    }

    // ---- engines and maps ----

    /// Define the engine's constructor and prototype on the global namespace.
    /// A trap waiting on the constructor path hooks it immediately.
    pub fn load_engine(&self, engine: EngineKind) {
        let Some(profile) = engine.profile() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if !state.resolve(profile.constructor_path).is_nullish() {
            return;
        }

        let methods = match engine {
            EngineKind::EngineA => ENGINE_A_METHODS,
            _ => ENGINE_B_METHODS,
        };
        let mut prototype = SimObject::new(ObjectKind::Prototype {
            interposers: Vec::new(),
        });
        prototype
            .methods
            .extend(methods.iter().map(|m| m.to_string()));
        let prototype = state.heap.alloc(prototype);

        let hook = state.traps.remove(profile.constructor_path);
        let mut constructor = SimObject::new(ObjectKind::Constructor {
            engine,
            prototype,
            hook,
        });
        constructor
            .props
            .insert("prototype".to_string(), HostValue::Object(prototype));
        let constructor = state.heap.alloc(constructor);
        state.bind(profile.constructor_path, HostValue::Object(constructor));

        if let Some(registry) = profile.instance_registry_path {
            state.bind(registry, HostValue::Array(Vec::new()));
        }
        debug!("Loaded {} at {}", engine, profile.constructor_path);
    }

    /// `new Map(container, ...)` as page code would run it.
    pub fn construct_map(
        &self,
        engine: EngineKind,
        container: NodeRef,
        bounds: Bounds,
        zoom: f64,
    ) -> Result<ObjectRef, HostError> {
        let profile = engine
            .profile()
            .ok_or_else(|| HostError::NotCallable(engine.to_string()))?;

        let (map, hook) = {
            let mut state = self.state.borrow_mut();
            state.check_node(container)?;
            let ctor = state
                .resolve(profile.constructor_path)
                .as_object()
                .ok_or_else(|| HostError::NotCallable(profile.constructor_path.to_string()))?;
            let (prototype, hook) = match &state.heap.get(ctor)?.kind {
                ObjectKind::Constructor {
                    prototype, hook, ..
                } => (*prototype, hook.clone()),
                _ => return Err(HostError::NotCallable(profile.constructor_path.to_string())),
            };

            let overlay_pane = match engine {
                EngineKind::EngineB => {
                    let n = state.dom.node_mut(container);
                    if !n.classes.iter().any(|c| c == "leaflet-container") {
                        n.classes.push("leaflet-container".to_string());
                    }
                    let pane = state.dom.create("div");
                    state.dom.node_mut(pane).classes =
                        vec!["leaflet-pane".to_string(), "leaflet-overlay-pane".to_string()];
                    state.dom.append(container, pane);
                    Some(pane)
                }
                _ => {
                    let inner = state.dom.create("div");
                    state.dom.node_mut(inner).classes = vec!["gm-style".to_string()];
                    state.dom.append(container, inner);
                    None
                }
            };

            let mut object = SimObject::new(ObjectKind::Map(SimMap {
                engine,
                bounds,
                zoom,
                container,
                overlay_pane,
                listeners: Vec::new(),
            }));
            object.prototype = Some(prototype);
            if engine == EngineKind::EngineB {
                object
                    .props
                    .insert("_container".to_string(), HostValue::Node(container));
            }
            let map = state.heap.alloc(object);

            if let Some(registry) = profile.instance_registry_path {
                if let HostValue::Array(mut list) = state.resolve(registry) {
                    list.push(HostValue::Object(map));
                    state.bind(registry, HostValue::Array(list));
                }
            }
            (map, hook)
        };

        if let Some(hook) = hook {
            hook(map, Some(container));
        }
        Ok(map)
    }

    /// Hang the map off a component-tree node on `element`, `hops` steps up
    /// the component parent chain. Returns the fiber attached to the element.
    pub fn attach_component_tree(
        &self,
        element: NodeRef,
        map: ObjectRef,
        hops: usize,
        slot: ComponentSlot,
    ) -> ObjectRef {
        let mut state = self.state.borrow_mut();
        let holder = match slot {
            ComponentSlot::Prop => {
                let props = state
                    .heap
                    .plain(vec![("map".to_string(), HostValue::Object(map))]);
                state
                    .heap
                    .plain(vec![("memoizedProps".to_string(), HostValue::Object(props))])
            }
            ComponentSlot::Ref => {
                let current = state
                    .heap
                    .plain(vec![("current".to_string(), HostValue::Object(map))]);
                let second = state.heap.plain(vec![
                    ("memoizedState".to_string(), HostValue::Object(current)),
                    ("next".to_string(), HostValue::Null),
                ]);
                let first = state.heap.plain(vec![
                    ("memoizedState".to_string(), HostValue::Null),
                    ("next".to_string(), HostValue::Object(second)),
                ]);
                state
                    .heap
                    .plain(vec![("memoizedState".to_string(), HostValue::Object(first))])
            }
        };

        let mut fiber = holder;
        for _ in 0..hops {
            let empty = state.heap.plain(Vec::new());
            fiber = state.heap.plain(vec![
                ("memoizedProps".to_string(), HostValue::Object(empty)),
                ("return".to_string(), HostValue::Object(fiber)),
            ]);
        }
        if state.dom.exists(element) {
            state
                .dom
                .node_mut(element)
                .props
                .insert("__reactFiber$sim".to_string(), HostValue::Object(fiber));
        }
        fiber
    }

    /// Call a method the way page code does, through any interposed hooks.
    pub fn invoke(
        &self,
        object: ObjectRef,
        method: &str,
        args: &[HostValue],
    ) -> Result<HostValue, HostError> {
        self.call(object, method, args)
    }

    pub fn pan_to(&self, map: ObjectRef, lat: f64, lng: f64) -> Result<(), HostError> {
        let target = self.lat_lng(lat, lng);
        self.invoke(map, "panTo", &[target]).map(|_| ())
    }

    pub fn fit_bounds(&self, map: ObjectRef, bounds: Bounds) -> Result<(), HostError> {
        let target = self.bounds_literal(bounds);
        self.invoke(map, "fitBounds", &[target]).map(|_| ())
    }

    pub fn set_zoom(&self, map: ObjectRef, zoom: f64) -> Result<(), HostError> {
        self.invoke(map, "setZoom", &[HostValue::Number(zoom)])
            .map(|_| ())
    }

    pub fn map_bounds(&self, map: ObjectRef) -> Option<Bounds> {
        self.state.borrow().map(map).map(|m| m.bounds)
    }

    /// Map whose container is `container`, if one was constructed on it.
    pub fn map_for_container(&self, container: NodeRef) -> Option<ObjectRef> {
        let state = self.state.borrow();
        (0..)
            .map(ObjectRef)
            .map_while(|obj| state.heap.get(obj).ok().map(|o| (obj, o)))
            .find_map(|(obj, o)| match &o.kind {
                ObjectKind::Map(m) if m.container == container => Some(obj),
                _ => None,
            })
    }

    fn dispatch(
        state: &mut PageState,
        object: ObjectRef,
        method: &str,
        args: &[HostValue],
    ) -> Result<Dispatch, HostError> {
        let kind_tag = match &state.heap.get(object)?.kind {
            ObjectKind::Map(_) => 0,
            ObjectKind::LatLng { .. } => 1,
            ObjectKind::CornerBounds(_) => 2,
            ObjectKind::EdgeBounds(_) => 3,
            _ => 4,
        };
        match kind_tag {
            0 => Self::dispatch_map(state, object, method, args),
            1 => {
                let Some((lat, lng)) = state.heap.lat_lng_from_value(&HostValue::Object(object))
                else {
                    return Ok(Dispatch::value(HostValue::Undefined));
                };
                Ok(Dispatch::value(match method {
                    "lat" => HostValue::Number(lat),
                    "lng" => HostValue::Number(lng),
                    _ => HostValue::Undefined,
                }))
            }
            2 | 3 => {
                let Some(b) = state.heap.bounds_from_value(&HostValue::Object(object)) else {
                    return Ok(Dispatch::value(HostValue::Undefined));
                };
                let value = match method {
                    "getNorthEast" => HostValue::Object(state.heap.lat_lng(b.north, b.east, true)),
                    "getSouthWest" => HostValue::Object(state.heap.lat_lng(b.south, b.west, true)),
                    "toJSON" => HostValue::Object(state.heap.bounds_literal(b)),
                    "getNorth" => HostValue::Number(b.north),
                    "getSouth" => HostValue::Number(b.south),
                    "getEast" => HostValue::Number(b.east),
                    "getWest" => HostValue::Number(b.west),
                    _ => HostValue::Undefined,
                };
                Ok(Dispatch::value(value))
            }
            _ => {
                let obj = state.heap.get(object)?;
                Ok(Dispatch::value(
                    obj.returns.get(method).cloned().unwrap_or_default(),
                ))
            }
        }
    }

    fn dispatch_map(
        state: &mut PageState,
        object: ObjectRef,
        method: &str,
        args: &[HostValue],
    ) -> Result<Dispatch, HostError> {
        let threw = |message: &str| HostError::Threw {
            method: method.to_string(),
            message: message.to_string(),
        };
        let (engine, bounds, zoom, container, pane) = match state.map(object) {
            Some(m) => (m.engine, m.bounds, m.zoom, m.container, m.overlay_pane),
            None => return Err(threw("not a map")),
        };
        let event = engine.profile().map(|p| p.bounds_event).unwrap_or("");

        let value = match method {
            "getBounds" => HostValue::Object(state.heap.bounds_object(engine, bounds)),
            "getDiv" | "getContainer" => HostValue::Node(container),
            "getZoom" => HostValue::Number(zoom),
            "getCenter" => {
                let lat = (bounds.north + bounds.south) / 2.0;
                let lng = bounds.west + bounds.lng_span() / 2.0;
                HostValue::Object(
                    state
                        .heap
                        .lat_lng(lat, lng, engine == EngineKind::EngineA),
                )
            }
            "getPane" => match (args.first().and_then(|a| a.as_str()), pane) {
                (Some("overlayPane"), Some(pane)) => HostValue::Node(pane),
                _ => HostValue::Undefined,
            },
            "setCenter" | "panTo" => {
                let (lat, lng) = args
                    .first()
                    .and_then(|a| state.heap.lat_lng_from_value(a))
                    .ok_or_else(|| threw("expected a lat/lng"))?;
                Self::move_map(state, object, recentre(bounds, lat, lng), zoom);
                return Ok(Dispatch {
                    value: HostValue::Undefined,
                    fired: Some((object, event)),
                });
            }
            "setZoom" => {
                let next = args
                    .first()
                    .and_then(|a| a.as_f64())
                    .ok_or_else(|| threw("expected a zoom level"))?;
                Self::move_map(state, object, rezoom(bounds, zoom, next), next);
                return Ok(Dispatch {
                    value: HostValue::Undefined,
                    fired: Some((object, event)),
                });
            }
            "fitBounds" => {
                let next = args
                    .first()
                    .and_then(|a| state.heap.bounds_from_value(a))
                    .ok_or_else(|| threw("expected bounds"))?;
                Self::move_map(state, object, next, zoom);
                return Ok(Dispatch {
                    value: HostValue::Undefined,
                    fired: Some((object, event)),
                });
            }
            "setView" => {
                let (lat, lng) = args
                    .first()
                    .and_then(|a| state.heap.lat_lng_from_value(a))
                    .ok_or_else(|| threw("expected a lat/lng"))?;
                let next_zoom = args.get(1).and_then(|a| a.as_f64()).unwrap_or(zoom);
                let moved = rezoom(recentre(bounds, lat, lng), zoom, next_zoom);
                Self::move_map(state, object, moved, next_zoom);
                return Ok(Dispatch {
                    value: HostValue::Undefined,
                    fired: Some((object, event)),
                });
            }
            _ => HostValue::Undefined,
        };
        Ok(Dispatch::value(value))
    }

    fn move_map(state: &mut PageState, object: ObjectRef, bounds: Bounds, zoom: f64) {
        if let Some(map) = state.map_mut(object) {
            map.bounds = bounds;
            map.zoom = zoom;
        }
    }
}

impl HostPage for SimPage {
    fn global(&self, path: &str) -> HostValue {
        self.state.borrow().resolve(path)
    }

    fn binding_state(&self, path: &str) -> BindingState {
        let state = self.state.borrow();
        let value = state.resolve(path);
        if let Some(obj) = value.as_object() {
            let hooked = matches!(
                state.heap.get(obj).map(|o| &o.kind),
                Ok(ObjectKind::Constructor { hook: Some(_), .. })
            );
            return BindingState::Present { hooked };
        }
        if !value.is_nullish() {
            return BindingState::Present { hooked: false };
        }
        if state.traps.contains_key(path) {
            BindingState::Trapped
        } else {
            BindingState::Absent
        }
    }

    fn wrap_constructor(&self, path: &str, hook: ConstructHook) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        let ctor = state
            .resolve(path)
            .as_object()
            .ok_or_else(|| HostError::NotCallable(path.to_string()))?;
        match &mut state.heap.get_mut(ctor)?.kind {
            ObjectKind::Constructor { hook: slot, .. } => {
                if slot.is_none() {
                    *slot = Some(hook);
                }
                Ok(())
            }
            _ => Err(HostError::NotCallable(path.to_string())),
        }
    }

    fn trap_binding(&self, path: &str, hook: ConstructHook) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if !state.resolve(path).is_nullish() {
            return Err(HostError::Threw {
                method: "defineProperty".to_string(),
                message: format!("{} is already bound", path),
            });
        }
        state.traps.insert(path.to_string(), hook);
        Ok(())
    }

    fn interpose_methods(
        &self,
        prototype_path: &str,
        methods: &[&str],
        hook: MethodHook,
    ) -> Result<bool, HostError> {
        let mut state = self.state.borrow_mut();
        let Some(proto) = state.resolve(prototype_path).as_object() else {
            return Ok(false);
        };
        match &mut state.heap.get_mut(proto)?.kind {
            ObjectKind::Prototype { interposers } => {
                interposers.push((methods.iter().map(|m| m.to_string()).collect(), hook));
                Ok(true)
            }
            _ => Err(HostError::Unsupported(format!(
                "{} is not a prototype",
                prototype_path
            ))),
        }
    }

    fn add_listener(
        &self,
        object: ObjectRef,
        event: &str,
        listener: ListenerHook,
    ) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if state.heap.get(object)?.poisoned {
            return Err(HostError::Threw {
                method: "addListener".to_string(),
                message: "instance is broken".to_string(),
            });
        }
        match state.map_mut(object) {
            Some(map) => {
                map.listeners.push((event.to_string(), listener));
                Ok(())
            }
            None => Err(HostError::NotCallable("addListener".to_string())),
        }
    }

    fn get(&self, target: &HostValue, key: &str) -> Result<HostValue, HostError> {
        let state = self.state.borrow();
        match target {
            HostValue::Object(obj) => {
                let o = state.heap.get(*obj)?;
                if o.throwing_props.contains(key) {
                    return Err(HostError::Threw {
                        method: format!("get {}", key),
                        message: "getter threw".to_string(),
                    });
                }
                Ok(o.props.get(key).cloned().unwrap_or_default())
            }
            HostValue::Node(node) => {
                let n = state.dom.node(*node)?;
                if state.dom.is_cross_origin(*node) {
                    return Err(HostError::AccessDenied(format!("{} of {}", key, node)));
                }
                Ok(n.props.get(key).cloned().unwrap_or_default())
            }
            HostValue::Array(items) => {
                if key == "length" {
                    return Ok(HostValue::Number(items.len() as f64));
                }
                Ok(key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default())
            }
            _ => Ok(HostValue::Undefined),
        }
    }

    fn keys(&self, target: &HostValue) -> Result<Vec<String>, HostError> {
        let state = self.state.borrow();
        match target {
            HostValue::Object(obj) => Ok(state.heap.get(*obj)?.props.keys().cloned().collect()),
            HostValue::Node(node) => {
                let n = state.dom.node(*node)?;
                if state.dom.is_cross_origin(*node) {
                    return Err(HostError::AccessDenied(format!("keys of {}", node)));
                }
                Ok(n.props.keys().cloned().collect())
            }
            HostValue::Array(items) => Ok((0..items.len()).map(|i| i.to_string()).collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn has_method(&self, object: ObjectRef, name: &str) -> bool {
        self.state.borrow().heap.has_method(object, name)
    }

    fn call(
        &self,
        object: ObjectRef,
        method: &str,
        args: &[HostValue],
    ) -> Result<HostValue, HostError> {
        let interposers = {
            let state = self.state.borrow();
            let obj = state.heap.get(object)?;
            if obj.poisoned {
                return Err(HostError::Threw {
                    method: method.to_string(),
                    message: "instance is broken".to_string(),
                });
            }
            if !state.heap.has_method(object, method) {
                return Err(HostError::NotCallable(method.to_string()));
            }
            state.heap.interposers_for(object, method)
        };
        for hook in interposers {
            hook(object, method);
        }

        let dispatch = {
            let mut state = self.state.borrow_mut();
            Self::dispatch(&mut state, object, method, args)?
        };

        if let Some((target, event)) = dispatch.fired {
            let listeners: Vec<ListenerHook> = {
                let state = self.state.borrow();
                state
                    .map(target)
                    .map(|m| {
                        m.listeners
                            .iter()
                            .filter(|(name, _)| name == event)
                            .map(|(_, l)| l.clone())
                            .collect()
                    })
                    .unwrap_or_default()
            };
            for listener in listeners {
                listener(target);
            }
        }
        Ok(dispatch.value)
    }

    fn document_root(&self) -> NodeRef {
        let state = self.state.borrow();
        state
            .dom
            .frame(self.context.get())
            .map(|f| f.document)
            .unwrap_or(NodeRef(0))
    }

    fn query_all(&self, scope: NodeRef, selector: &str) -> Vec<NodeRef> {
        self.state.borrow().dom.query_all(scope, selector)
    }

    fn shadow_root(&self, node: NodeRef) -> Option<NodeRef> {
        self.state.borrow().dom.node(node).ok()?.shadow_root
    }

    fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.state.borrow().dom.node(node).ok()?.parent
    }

    fn tag_name(&self, node: NodeRef) -> Option<String> {
        self.state
            .borrow()
            .dom
            .node(node)
            .ok()
            .map(|n| n.tag.clone())
    }

    fn attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        use self::selector::Matchable;
        let state = self.state.borrow();
        let n = state.dom.node(node).ok()?;
        n.attr(name).map(String::from)
    }

    fn class_list(&self, node: NodeRef) -> Vec<String> {
        self.state
            .borrow()
            .dom
            .node(node)
            .map(|n| n.classes.clone())
            .unwrap_or_default()
    }

    fn is_connected(&self, node: NodeRef) -> bool {
        self.state.borrow().dom.is_connected(node)
    }

    fn node_frame(&self, node: NodeRef) -> Option<FrameRef> {
        self.state.borrow().dom.frame_of(node)
    }

    fn frame_location(&self, frame: FrameRef) -> Result<String, HostError> {
        let state = self.state.borrow();
        let f = state.dom.frame(frame)?;
        if f.cross_origin {
            return Err(HostError::AccessDenied(format!("location of {}", frame)));
        }
        Ok(f.url.clone())
    }

    fn top_location(&self) -> Result<String, HostError> {
        if self.is_nested_context() {
            return Err(HostError::AccessDenied("top location".to_string()));
        }
        let state = self.state.borrow();
        let top = state.dom.top();
        Ok(state.dom.frame(top)?.url.clone())
    }

    fn is_nested_context(&self) -> bool {
        self.nested.get() || self.context.get() != self.state.borrow().dom.top()
    }

    fn client_size(&self, node: NodeRef) -> (f64, f64) {
        self.state
            .borrow()
            .dom
            .node(node)
            .map(|n| n.size)
            .unwrap_or((0.0, 0.0))
    }

    fn supports_surface(&self) -> bool {
        self.surfaces_supported.get()
    }

    fn create_element(&self, tag: &str) -> Result<NodeRef, HostError> {
        if tag.eq_ignore_ascii_case("canvas") && !self.surfaces_supported.get() {
            return Err(HostError::Unsupported(tag.to_string()));
        }
        Ok(self.state.borrow_mut().dom.create(tag))
    }

    fn append_child(&self, parent: NodeRef, child: NodeRef) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.check_node(parent)?;
        state.check_node(child)?;
        state.dom.append(parent, child);
        Ok(())
    }

    fn remove_node(&self, node: NodeRef) {
        self.detach(node);
    }

    fn set_style(&self, node: NodeRef, property: &str, value: &str) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.check_node(node)?;
        state
            .dom
            .node_mut(node)
            .styles
            .insert(property.to_string(), value.to_string());
        Ok(())
    }

    fn set_attribute(&self, node: NodeRef, name: &str, value: &str) -> Result<(), HostError> {
        self.state.borrow().check_node(node)?;
        self.set_attr(node, name, value);
        Ok(())
    }

    fn paint(&self, surface: NodeRef, commands: &[DrawCommand]) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.check_node(surface)?;
        let n = state.dom.node_mut(surface);
        n.painted = commands.to_vec();
        n.paint_count += 1;
        Ok(())
    }

    fn add_pointer_listener(&self, surface: NodeRef, hook: PointerHook) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.check_node(surface)?;
        state.dom.node_mut(surface).pointer_listeners.push(hook);
        Ok(())
    }
}
