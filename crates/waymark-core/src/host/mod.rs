//! The page the bridge lives in.
//!
//! The bridge never touches a concrete runtime. Everything it needs from the
//! page (global bindings it can hook, an object graph it can probe, a
//! container tree it can walk, and a few drawing primitives) goes through
//! [`HostPage`]. Every call may fail: getters throw, frames deny cross-origin
//! reads, handles go stale.
//!
//! [`sim::SimPage`] is a complete in-memory implementation used by the tests
//! and the CLI driver.

pub mod sim;

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of an object in the host's heap. Equality is reference identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef(pub u64);

/// Identity of a node in the container tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef(pub u64);

/// Identity of a browsing context (top page or an embedded frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameRef(pub u64);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// A value read out of the host.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(ObjectRef),
    Node(NodeRef),
    Array(Vec<HostValue>),
}

impl HostValue {
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            HostValue::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            HostValue::Node(node) => Some(*node),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    /// True for values a graph walk can step into.
    pub fn is_traversable(&self) -> bool {
        matches!(
            self,
            HostValue::Object(_) | HostValue::Node(_) | HostValue::Array(_)
        )
    }
}

/// Failure of a single host access.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("{method} threw: {message}")]
    Threw { method: String, message: String },

    #[error("not callable: {0}")]
    NotCallable(String),

    #[error("stale {kind} handle {id}")]
    Stale { kind: &'static str, id: u64 },

    #[error("unsupported host primitive: {0}")]
    Unsupported(String),
}

/// State of a global constructor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Nothing is bound at the path and no trap is waiting for it.
    Absent,
    /// Nothing is bound yet but a trap will hook the first assignment.
    Trapped,
    /// A constructor is bound; `hooked` tells whether it is already wrapped.
    Present { hooked: bool },
}

/// Pointer interaction delivered to a surface listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    Click,
    Move,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub surface: NodeRef,
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
}

/// One instruction for a batched drawing surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    Clear {
        width: f64,
        height: f64,
    },
    Circle {
        x: f64,
        y: f64,
        radius: f64,
        fill: String,
        stroke: String,
        stroke_width: f64,
    },
    Image {
        x: f64,
        y: f64,
        size: f64,
        data: String,
    },
    Label {
        x: f64,
        y: f64,
        text: String,
    },
}

/// Called after a hooked constructor returns: the new instance and the
/// container argument it was given, if any.
pub type ConstructHook = Rc<dyn Fn(ObjectRef, Option<NodeRef>)>;

/// Called before an interposed prototype method runs.
pub type MethodHook = Rc<dyn Fn(ObjectRef, &str)>;

/// Called when an object emits the event it was subscribed for.
pub type ListenerHook = Rc<dyn Fn(ObjectRef)>;

/// Called for pointer events on a surface.
pub type PointerHook = Rc<dyn Fn(PointerEvent)>;

/// Everything the bridge needs from the page.
///
/// Methods take `&self`; implementations use interior mutability because
/// hooks installed through this trait fire from inside page operations.
pub trait HostPage {
    // ---- namespace and live bindings ----

    /// Resolve a dotted path against the global namespace.
    fn global(&self, path: &str) -> HostValue;

    fn binding_state(&self, path: &str) -> BindingState;

    /// Wrap the constructor bound at `path` so `hook` sees every instance.
    fn wrap_constructor(&self, path: &str, hook: ConstructHook) -> Result<(), HostError>;

    /// Arrange for a future assignment at `path` to be wrapped with `hook`
    /// before any caller can use it.
    fn trap_binding(&self, path: &str, hook: ConstructHook) -> Result<(), HostError>;

    /// Run `hook` before any of `methods` on the prototype at `prototype_path`.
    /// Returns `Ok(false)` if the prototype does not exist yet.
    fn interpose_methods(
        &self,
        prototype_path: &str,
        methods: &[&str],
        hook: MethodHook,
    ) -> Result<bool, HostError>;

    fn add_listener(
        &self,
        object: ObjectRef,
        event: &str,
        listener: ListenerHook,
    ) -> Result<(), HostError>;

    // ---- object graph ----

    /// Read `key` from an object, element or array.
    fn get(&self, target: &HostValue, key: &str) -> Result<HostValue, HostError>;

    /// Own enumerable keys of an object or element.
    fn keys(&self, target: &HostValue) -> Result<Vec<String>, HostError>;

    fn has_method(&self, object: ObjectRef, name: &str) -> bool;

    fn call(
        &self,
        object: ObjectRef,
        method: &str,
        args: &[HostValue],
    ) -> Result<HostValue, HostError>;

    // ---- container tree ----

    /// Document element of the context the bridge runs in.
    fn document_root(&self) -> NodeRef;

    /// Light-tree descendants of `scope` matching `selector`, in document order.
    fn query_all(&self, scope: NodeRef, selector: &str) -> Vec<NodeRef>;

    fn shadow_root(&self, node: NodeRef) -> Option<NodeRef>;

    fn parent(&self, node: NodeRef) -> Option<NodeRef>;

    fn tag_name(&self, node: NodeRef) -> Option<String>;

    fn attribute(&self, node: NodeRef, name: &str) -> Option<String>;

    fn class_list(&self, node: NodeRef) -> Vec<String>;

    /// True if the node is reachable from the top document root, crossing
    /// shadow boundaries and frame elements.
    fn is_connected(&self, node: NodeRef) -> bool;

    /// Frame whose document owns the node, if it is attached to one.
    fn node_frame(&self, node: NodeRef) -> Option<FrameRef>;

    /// Location URL of a frame. Cross-origin frames deny the read.
    fn frame_location(&self, frame: FrameRef) -> Result<String, HostError>;

    fn top_location(&self) -> Result<String, HostError>;

    /// True if the bridge runs inside an embedded frame.
    fn is_nested_context(&self) -> bool;

    /// Client width and height of an element in pixels.
    fn client_size(&self, node: NodeRef) -> (f64, f64);

    // ---- rendering primitives ----

    fn supports_surface(&self) -> bool;

    fn create_element(&self, tag: &str) -> Result<NodeRef, HostError>;

    fn append_child(&self, parent: NodeRef, child: NodeRef) -> Result<(), HostError>;

    fn remove_node(&self, node: NodeRef);

    fn set_style(&self, node: NodeRef, property: &str, value: &str) -> Result<(), HostError>;

    fn set_attribute(&self, node: NodeRef, name: &str, value: &str) -> Result<(), HostError>;

    /// Replace the content of a surface with `commands`.
    fn paint(&self, surface: NodeRef, commands: &[DrawCommand]) -> Result<(), HostError>;

    fn add_pointer_listener(&self, surface: NodeRef, hook: PointerHook) -> Result<(), HostError>;
}

/// Call a zero-argument method, treating `Undefined` as a failure.
pub fn call_for_value(
    host: &dyn HostPage,
    object: ObjectRef,
    method: &str,
) -> Result<HostValue, HostError> {
    let value = host.call(object, method, &[])?;
    if value.is_nullish() {
        return Err(HostError::Threw {
            method: method.to_string(),
            message: "returned nothing".to_string(),
        });
    }
    Ok(value)
}

/// Read a number that may be stored directly or behind a zero-argument
/// accessor method (`lat` vs `lat()`).
pub fn read_number(host: &dyn HostPage, target: &HostValue, key: &str) -> Option<f64> {
    if let HostValue::Object(obj) = target {
        if host.has_method(*obj, key) {
            return host.call(*obj, key, &[]).ok()?.as_f64();
        }
    }
    host.get(target, key).ok()?.as_f64()
}
