//! Element arena for the simulated page.
//!
//! Nodes are never freed. Detaching a node only clears its parent link, so
//! handles held by the bridge stay valid the way element references do in a
//! real page.

use std::collections::BTreeMap;

use super::selector::{Matchable, Selector};
use crate::host::{DrawCommand, FrameRef, HostError, HostValue, NodeRef, PointerHook};

/// Guard against malformed parent cycles.
const MAX_ANCESTRY: usize = 4096;

pub(crate) struct SimNode {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub props: BTreeMap<String, HostValue>,
    pub styles: BTreeMap<String, String>,
    pub parent: Option<NodeRef>,
    pub children: Vec<NodeRef>,
    pub shadow_root: Option<NodeRef>,
    /// Set on shadow roots: the element they are attached to.
    pub shadow_host: Option<NodeRef>,
    /// Set on document roots: the frame that owns the document.
    pub document_of: Option<FrameRef>,
    /// Set on frame elements: the frame they embed.
    pub content_frame: Option<FrameRef>,
    pub size: (f64, f64),
    pub painted: Vec<DrawCommand>,
    pub paint_count: u64,
    pub pointer_listeners: Vec<PointerHook>,
}

impl SimNode {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            id: None,
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            props: BTreeMap::new(),
            styles: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
            shadow_root: None,
            shadow_host: None,
            document_of: None,
            content_frame: None,
            size: (0.0, 0.0),
            painted: Vec::new(),
            paint_count: 0,
            pointer_listeners: Vec::new(),
        }
    }
}

impl Matchable for SimNode {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        match name {
            "id" => self.id.as_deref(),
            _ => self.attrs.get(name).map(|s| s.as_str()),
        }
    }
}

pub(crate) struct SimFrame {
    pub url: String,
    /// Cross-origin relative to the context the bridge runs in.
    pub cross_origin: bool,
    pub document: NodeRef,
    pub body: NodeRef,
    /// Frame element embedding this frame; `None` for the top frame.
    pub host_element: Option<NodeRef>,
}

pub(crate) struct Dom {
    nodes: Vec<SimNode>,
    frames: Vec<SimFrame>,
}

impl Dom {
    pub fn new(top_url: &str) -> Self {
        let mut dom = Self {
            nodes: Vec::new(),
            frames: Vec::new(),
        };
        dom.new_frame(top_url, false, None);
        dom
    }

    pub fn top(&self) -> FrameRef {
        FrameRef(0)
    }

    /// Create a frame with an `html > body` document.
    pub fn new_frame(
        &mut self,
        url: &str,
        cross_origin: bool,
        host_element: Option<NodeRef>,
    ) -> FrameRef {
        let frame = FrameRef(self.frames.len() as u64);
        let document = self.create("html");
        let body = self.create("body");
        self.node_mut(document).document_of = Some(frame);
        self.append(document, body);
        self.frames.push(SimFrame {
            url: url.to_string(),
            cross_origin,
            document,
            body,
            host_element,
        });
        if let Some(element) = host_element {
            self.node_mut(element).content_frame = Some(frame);
        }
        frame
    }

    pub fn frame(&self, frame: FrameRef) -> Result<&SimFrame, HostError> {
        self.frames
            .get(frame.0 as usize)
            .ok_or(HostError::Stale {
                kind: "frame",
                id: frame.0,
            })
    }

    pub fn frame_mut(&mut self, frame: FrameRef) -> Option<&mut SimFrame> {
        self.frames.get_mut(frame.0 as usize)
    }

    pub fn create(&mut self, tag: &str) -> NodeRef {
        let node = NodeRef(self.nodes.len() as u64);
        self.nodes.push(SimNode::new(tag));
        node
    }

    pub fn node(&self, node: NodeRef) -> Result<&SimNode, HostError> {
        self.nodes.get(node.0 as usize).ok_or(HostError::Stale {
            kind: "node",
            id: node.0,
        })
    }

    /// Panics on a handle this arena never issued; only used with handles
    /// the arena just created or validated.
    pub fn node_mut(&mut self, node: NodeRef) -> &mut SimNode {
        &mut self.nodes[node.0 as usize]
    }

    pub fn exists(&self, node: NodeRef) -> bool {
        (node.0 as usize) < self.nodes.len()
    }

    pub fn append(&mut self, parent: NodeRef, child: NodeRef) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    pub fn detach(&mut self, node: NodeRef) {
        if let Some(parent) = self.node_mut(node).parent.take() {
            self.node_mut(parent).children.retain(|c| *c != node);
        }
    }

    pub fn attach_shadow(&mut self, host: NodeRef) -> NodeRef {
        if let Some(existing) = self.node_mut(host).shadow_root {
            return existing;
        }
        let root = self.create("#shadow-root");
        self.node_mut(root).shadow_host = Some(host);
        self.node_mut(host).shadow_root = Some(root);
        root
    }

    /// Next step toward the document root, crossing shadow boundaries.
    fn up(&self, node: NodeRef) -> Option<NodeRef> {
        let n = self.node(node).ok()?;
        n.parent.or(n.shadow_host)
    }

    /// Frame whose document this node currently belongs to.
    pub fn frame_of(&self, node: NodeRef) -> Option<FrameRef> {
        let mut current = node;
        for _ in 0..MAX_ANCESTRY {
            let n = self.node(current).ok()?;
            if let Some(frame) = n.document_of {
                return Some(frame);
            }
            current = self.up(current)?;
        }
        None
    }

    pub fn is_connected(&self, node: NodeRef) -> bool {
        let mut current = node;
        for _ in 0..MAX_ANCESTRY {
            let Some(frame) = self.frame_of(current) else {
                return false;
            };
            if frame == self.top() {
                return true;
            }
            match self.frame(frame).ok().and_then(|f| f.host_element) {
                Some(element) => current = element,
                None => return false,
            }
        }
        false
    }

    /// Light-tree descendants of `scope` in document order, excluding `scope`.
    pub fn descendants(&self, scope: NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeRef> = match self.node(scope) {
            Ok(n) => n.children.iter().rev().copied().collect(),
            Err(_) => return out,
        };
        while let Some(node) = stack.pop() {
            out.push(node);
            if let Ok(n) = self.node(node) {
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn query_all(&self, scope: NodeRef, selector: &str) -> Vec<NodeRef> {
        let Some(selector) = Selector::parse(selector) else {
            return Vec::new();
        };
        self.descendants(scope)
            .into_iter()
            .filter(|n| {
                self.node(*n)
                    .map(|node| selector.matches(node))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        self.nodes
            .iter()
            .position(|n| n.id.as_deref() == Some(id))
            .map(|i| NodeRef(i as u64))
    }

    /// True if reading this node's properties would cross an origin boundary.
    pub fn is_cross_origin(&self, node: NodeRef) -> bool {
        self.frame_of(node)
            .and_then(|f| self.frame(f).ok())
            .map(|f| f.cross_origin)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_through_shadow_root() {
        let mut dom = Dom::new("https://a.example/");
        let body = dom.frame(dom.top()).unwrap().body;
        let widget = dom.create("map-widget");
        dom.append(body, widget);
        let shadow = dom.attach_shadow(widget);
        let inner = dom.create("div");
        dom.append(shadow, inner);

        assert!(dom.is_connected(inner));
        assert_eq!(dom.frame_of(inner), Some(dom.top()));

        dom.detach(widget);
        assert!(!dom.is_connected(inner));
        assert_eq!(dom.frame_of(inner), None);
    }

    #[test]
    fn test_connected_through_frame_element() {
        let mut dom = Dom::new("https://a.example/");
        let body = dom.frame(dom.top()).unwrap().body;
        let iframe = dom.create("iframe");
        dom.append(body, iframe);
        let frame = dom.new_frame("https://b.example/", true, Some(iframe));
        let inner_body = dom.frame(frame).unwrap().body;
        let div = dom.create("div");
        dom.append(inner_body, div);

        assert!(dom.is_connected(div));
        assert!(dom.is_cross_origin(div));
        dom.detach(iframe);
        assert!(!dom.is_connected(div));
    }

    #[test]
    fn test_descendants_skip_shadow_content() {
        let mut dom = Dom::new("https://a.example/");
        let body = dom.frame(dom.top()).unwrap().body;
        let a = dom.create("div");
        let b = dom.create("span");
        dom.append(body, a);
        dom.append(a, b);
        let shadow = dom.attach_shadow(a);
        let hidden = dom.create("p");
        dom.append(shadow, hidden);

        let found = dom.descendants(body);
        assert_eq!(found, vec![a, b]);
        assert_eq!(dom.query_all(body, "p"), Vec::<NodeRef>::new());
        assert_eq!(dom.query_all(shadow, "p"), vec![hidden]);
    }
}
