//! The single batched drawing surface mounted over each map.

use crate::config::RenderConfig;
use crate::engine::extract::overlay_mount;
use crate::engine::EngineKind;
use crate::error::{BridgeError, Result};
use crate::host::{DrawCommand, HostPage, NodeRef, ObjectRef, PointerHook};
use crate::render::sprite::MarkerSprite;
use crate::sites::MarkerStyle;

#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub node: NodeRef,
    /// Element the surface is appended to.
    pub mount: NodeRef,
    /// Element whose client size defines the surface size.
    pub sized: NodeRef,
    pub width: f64,
    pub height: f64,
}

impl Surface {
    /// Create the surface, style it over the map and hook up pointer
    /// delegation.
    pub fn mount(
        host: &dyn HostPage,
        object: ObjectRef,
        engine: EngineKind,
        style: &MarkerStyle,
        pointer: PointerHook,
    ) -> Result<Self> {
        if !host.supports_surface() {
            return Err(BridgeError::HostApiMissing {
                primitive: format!("{} surface", RenderConfig::SURFACE_TAG),
            });
        }
        let (mount, sized) = overlay_mount(host, object, engine)?;

        let node = host.create_element(RenderConfig::SURFACE_TAG)?;
        host.set_attribute(node, RenderConfig::SURFACE_MARKER_ATTR, "true")?;
        let z_index = style.z_index.to_string();
        for (property, value) in [
            ("position", "absolute"),
            ("left", "0"),
            ("top", "0"),
            ("pointer-events", "auto"),
            ("z-index", z_index.as_str()),
        ] {
            host.set_style(node, property, value)?;
        }
        host.append_child(mount, node)?;
        host.add_pointer_listener(node, pointer)?;

        let mut surface = Self {
            node,
            mount,
            sized,
            width: 0.0,
            height: 0.0,
        };
        surface.resize(host)?;
        Ok(surface)
    }

    /// Track the container's client size. Returns `true` if it changed.
    pub fn resize(&mut self, host: &dyn HostPage) -> Result<bool> {
        let (width, height) = host.client_size(self.sized);
        if width == self.width && height == self.height {
            return Ok(false);
        }
        self.width = width;
        self.height = height;
        host.set_attribute(self.node, "width", &width.to_string())?;
        host.set_attribute(self.node, "height", &height.to_string())?;
        Ok(true)
    }

    /// Replace the surface content with `sprites`, in order.
    pub fn paint<'a>(
        &self,
        host: &dyn HostPage,
        sprites: impl Iterator<Item = &'a MarkerSprite>,
        style: &MarkerStyle,
    ) -> Result<usize> {
        let mut commands = vec![DrawCommand::Clear {
            width: self.width,
            height: self.height,
        }];
        let mut drawn = 0;
        for sprite in sprites {
            sprite.draw(style, &mut commands);
            drawn += 1;
        }
        host.paint(self.node, &commands)?;
        Ok(drawn)
    }

    pub fn remove(&self, host: &dyn HostPage) {
        host.remove_node(self.node);
    }
}
