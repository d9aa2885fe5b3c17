//! Origin resolution for newly registered instances.
//!
//! Runs once per entry. The first step that yields a host wins and the
//! result is never recomputed, even if the container later moves.

use tracing::debug;
use url::Url;

use crate::config::RegistryConfig;
use crate::engine::extract::{container_of, internal_container};
use crate::engine::EngineKind;
use crate::error::{BridgeError, Result};
use crate::host::{HostPage, NodeRef, ObjectRef};
use crate::registry::entry::DomainSource;
use crate::sites::normalize_domain;

#[derive(Debug, Clone, PartialEq)]
pub struct DomainResolution {
    pub domain: String,
    pub source: DomainSource,
    /// First container found along the chain, kept for attachment checks.
    pub container: Option<NodeRef>,
}

/// Resolve the origin of an instance through the fixed priority chain:
/// explicit container, the engine's container accessor, an internal
/// container field, then the top page location when not nested.
pub fn resolve_domain(
    host: &dyn HostPage,
    object: ObjectRef,
    engine: EngineKind,
    explicit: Option<NodeRef>,
) -> DomainResolution {
    let accessor = container_of(host, object, engine);
    let internal = internal_container(host, object, engine);
    let container = explicit.or(accessor).or(internal);

    let candidates = [
        (explicit, DomainSource::ExplicitContainer),
        (accessor, DomainSource::ContainerAccessor),
        (internal, DomainSource::InternalContainer),
    ];
    for (node, source) in candidates {
        let Some(node) = node else {
            continue;
        };
        match domain_of_node(host, node) {
            Ok(domain) => {
                return DomainResolution {
                    domain,
                    source,
                    container,
                }
            }
            Err(e) => debug!("Domain via {:?} unavailable for {}: {}", source, object, e),
        }
    }

    if !host.is_nested_context() {
        match host
            .top_location()
            .map_err(BridgeError::from)
            .and_then(|url| host_of(&url))
        {
            Ok(domain) => {
                return DomainResolution {
                    domain,
                    source: DomainSource::TopLocation,
                    container,
                }
            }
            Err(e) => debug!("Top location unavailable for {}: {}", object, e),
        }
    }

    DomainResolution {
        domain: RegistryConfig::UNKNOWN_DOMAIN.to_string(),
        source: DomainSource::Fallback,
        container,
    }
}

/// Host of the document that currently owns `node`.
fn domain_of_node(host: &dyn HostPage, node: NodeRef) -> Result<String> {
    let frame = host.node_frame(node).ok_or_else(|| BridgeError::CrossContext {
        message: format!("{} is not attached to a document", node),
    })?;
    let location = host.frame_location(frame)?;
    host_of(&location)
}

fn host_of(location: &str) -> Result<String> {
    let url = Url::parse(location).map_err(|e| BridgeError::CrossContext {
        message: format!("unreadable location '{}': {}", location, e),
    })?;
    let host = url.host_str().ok_or_else(|| BridgeError::CrossContext {
        message: format!("location '{}' has no host", location),
    })?;
    let domain = normalize_domain(host);
    if domain == RegistryConfig::UNKNOWN_DOMAIN {
        return Err(BridgeError::CrossContext {
            message: format!("location '{}' has no usable host", location),
        });
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Bounds;
    use crate::host::sim::SimPage;
    use crate::host::HostValue;

    fn bounds() -> Bounds {
        Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap()
    }

    #[test]
    fn test_container_accessor_in_same_origin_frame() {
        let page = SimPage::new("https://www.portal.example/");
        page.load_engine(EngineKind::EngineA);
        let frame = page
            .add_frame(page.body(), "https://maps.shop.example/embed", false)
            .unwrap();
        let div = page.create_container(page.frame_body(frame).unwrap(), 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineA, div, bounds(), 5.0).unwrap();

        let resolved = resolve_domain(&page, map, EngineKind::EngineA, None);
        assert_eq!(resolved.domain, "maps.shop.example");
        assert_eq!(resolved.source, DomainSource::ContainerAccessor);
        assert_eq!(resolved.container, Some(div));
    }

    #[test]
    fn test_cross_origin_falls_back_to_top() {
        let page = SimPage::new("https://portal.example/");
        page.load_engine(EngineKind::EngineB);
        let frame = page
            .add_frame(page.body(), "https://ads.example/", true)
            .unwrap();
        let div = page.create_container(page.frame_body(frame).unwrap(), 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineB, div, bounds(), 5.0).unwrap();

        let resolved = resolve_domain(&page, map, EngineKind::EngineB, Some(div));
        assert_eq!(resolved.domain, "portal.example");
        assert_eq!(resolved.source, DomainSource::TopLocation);
    }

    #[test]
    fn test_nested_context_without_container_is_unknown() {
        let page = SimPage::new("https://portal.example/");
        page.set_nested(true);
        let fake = page.new_object(vec![("_div", HostValue::Null)]);

        let resolved = resolve_domain(&page, fake, EngineKind::EngineA, None);
        assert_eq!(resolved.domain, "unknown");
        assert_eq!(resolved.source, DomainSource::Fallback);
        assert_eq!(resolved.container, None);
    }

    #[test]
    fn test_internal_field_used_when_accessor_throws() {
        let page = SimPage::new("https://a.example/");
        let div = page.create_container(page.body(), 10.0, 10.0);
        let fake = page.new_object(vec![("_container", HostValue::Node(div))]);
        page.add_method(fake, "getContainer");

        let resolved = resolve_domain(&page, fake, EngineKind::EngineB, None);
        assert_eq!(resolved.source, DomainSource::InternalContainer);
        assert_eq!(resolved.domain, "a.example");
    }
}
