//! Constructor and prototype interception.
//!
//! Hooks installed here run inside page operations, so they never touch
//! bridge state directly. Each one pushes a [`HostEvent`] onto the shared
//! [`EventQueue`] and the bridge drains the queue at the start of every tick
//! (and between ticks through `pump_events`).

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::engine::{EngineKind, EngineProfile, PROFILES};
use crate::error::{BridgeError, Result};
use crate::host::{
    BindingState, ConstructHook, HostPage, ListenerHook, MethodHook, NodeRef, ObjectRef,
    PointerEvent, PointerHook,
};

/// Something a hook observed inside the page.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A hooked constructor returned a new instance.
    Constructed {
        object: ObjectRef,
        engine: EngineKind,
        container: Option<NodeRef>,
    },
    /// An instance called one of the interposed prototype methods.
    Backdoor { object: ObjectRef, method: String },
    /// An instance fired its bounds-changed event.
    BoundsChanged { object: ObjectRef },
    /// Pointer activity on an overlay surface.
    Pointer(PointerEvent),
}

/// Queue shared between host hooks and the bridge. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Rc<RefCell<VecDeque<HostEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: HostEvent) {
        self.inner.borrow_mut().push_back(event);
    }

    pub fn drain(&self) -> Vec<HostEvent> {
        self.inner.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

/// What one `apply` pass did, per engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterceptionReport {
    pub wrapped: Vec<EngineKind>,
    pub trapped: Vec<EngineKind>,
    pub backdoors: Vec<EngineKind>,
    pub absent: Vec<EngineKind>,
}

impl InterceptionReport {
    pub fn is_noop(&self) -> bool {
        self.wrapped.is_empty() && self.trapped.is_empty() && self.backdoors.is_empty()
    }
}

/// Installs constructor wrappers, binding traps and the prototype backdoor.
pub struct InterceptionLayer {
    events: EventQueue,
    backdoors: HashSet<EngineKind>,
    applied: u64,
}

impl InterceptionLayer {
    pub fn new(events: EventQueue) -> Self {
        Self {
            events,
            backdoors: HashSet::new(),
            applied: 0,
        }
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Number of `apply` passes run so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn has_backdoor(&self, engine: EngineKind) -> bool {
        self.backdoors.contains(&engine)
    }

    /// Hook every supported engine. Safe to call every tick: bindings that
    /// are already hooked or trapped are left alone.
    pub fn apply(&mut self, host: &dyn HostPage) -> InterceptionReport {
        self.applied += 1;
        let mut report = InterceptionReport::default();

        for profile in PROFILES.iter() {
            match self.hook_constructor(host, profile) {
                Ok(Some(BindingState::Present { .. })) => report.wrapped.push(profile.kind),
                Ok(Some(BindingState::Trapped)) => report.trapped.push(profile.kind),
                Ok(_) => {}
                Err(e) if e.is_expected() => {
                    debug!("{}", e);
                    report.absent.push(profile.kind);
                }
                Err(e) => {
                    warn!(
                        "Failed to hook {} constructor, will retry next tick: {}",
                        profile.kind, e
                    );
                    report.absent.push(profile.kind);
                }
            }

            if self.backdoors.contains(&profile.kind) {
                continue;
            }
            match self.install_backdoor(host, profile) {
                Ok(true) => {
                    self.backdoors.insert(profile.kind);
                    report.backdoors.push(profile.kind);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to interpose {} prototype: {}", profile.kind, e),
            }
        }

        if !report.is_noop() {
            info!(
                "Interception applied: wrapped={:?} trapped={:?} backdoors={:?}",
                report.wrapped, report.trapped, report.backdoors
            );
        }
        report
    }

    /// Returns the state the binding was moved into, or `None` when nothing
    /// needed doing.
    fn hook_constructor(
        &self,
        host: &dyn HostPage,
        profile: &EngineProfile,
    ) -> Result<Option<BindingState>> {
        let path = profile.constructor_path;
        match host.binding_state(path) {
            BindingState::Present { hooked: true } | BindingState::Trapped => Ok(None),
            BindingState::Present { hooked: false } => {
                host.wrap_constructor(path, self.construct_hook(profile.kind))?;
                Ok(Some(BindingState::Present { hooked: true }))
            }
            BindingState::Absent => {
                host.trap_binding(path, self.construct_hook(profile.kind))
                    .map_err(|e| BridgeError::EngineAbsent {
                        engine: format!("{} ({})", profile.kind, e),
                    })?;
                Ok(Some(BindingState::Trapped))
            }
        }
    }

    fn install_backdoor(&self, host: &dyn HostPage, profile: &EngineProfile) -> Result<bool> {
        let events = self.events.clone();
        let hook: MethodHook = Rc::new(move |object, method| {
            events.push(HostEvent::Backdoor {
                object,
                method: method.to_string(),
            });
        });
        Ok(host.interpose_methods(profile.prototype_path, profile.backdoor_methods, hook)?)
    }

    fn construct_hook(&self, engine: EngineKind) -> ConstructHook {
        let events = self.events.clone();
        Rc::new(move |object, container| {
            events.push(HostEvent::Constructed {
                object,
                engine,
                container,
            });
        })
    }

    /// Subscribe to the instance's bounds-changed event.
    pub fn attach_bounds_listener(
        &self,
        host: &dyn HostPage,
        object: ObjectRef,
        engine: EngineKind,
    ) -> Result<()> {
        let profile = engine.profile().ok_or_else(|| BridgeError::EngineAbsent {
            engine: engine.to_string(),
        })?;
        let events = self.events.clone();
        let listener: ListenerHook = Rc::new(move |object| {
            events.push(HostEvent::BoundsChanged { object });
        });
        host.add_listener(object, profile.bounds_event, listener)?;
        Ok(())
    }

    /// Delegated pointer listener for overlay surfaces.
    pub fn pointer_hook(&self) -> PointerHook {
        let events = self.events.clone();
        Rc::new(move |event| events.push(HostEvent::Pointer(event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Bounds;
    use crate::host::sim::SimPage;

    fn bounds() -> Bounds {
        Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap()
    }

    #[test]
    fn test_apply_traps_then_captures_late_engine() {
        let page = SimPage::new("https://a.example/");
        let mut layer = InterceptionLayer::new(EventQueue::new());

        let report = layer.apply(&page);
        assert_eq!(report.trapped, vec![EngineKind::EngineA, EngineKind::EngineB]);
        assert!(layer.apply(&page).is_noop());

        page.load_engine(EngineKind::EngineB);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineB, div, bounds(), 4.0).unwrap();

        let events = layer.events().drain();
        assert_eq!(
            events,
            vec![HostEvent::Constructed {
                object: map,
                engine: EngineKind::EngineB,
                container: Some(div),
            }]
        );
    }

    #[test]
    fn test_apply_wraps_present_engine_once() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        let mut layer = InterceptionLayer::new(EventQueue::new());

        let first = layer.apply(&page);
        assert_eq!(first.wrapped, vec![EngineKind::EngineA]);
        assert_eq!(first.backdoors, vec![EngineKind::EngineA]);
        let second = layer.apply(&page);
        assert!(second.wrapped.is_empty());
        assert!(second.backdoors.is_empty());

        let div = page.create_container(page.body(), 100.0, 100.0);
        page.construct_map(EngineKind::EngineA, div, bounds(), 4.0).unwrap();
        assert_eq!(layer.events().len(), 1);
    }

    #[test]
    fn test_backdoor_sees_preexisting_instance() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineA);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let early = page.construct_map(EngineKind::EngineA, div, bounds(), 4.0).unwrap();

        let mut layer = InterceptionLayer::new(EventQueue::new());
        layer.apply(&page);
        page.set_zoom(early, 5.0).unwrap();

        assert_eq!(
            layer.events().drain(),
            vec![HostEvent::Backdoor {
                object: early,
                method: "setZoom".to_string(),
            }]
        );
    }

    #[test]
    fn test_bounds_listener_pushes_event() {
        let page = SimPage::new("https://a.example/");
        page.load_engine(EngineKind::EngineB);
        let div = page.create_container(page.body(), 100.0, 100.0);
        let map = page.construct_map(EngineKind::EngineB, div, bounds(), 4.0).unwrap();
        let layer = InterceptionLayer::new(EventQueue::new());

        layer
            .attach_bounds_listener(&page, map, EngineKind::EngineB)
            .unwrap();
        page.fit_bounds(map, Bounds::new(3.0, 2.0, 3.0, 2.0).unwrap())
            .unwrap();
        assert_eq!(
            layer.events().drain(),
            vec![HostEvent::BoundsChanged { object: map }]
        );

        let plain = page.new_object(vec![]);
        assert!(layer
            .attach_bounds_listener(&page, plain, EngineKind::EngineB)
            .is_err());
    }
}
