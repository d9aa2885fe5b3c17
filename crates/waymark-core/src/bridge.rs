//! Application root.
//!
//! [`Bridge`] builds every component once and owns it. Nothing here is
//! global: two bridges over two pages share no state. All work happens in
//! [`Bridge::advance`], which runs whichever timers are due on the injected
//! clock, so the loop is as deterministic as the clock driving it.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Clock, Millis};
use crate::config::{sources, BridgeSettings};
use crate::discovery::{DiscoveryScanner, ScanReport};
use crate::engine::extract::{read_bounds, read_zoom};
use crate::engine::{probe, EngineKind};
use crate::error::Result;
use crate::host::{HostPage, NodeRef, ObjectRef, PointerEvent};
use crate::intercept::{EventQueue, HostEvent, InterceptionLayer, InterceptionReport};
use crate::portal::StateBroadcastChannel;
use crate::protocol::{
    ContextMirror, InboundMessage, MessagePort, OutboundMessage, PointOfInterest,
};
use crate::registry::{CapturedInstance, EntryId, EvictionReason, InstanceRegistry};
use crate::render::MarkerRenderEngine;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::sites::{normalize_domain, SiteConfigProvider};

/// Work the scheduler can hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeTask {
    Tick,
    Cleanup,
    Frame,
}

/// Upper bound on drain passes per pump; handlers may queue more events.
const MAX_PUMP_PASSES: usize = 8;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub interception: InterceptionReport,
    pub events: usize,
    pub scan: ScanReport,
    pub snapshots: usize,
    pub rendered: usize,
    pub frame_requested: bool,
}

#[derive(Debug, Default)]
struct Timers {
    tick: Option<TimerHandle>,
    cleanup: Option<TimerHandle>,
    frame: Option<TimerHandle>,
}

pub struct Bridge<H: HostPage> {
    host: Rc<H>,
    clock: Rc<dyn Clock>,
    settings: BridgeSettings,
    scheduler: Scheduler<BridgeTask>,
    timers: Timers,
    interception: InterceptionLayer,
    discovery: DiscoveryScanner,
    registry: InstanceRegistry,
    portal: StateBroadcastChannel,
    render: MarkerRenderEngine,
    port: Rc<dyn MessagePort>,
    pois: Vec<PointOfInterest>,
    initialized: bool,
    enabled: bool,
}

impl<H: HostPage> Bridge<H> {
    pub fn new(
        host: Rc<H>,
        clock: Rc<dyn Clock>,
        settings: BridgeSettings,
        sites: Arc<dyn SiteConfigProvider>,
        port: Rc<dyn MessagePort>,
    ) -> Self {
        let events = EventQueue::new();
        let interception = InterceptionLayer::new(events);

        let page_site = own_domain(&*host).map(|domain| sites.resolve(&domain));
        let discovery = DiscoveryScanner::new(settings.discovery.clone()).with_selectors(
            page_site
                .map(|site| site.container_selectors.clone())
                .unwrap_or_default(),
        );
        let registry = InstanceRegistry::new(sites, settings.render.clone());
        let portal = StateBroadcastChannel::new(settings.portal.clone(), port.clone());
        let render = MarkerRenderEngine::new(
            settings.render.clone(),
            interception.pointer_hook(),
            port.clone(),
        );

        Self {
            host,
            clock,
            settings,
            scheduler: Scheduler::new(),
            timers: Timers::default(),
            interception,
            discovery,
            registry,
            portal,
            render,
            port,
            pois: Vec::new(),
            initialized: false,
            enabled: false,
        }
    }

    /// Mirror bounds broadcasts into an isolated context.
    pub fn with_mirror(mut self, mirror: Rc<dyn ContextMirror>) -> Self {
        self.portal = self.portal.with_mirror(mirror);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn portal(&self) -> &StateBroadcastChannel {
        &self.portal
    }

    pub fn portal_mut(&mut self) -> &mut StateBroadcastChannel {
        &mut self.portal
    }

    pub fn discovery(&self) -> &DiscoveryScanner {
        &self.discovery
    }

    pub fn pois(&self) -> &[PointOfInterest] {
        &self.pois
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Earliest pending timer, for drivers that sleep between advances.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.scheduler.next_deadline()
    }

    fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    /// Install interception, announce readiness and start the timers.
    /// Repeated calls do nothing.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.enabled = true;
        self.interception.apply(&*self.host);
        self.arm_timers();
        self.port.post(OutboundMessage::BridgeReady {});
        info!("Bridge initialized");
    }

    fn arm_timers(&mut self) {
        let now = self.now();
        let timing = &self.settings.timing;
        self.timers.tick = Some(self.scheduler.schedule(
            now,
            Duration::from_millis(timing.tick_interval_ms),
            BridgeTask::Tick,
        ));
        self.timers.cleanup = Some(self.scheduler.schedule(
            now,
            Duration::from_millis(timing.cleanup_interval_ms),
            BridgeTask::Cleanup,
        ));
    }

    pub fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::DataUpdate { mut pois } => {
                debug!("Received {} POIs", pois.len());
                let received = pois.len();
                pois.retain(PointOfInterest::has_valid_position);
                if pois.len() < received {
                    warn!(
                        "Dropped {} POIs with invalid coordinates",
                        received - pois.len()
                    );
                }
                self.pois = pois;
                for entry in self.registry.active_entries_mut() {
                    entry.overlay_mut().mark_dirty();
                }
                if self.enabled && self.render_all() > 0 {
                    self.request_frame();
                }
            }
            InboundMessage::BridgeEnable { enabled: false } => self.disable(),
            InboundMessage::BridgeEnable { enabled: true } => self.enable(),
        }
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        self.scheduler.clear();
        self.timers = Timers::default();
        self.registry.deactivate_all(&*self.host);
        info!("Bridge disabled");
    }

    fn enable(&mut self) {
        if !self.initialized {
            self.initialize();
            return;
        }
        if self.enabled {
            return;
        }
        self.enabled = true;
        let now = self.now();
        self.registry.reactivate_all(now);
        self.interception.apply(&*self.host);
        self.arm_timers();
        self.port.post(OutboundMessage::BridgeReady {});
        info!("Bridge enabled");
    }

    /// Run every task due now. Returns how many ran.
    pub fn advance(&mut self) -> usize {
        let now = self.now();
        let tasks = self.scheduler.due(now);
        let count = tasks.len();
        for task in tasks {
            match task {
                BridgeTask::Tick => {
                    self.tick();
                }
                BridgeTask::Cleanup => {
                    self.cleanup();
                }
                BridgeTask::Frame => {
                    self.animation_frame();
                }
            }
        }
        count
    }

    /// One main-loop pass: interception, host events, discovery, bounds
    /// snapshots, then rendering.
    pub fn tick(&mut self) -> TickReport {
        if !self.enabled {
            return TickReport::default();
        }
        let now = self.now();
        let mut report = TickReport {
            interception: self.interception.apply(&*self.host),
            ..Default::default()
        };
        report.events = self.pump_events();

        report.scan = self.discovery.run(&*self.host, &mut self.registry, now);
        for id in report.scan.registered.clone() {
            self.attach_listeners(&id);
        }

        report.snapshots = self.snapshot_bounds(now);
        report.rendered = self.render_all();
        if report.rendered > 0 {
            self.request_frame();
            report.frame_requested = true;
        }
        report
    }

    /// Sweep detached and silent entries.
    pub fn cleanup(&mut self) -> Vec<(EntryId, EvictionReason)> {
        let now = self.now();
        let evicted =
            self.registry
                .cleanup(&*self.host, now, self.settings.registry.max_entry_age_ms);
        if !evicted.is_empty() {
            info!("Cleanup evicted {} entries", evicted.len());
        }
        evicted
    }

    /// Paint every dirty surface. Returns how many were painted.
    pub fn animation_frame(&mut self) -> usize {
        self.timers.frame = None;
        let host: &dyn HostPage = &*self.host;
        let mut painted = 0;
        for entry in self.registry.active_entries_mut() {
            match self.render.flush(host, entry) {
                Ok(true) => painted += 1,
                Ok(false) => {}
                Err(e) => warn!("Paint failed for {}: {}", entry.id(), e),
            }
        }
        painted
    }

    /// Handle queued host events. Returns how many were handled.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        for _ in 0..MAX_PUMP_PASSES {
            let events = self.interception.events().drain();
            if events.is_empty() {
                break;
            }
            for event in events {
                handled += 1;
                self.handle_event(event);
            }
        }
        handled
    }

    fn handle_event(&mut self, event: HostEvent) {
        let now = self.now();
        match event {
            HostEvent::Constructed {
                object,
                engine,
                container,
            } => self.capture(object, engine, container, now),
            HostEvent::Backdoor { object, method } => {
                if !self.enabled || self.registry.contains(object) {
                    return;
                }
                match probe(&*self.host, object) {
                    EngineKind::Unknown => {}
                    engine => {
                        debug!("Backdoor {}() exposed {}", method, object);
                        self.capture(object, engine, None, now);
                    }
                }
            }
            HostEvent::BoundsChanged { object } if self.enabled => {
                self.on_bounds_event(object, now)
            }
            HostEvent::Pointer(event) if self.enabled => self.on_pointer(event),
            HostEvent::BoundsChanged { .. } | HostEvent::Pointer(_) => {}
        }
    }

    fn capture(
        &mut self,
        object: ObjectRef,
        engine: EngineKind,
        container: Option<NodeRef>,
        now: Millis,
    ) {
        let instance = CapturedInstance::new(object, engine);
        match self.registry.register(&*self.host, instance, container, now) {
            Ok(registration) => {
                // Held inactive until the bridge is enabled again.
                if !self.enabled {
                    debug!("Bridge disabled, parking {}", registration.id);
                    self.registry.deactivate(&*self.host, &registration.id);
                }
                self.attach_listeners(&registration.id);
            }
            Err(e) => warn!("Failed to register {}: {}", object, e),
        }
    }

    fn attach_listeners(&mut self, id: &EntryId) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        let instance = *entry.instance();
        if instance.listeners_attached {
            return;
        }
        match self
            .interception
            .attach_bounds_listener(&*self.host, instance.object, instance.engine)
        {
            Ok(()) => self.registry.mark_listeners_attached(instance.object),
            Err(e) => debug!("No bounds listener for {}: {}", id, e),
        }
    }

    fn on_bounds_event(&mut self, object: ObjectRef, now: Millis) {
        let Some(engine) = self.registry.entry_for(object).map(|e| e.instance().engine) else {
            return;
        };
        if let Err(e) = self.record_bounds(object, engine, sources::MAP_EVENT, now) {
            debug!("Bounds event from {} unreadable: {}", object, e);
            return;
        }
        let host: &dyn HostPage = &*self.host;
        if let Some(entry) = self.registry.entry_for_mut(object) {
            if self
                .render
                .render_markers(host, &self.pois, entry)
                .needs_frame()
            {
                self.request_frame();
            }
        }
    }

    fn on_pointer(&mut self, event: PointerEvent) {
        for entry in self.registry.active_entries_mut() {
            if self.render.owns_event(entry, &event) {
                self.render.handle_pointer(entry, event);
                return;
            }
        }
    }

    /// Read an instance's viewport and feed it to the portal and registry.
    fn record_bounds(
        &mut self,
        object: ObjectRef,
        engine: EngineKind,
        source: &str,
        now: Millis,
    ) -> Result<()> {
        let bounds = read_bounds(&*self.host, object, engine)?;
        let zoom = read_zoom(&*self.host, object);
        self.portal.update(bounds, source, now);
        self.registry.update_bounds(object, bounds, zoom, now)?;
        Ok(())
    }

    fn snapshot_bounds(&mut self, now: Millis) -> usize {
        let live: Vec<(ObjectRef, EngineKind)> = self
            .registry
            .active_entries()
            .map(|e| (e.instance().object, e.instance().engine))
            .collect();
        let mut read = 0;
        for (object, engine) in live {
            match self.record_bounds(object, engine, sources::INSTANCE_SNAPSHOT, now) {
                Ok(()) => read += 1,
                Err(e) if e.is_candidate_error() || e.is_expected() => {
                    debug!("Snapshot of {} skipped: {}", object, e)
                }
                Err(e) => warn!("Snapshot of {} failed: {}", object, e),
            }
        }
        read
    }

    /// Render every active entry. Returns how many need a paint.
    fn render_all(&mut self) -> usize {
        let host: &dyn HostPage = &*self.host;
        let mut dirty = 0;
        for entry in self.registry.active_entries_mut() {
            if self
                .render
                .render_markers(host, &self.pois, entry)
                .needs_frame()
            {
                dirty += 1;
            }
        }
        dirty
    }

    /// Arm the frame timer unless one is already pending.
    fn request_frame(&mut self) {
        if let Some(handle) = self.timers.frame {
            if self.scheduler.is_armed(handle) {
                return;
            }
        }
        let now = self.now();
        self.timers.frame = Some(self.scheduler.schedule_once(
            now,
            Duration::from_millis(self.settings.timing.frame_delay_ms),
            BridgeTask::Frame,
        ));
    }
}

/// Normalized domain of the document the bridge runs in.
fn own_domain(host: &dyn HostPage) -> Option<String> {
    let frame = host.node_frame(host.document_root())?;
    let location = host.frame_location(frame).ok()?;
    Some(normalize_domain(&location))
}
