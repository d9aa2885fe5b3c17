//! Priority-ranked bounds broadcaster.
//!
//! Several sources race to report the same viewport. The channel keeps the
//! last accepted priority and time, lets a high-priority source hold a lock
//! until it goes quiet, debounces low-priority sources right after a
//! stronger one, and drops readings that quantize to the last broadcast.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::clock::Millis;
use crate::config::PortalSettings;
use crate::geo::Bounds;
use crate::protocol::{BoundsBroadcast, ContextMirror, MessagePort, OutboundMessage};

/// Why an update was not broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidBounds,
    DisabledSource,
    Locked,
    Debounced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Rejected(RejectReason),
    /// Same viewport as the last broadcast. Nothing was sent.
    Deduplicated,
    Broadcast(BoundsBroadcast),
}

impl UpdateOutcome {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, UpdateOutcome::Broadcast(_))
    }
}

/// A prioritised bounds reading.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityUpdate {
    pub bounds: Bounds,
    pub source: String,
    pub priority: i32,
    pub timestamp: Millis,
}

pub type BoundsListener = Box<dyn Fn(&BoundsBroadcast)>;

pub struct StateBroadcastChannel {
    settings: PortalSettings,
    last_key: Option<String>,
    last_priority: i32,
    last_update: Option<Millis>,
    port: Rc<dyn MessagePort>,
    mirror: Option<Rc<dyn ContextMirror>>,
    listeners: Vec<BoundsListener>,
    broadcasts: u64,
}

impl StateBroadcastChannel {
    pub fn new(settings: PortalSettings, port: Rc<dyn MessagePort>) -> Self {
        Self {
            settings,
            last_key: None,
            last_priority: 0,
            last_update: None,
            port,
            mirror: None,
            listeners: Vec::new(),
            broadcasts: 0,
        }
    }

    /// Also copy every broadcast into an isolated context.
    pub fn with_mirror(mut self, mirror: Rc<dyn ContextMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// In-process listener, called after the port.
    pub fn subscribe(&mut self, listener: BoundsListener) {
        self.listeners.push(listener);
    }

    pub fn last_priority(&self) -> i32 {
        self.last_priority
    }

    pub fn broadcasts(&self) -> u64 {
        self.broadcasts
    }

    pub fn priority_of(&self, source: &str) -> i32 {
        self.settings.priority_of(source)
    }

    /// Offer a reading from `source` observed at `now`.
    pub fn update(&mut self, bounds: Bounds, source: &str, now: Millis) -> UpdateOutcome {
        if bounds.validate().is_err() {
            return UpdateOutcome::Rejected(RejectReason::InvalidBounds);
        }
        if self.settings.is_disabled(source) {
            trace!("Ignoring bounds from disabled source {}", source);
            return UpdateOutcome::Rejected(RejectReason::DisabledSource);
        }

        let update = PriorityUpdate {
            bounds,
            source: source.to_string(),
            priority: self.priority_of(source),
            timestamp: now,
        };
        let elapsed = self
            .last_update
            .map(|last| now.saturating_sub(last))
            .unwrap_or(u64::MAX);

        let threshold = self.settings.high_priority_threshold;
        if self.last_priority >= threshold && update.priority < threshold {
            if elapsed < self.settings.lock_timeout_ms {
                debug!(
                    "Bounds from {} ({}) rejected: locked by priority {}",
                    update.source, update.priority, self.last_priority
                );
                return UpdateOutcome::Rejected(RejectReason::Locked);
            }
            debug!("Priority lock expired after {}ms", elapsed);
            self.last_priority = 0;
        }

        let debounce = self.settings.debounce_priority;
        if update.priority <= debounce
            && self.last_priority >= debounce
            && elapsed < self.settings.debounce_window_ms
        {
            trace!("Bounds from {} debounced", update.source);
            return UpdateOutcome::Rejected(RejectReason::Debounced);
        }

        let key = update.bounds.quantized_key();
        if self.last_key.as_deref() == Some(key.as_str()) {
            if update.priority >= self.last_priority {
                self.last_priority = update.priority;
                self.last_update = Some(now);
            }
            return UpdateOutcome::Deduplicated;
        }

        self.last_key = Some(key);
        self.last_priority = update.priority;
        self.last_update = Some(now);
        self.broadcasts += 1;

        let payload = BoundsBroadcast {
            bounds: update.bounds.quantized(),
            source: update.source,
            timestamp: now,
        };
        self.port
            .post(OutboundMessage::BoundsUpdate(payload.clone()));
        if let Some(mirror) = &self.mirror {
            mirror.mirror(&payload);
        }
        for listener in &self.listeners {
            listener(&payload);
        }
        UpdateOutcome::Broadcast(payload)
    }

    /// Forget the last broadcast so the next reading goes out regardless.
    pub fn reset(&mut self) {
        self.last_key = None;
        self.last_priority = 0;
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sources;
    use crate::protocol::Outbox;
    use std::cell::Cell;

    fn channel() -> (StateBroadcastChannel, Outbox) {
        let outbox = Outbox::new();
        let mut settings = PortalSettings::default();
        settings.priorities.insert("p100".to_string(), 100);
        settings.priorities.insert("p50".to_string(), 50);
        settings.priorities.insert("p40".to_string(), 40);
        settings.priorities.insert("p30".to_string(), 30);
        let channel = StateBroadcastChannel::new(settings, Rc::new(outbox.clone()));
        (channel, outbox)
    }

    fn bounds(north: f64) -> Bounds {
        Bounds::new(north, north - 1.0, 10.0, 9.0).unwrap()
    }

    #[test]
    fn test_priority_lock_rejects_within_timeout() {
        let (mut channel, _) = channel();
        assert!(channel.update(bounds(10.0), "p100", 0).is_broadcast());
        assert_eq!(
            channel.update(bounds(11.0), "p30", 200),
            UpdateOutcome::Rejected(RejectReason::Locked)
        );
    }

    #[test]
    fn test_priority_lock_expires() {
        let (mut channel, _) = channel();
        assert!(channel.update(bounds(10.0), "p100", 0).is_broadcast());
        assert!(channel.update(bounds(11.0), "p30", 6_000).is_broadcast());
        assert_eq!(channel.last_priority(), 30);
    }

    #[test]
    fn test_debounce_window() {
        let (mut channel, _) = channel();
        assert!(channel.update(bounds(10.0), "p50", 0).is_broadcast());
        assert_eq!(
            channel.update(bounds(11.0), "p40", 100),
            UpdateOutcome::Rejected(RejectReason::Debounced)
        );
        assert!(channel.update(bounds(11.0), "p40", 600).is_broadcast());
    }

    #[test]
    fn test_equal_priority_not_debounced() {
        let (mut channel, _) = channel();
        assert!(channel.update(bounds(10.0), "p40", 0).is_broadcast());
        assert!(channel.update(bounds(11.0), "p40", 100).is_broadcast());
    }

    #[test]
    fn test_sub_precision_changes_deduplicate() {
        let (mut channel, outbox) = channel();
        let a = Bounds::new(40.0000009, 39.0, -73.0, -74.0).unwrap();
        let b = Bounds::new(40.0000001, 39.0, -73.0, -74.0).unwrap();
        assert!(channel.update(a, sources::MAP_EVENT, 0).is_broadcast());
        assert_eq!(
            channel.update(b, sources::MAP_EVENT, 10),
            UpdateOutcome::Deduplicated
        );
        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), "BOUNDS_UPDATE");
    }

    #[test]
    fn test_duplicate_refreshes_lock() {
        let (mut channel, _) = channel();
        assert!(channel.update(bounds(10.0), "p100", 0).is_broadcast());
        assert_eq!(channel.update(bounds(10.0), "p100", 4_000), UpdateOutcome::Deduplicated);
        // Lock is measured from the refresh, not the first broadcast.
        assert_eq!(
            channel.update(bounds(12.0), "p30", 6_000),
            UpdateOutcome::Rejected(RejectReason::Locked)
        );
    }

    #[test]
    fn test_unknown_source_gets_default_priority() {
        let (channel, _) = channel();
        assert_eq!(channel.priority_of("somewhere"), 30);
        assert_eq!(channel.priority_of(sources::INSTANCE_SNAPSHOT), 90);
    }

    #[test]
    fn test_disabled_source_ignored() {
        let (mut channel, outbox) = channel();
        assert_eq!(
            channel.update(bounds(10.0), sources::NETWORK_INFERENCE, 0),
            UpdateOutcome::Rejected(RejectReason::DisabledSource)
        );
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_mirror_and_listeners_receive_payload() {
        let outbox = Outbox::new();
        let mirror = Outbox::new();
        let mut channel =
            StateBroadcastChannel::new(PortalSettings::default(), Rc::new(outbox.clone()))
                .with_mirror(Rc::new(mirror.clone()));
        let heard = Rc::new(Cell::new(0));
        let h = heard.clone();
        channel.subscribe(Box::new(move |_| h.set(h.get() + 1)));

        channel.update(bounds(5.0), sources::INTERACTION, 0);
        assert_eq!(outbox.len(), 1);
        assert_eq!(mirror.len(), 1);
        assert_eq!(heard.get(), 1);
    }
}
