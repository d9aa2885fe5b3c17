//! Centralized configuration for the bridge.
//!
//! Constant holders carry the compiled-in defaults. [`BridgeSettings`] is the
//! runtime, serde-loadable view of the same values; every field falls back to
//! the constant when omitted from the JSON.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Timer periods for the main loop, the sweep and frame coalescing.
pub struct TimingConfig;

impl TimingConfig {
    pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
    pub const FRAME_DELAY: Duration = Duration::from_millis(16);
}

/// Discovery limits.
pub struct ScanConfig;

impl ScanConfig {
    /// Once at least one instance is managed, scan only every Nth tick.
    pub const SETTLED_SCAN_EVERY: u64 = 10;
    pub const ANCESTOR_PROBE_DEPTH: usize = 5;
    pub const PROPERTY_WALK_DEPTH: usize = 2;
    pub const FRONTIER_LIMIT: usize = 256;
    pub const SHADOW_DEPTH: usize = 8;
    pub const COMPONENT_TREE_HOPS: usize = 15;
    pub const STATE_CHAIN_HOPS: usize = 10;
}

/// Priority/lock protocol for the state broadcast channel.
pub struct PortalConfig;

impl PortalConfig {
    pub const HIGH_PRIORITY_THRESHOLD: i32 = 80;
    pub const LOCK_TIMEOUT: Duration = Duration::from_millis(5000);
    pub const DEBOUNCE_PRIORITY: i32 = 50;
    pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
    pub const DEFAULT_PRIORITY: i32 = 30;
    pub const BOUNDS_PRECISION: u32 = 6;

    pub const PRIORITY_INTERACTION: i32 = 100;
    pub const PRIORITY_MAP_EVENT: i32 = 100;
    pub const PRIORITY_INSTANCE_SNAPSHOT: i32 = 90;
    pub const PRIORITY_EXTERNAL_POLL: i32 = 50;
    pub const PRIORITY_NETWORK_INFERENCE: i32 = 10;
}

/// Instance registry limits.
pub struct RegistryConfig;

impl RegistryConfig {
    pub const MAX_ENTRY_AGE: Duration = Duration::from_secs(300);
    pub const UNKNOWN_DOMAIN: &'static str = "unknown";
    pub const ID_PREFIX: &'static str = "map";
}

/// Marker rendering defaults.
pub struct RenderConfig;

impl RenderConfig {
    pub const MAX_POOL_SIZE: usize = 100;
    pub const NATIVE_PROBE_ATTEMPTS: u32 = 5;
    pub const CULL_MARGIN_PX: f64 = 16.0;
    pub const MARKER_RADIUS_PX: f64 = 7.0;
    pub const STROKE_WIDTH_PX: f64 = 2.0;
    pub const LOGO_SIZE_PX: f64 = 18.0;
    pub const SURFACE_Z_INDEX: i32 = 400;
    pub const SURFACE_TAG: &'static str = "canvas";
    pub const SURFACE_MARKER_ATTR: &'static str = "data-waymark-surface";
}

/// Names of the bounds sources understood by the portal.
pub mod sources {
    pub const INTERACTION: &str = "interaction";
    pub const MAP_EVENT: &str = "map_event";
    pub const INSTANCE_SNAPSHOT: &str = "instance_snapshot";
    pub const EXTERNAL_POLL: &str = "external_poll";
    pub const NETWORK_INFERENCE: &str = "network_inference";
}

/// Runtime settings for a bridge instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub timing: TimingSettings,
    pub discovery: DiscoverySettings,
    pub portal: PortalSettings,
    pub registry: RegistrySettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub tick_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub frame_delay_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: TimingConfig::TICK_INTERVAL.as_millis() as u64,
            cleanup_interval_ms: TimingConfig::CLEANUP_INTERVAL.as_millis() as u64,
            frame_delay_ms: TimingConfig::FRAME_DELAY.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub settled_scan_every: u64,
    pub ancestor_probe_depth: usize,
    pub property_walk_depth: usize,
    pub frontier_limit: usize,
    pub shadow_depth: usize,
    pub component_tree_hops: usize,
    pub state_chain_hops: usize,
    /// Tags whose shadow roots are never entered (icons, buttons and the like).
    pub chrome_tags: Vec<String>,
    /// Class fragments that mark an element as UI chrome.
    pub chrome_class_fragments: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            settled_scan_every: ScanConfig::SETTLED_SCAN_EVERY,
            ancestor_probe_depth: ScanConfig::ANCESTOR_PROBE_DEPTH,
            property_walk_depth: ScanConfig::PROPERTY_WALK_DEPTH,
            frontier_limit: ScanConfig::FRONTIER_LIMIT,
            shadow_depth: ScanConfig::SHADOW_DEPTH,
            component_tree_hops: ScanConfig::COMPONENT_TREE_HOPS,
            state_chain_hops: ScanConfig::STATE_CHAIN_HOPS,
            chrome_tags: ["button", "svg", "img", "i", "input", "select"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chrome_class_fragments: ["icon", "btn", "button"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub high_priority_threshold: i32,
    pub lock_timeout_ms: u64,
    pub debounce_priority: i32,
    pub debounce_window_ms: u64,
    pub default_priority: i32,
    pub priorities: HashMap<String, i32>,
    pub disabled_sources: Vec<String>,
}

impl Default for PortalSettings {
    fn default() -> Self {
        let priorities = [
            (sources::INTERACTION, PortalConfig::PRIORITY_INTERACTION),
            (sources::MAP_EVENT, PortalConfig::PRIORITY_MAP_EVENT),
            (
                sources::INSTANCE_SNAPSHOT,
                PortalConfig::PRIORITY_INSTANCE_SNAPSHOT,
            ),
            (sources::EXTERNAL_POLL, PortalConfig::PRIORITY_EXTERNAL_POLL),
            (
                sources::NETWORK_INFERENCE,
                PortalConfig::PRIORITY_NETWORK_INFERENCE,
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            high_priority_threshold: PortalConfig::HIGH_PRIORITY_THRESHOLD,
            lock_timeout_ms: PortalConfig::LOCK_TIMEOUT.as_millis() as u64,
            debounce_priority: PortalConfig::DEBOUNCE_PRIORITY,
            debounce_window_ms: PortalConfig::DEBOUNCE_WINDOW.as_millis() as u64,
            default_priority: PortalConfig::DEFAULT_PRIORITY,
            priorities,
            disabled_sources: vec![sources::NETWORK_INFERENCE.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub max_entry_age_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_entry_age_ms: RegistryConfig::MAX_ENTRY_AGE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub max_pool_size: usize,
    pub native_probe_attempts: u32,
    pub cull_margin_px: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_pool_size: RenderConfig::MAX_POOL_SIZE,
            native_probe_attempts: RenderConfig::NATIVE_PROBE_ATTEMPTS,
            cull_margin_px: RenderConfig::CULL_MARGIN_PX,
        }
    }
}

impl BridgeSettings {
    /// Parse settings from a JSON string. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| BridgeError::io_with_path(e, path))?;
        Self::from_json_str(&json)
    }

    /// Reject values that would stall the loop or disable pooling entirely.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 5] = [
            ("timing.tick_interval_ms", self.timing.tick_interval_ms > 0),
            (
                "timing.cleanup_interval_ms",
                self.timing.cleanup_interval_ms > 0,
            ),
            (
                "discovery.settled_scan_every",
                self.discovery.settled_scan_every > 0,
            ),
            ("render.max_pool_size", self.render.max_pool_size > 0),
            (
                "discovery.frontier_limit",
                self.discovery.frontier_limit > 0,
            ),
        ];

        for (field, ok) in checks {
            if !ok {
                return Err(BridgeError::Config {
                    message: format!("{} must be greater than zero", field),
                });
            }
        }
        Ok(())
    }
}

impl PortalSettings {
    /// Priority for a source name, falling back to the default.
    pub fn priority_of(&self, source: &str) -> i32 {
        self.priorities
            .get(source)
            .copied()
            .unwrap_or(self.default_priority)
    }

    pub fn is_disabled(&self, source: &str) -> bool {
        self.disabled_sources.iter().any(|s| s == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_constants() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.timing.tick_interval_ms, 500);
        assert_eq!(settings.discovery.settled_scan_every, 10);
        assert_eq!(settings.render.max_pool_size, 100);
        assert_eq!(settings.registry.max_entry_age_ms, 300_000);
        assert_eq!(settings.portal.lock_timeout_ms, 5000);
    }

    #[test]
    fn test_priority_lookup() {
        let portal = PortalSettings::default();
        assert_eq!(portal.priority_of(sources::MAP_EVENT), 100);
        assert_eq!(portal.priority_of(sources::EXTERNAL_POLL), 50);
        assert_eq!(portal.priority_of("something_new"), 30);
        assert!(portal.is_disabled(sources::NETWORK_INFERENCE));
        assert!(!portal.is_disabled(sources::INTERACTION));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings =
            BridgeSettings::from_json_str(r#"{"render": {"max_pool_size": 12}}"#).unwrap();
        assert_eq!(settings.render.max_pool_size, 12);
        assert_eq!(settings.render.native_probe_attempts, 5);
        assert_eq!(settings.timing.tick_interval_ms, 500);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = BridgeSettings::from_json_str(r#"{"timing": {"tick_interval_ms": 0}}"#);
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"discovery": {{"settled_scan_every": 4}}}}"#).unwrap();

        let settings = BridgeSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.discovery.settled_scan_every, 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = BridgeSettings::from_json_file("/nonexistent/waymark.json");
        assert!(matches!(result, Err(BridgeError::Io { path: Some(_), .. })));
    }
}
