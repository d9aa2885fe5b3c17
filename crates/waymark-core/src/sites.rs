//! Per-site configuration lookup.
//!
//! Provides:
//! - Domain normalization (scheme, port, path, `www.` and trailing dot stripped)
//! - Alias table, exact match, label-wise suffix match, default fallback
//! - In-memory memoization of resolved configs with a TTL

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mini_moka::sync::Cache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::{RegistryConfig, RenderConfig};
use crate::error::{BridgeError, Result};

/// Lifetime of a memoized lookup.
const CACHE_TTL: Duration = Duration::from_secs(600);
const CACHE_CAPACITY: u64 = 256;

/// Marker appearance overrides for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub radius_px: f64,
    pub stroke_width_px: f64,
    pub logo_size_px: f64,
    pub z_index: i32,
    pub labels: bool,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            radius_px: RenderConfig::MARKER_RADIUS_PX,
            stroke_width_px: RenderConfig::STROKE_WIDTH_PX,
            logo_size_px: RenderConfig::LOGO_SIZE_PX,
            z_index: RenderConfig::SURFACE_Z_INDEX,
            labels: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteFeatures {
    pub overlay_enabled: bool,
}

impl Default for SiteFeatures {
    fn default() -> Self {
        Self {
            overlay_enabled: true,
        }
    }
}

/// Marker elements the common map libraries and embeds put on the page.
pub const DEFAULT_NATIVE_SELECTORS: &[&str] = &[
    ".leaflet-marker-icon",
    ".mapboxgl-marker",
    ".maplibregl-marker",
    "gmp-advanced-marker",
    "[aria-roledescription=marker]",
    "[data-marker-id]",
    "img[src*=spotlight-poi]",
];

/// How to recognise markers the site renders itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeMode {
    /// Never look for native markers.
    Off,
    /// Any element matching one of the selectors counts as a native marker.
    #[default]
    Selectors,
    /// Elements carrying coordinate attributes are matched against the POIs.
    Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeDetection {
    pub mode: NativeMode,
    pub selectors: Vec<String>,
    pub lat_attr: String,
    pub lng_attr: String,
    /// Maximum per-axis difference in degrees. Zero means exact match.
    pub tolerance: f64,
    /// Share of POIs that must match before native markers are assumed.
    pub min_match_ratio: f64,
}

impl Default for NativeDetection {
    fn default() -> Self {
        Self {
            mode: NativeMode::Selectors,
            selectors: DEFAULT_NATIVE_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            lat_attr: "data-lat".to_string(),
            lng_attr: "data-lng".to_string(),
            tolerance: 1e-4,
            min_match_ratio: 0.5,
        }
    }
}

/// Configuration resolved once per registry entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Human-readable label, for logs.
    pub name: String,
    /// Extra container selectors discovery should try on this site.
    pub container_selectors: Vec<String>,
    pub style: MarkerStyle,
    pub features: SiteFeatures,
    pub native: NativeDetection,
}

/// Lookup of per-domain configuration.
pub trait SiteConfigProvider {
    /// Resolve the config for a domain. Never fails: unknown domains get
    /// the default config.
    fn resolve(&self, domain: &str) -> Arc<SiteConfig>;
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
            .expect("static domain regex")
    })
}

/// Normalize a domain or URL to a bare lower-case host name.
///
/// Returns the unknown-domain marker for anything that does not look like a
/// host name after normalization.
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim().to_ascii_lowercase();
    let candidate = if trimmed.contains("://") {
        Url::parse(&trimmed)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
    } else {
        Url::parse(&format!("http://{}", trimmed))
            .ok()
            .and_then(|u| u.host_str().map(String::from))
    };

    let Some(host) = candidate else {
        return RegistryConfig::UNKNOWN_DOMAIN.to_string();
    };
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    if host.is_empty() || !domain_re().is_match(host) {
        return RegistryConfig::UNKNOWN_DOMAIN.to_string();
    }
    host.to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SiteTableFile {
    default: SiteConfig,
    sites: HashMap<String, SiteConfig>,
    aliases: HashMap<String, String>,
}

/// In-memory site table with memoized lookups.
pub struct SiteConfigTable {
    default: Arc<SiteConfig>,
    sites: HashMap<String, Arc<SiteConfig>>,
    aliases: HashMap<String, String>,
    cache: Cache<String, Arc<SiteConfig>>,
}

impl Default for SiteConfigTable {
    fn default() -> Self {
        Self::new(SiteConfig::default())
    }
}

impl SiteConfigTable {
    pub fn new(default: SiteConfig) -> Self {
        Self {
            default: Arc::new(default),
            sites: HashMap::new(),
            aliases: HashMap::new(),
            cache: Cache::builder()
                .time_to_live(CACHE_TTL)
                .max_capacity(CACHE_CAPACITY)
                .build(),
        }
    }

    pub fn with_site(mut self, domain: &str, config: SiteConfig) -> Self {
        self.sites
            .insert(normalize_domain(domain), Arc::new(config));
        self.cache.invalidate_all();
        self
    }

    /// Treat `alias` as `target` for lookups (regional or legacy domains).
    pub fn with_alias(mut self, alias: &str, target: &str) -> Self {
        self.aliases
            .insert(normalize_domain(alias), normalize_domain(target));
        self.cache.invalidate_all();
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: SiteTableFile = serde_json::from_str(json)?;
        let mut table = Self::new(file.default);
        for (domain, config) in file.sites {
            table = table.with_site(&domain, config);
        }
        for (alias, target) in file.aliases {
            table = table.with_alias(&alias, &target);
        }
        Ok(table)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| BridgeError::io_with_path(e, path))?;
        Self::from_json_str(&json)
    }

    pub fn default_config(&self) -> Arc<SiteConfig> {
        self.default.clone()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Uncached lookup of an already-normalized domain.
    fn lookup(&self, domain: &str) -> Arc<SiteConfig> {
        let domain = self.aliases.get(domain).map(String::as_str).unwrap_or(domain);
        if let Some(config) = self.sites.get(domain) {
            return config.clone();
        }

        // Drop leading labels one at a time: a.b.shop.example -> b.shop.example -> ...
        let mut rest = domain;
        while let Some((_, parent)) = rest.split_once('.') {
            let parent = self.aliases.get(parent).map(String::as_str).unwrap_or(parent);
            if let Some(config) = self.sites.get(parent) {
                return config.clone();
            }
            rest = parent;
        }
        self.default.clone()
    }
}

impl SiteConfigProvider for SiteConfigTable {
    fn resolve(&self, domain: &str) -> Arc<SiteConfig> {
        let key = normalize_domain(domain);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let config = self.lookup(&key);
        debug!("Resolved site config for {}: {}", key, config.name);
        self.cache.insert(key, config.clone());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn named(name: &str) -> SiteConfig {
        SiteConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://WWW.Shop.Example:8443/a?b"), "shop.example");
        assert_eq!(normalize_domain("maps.example."), "maps.example");
        assert_eq!(normalize_domain("a.example/path"), "a.example");
        assert_eq!(normalize_domain(""), "unknown");
        assert_eq!(normalize_domain("not a domain"), "unknown");
    }

    #[test]
    fn test_exact_suffix_and_default() {
        let table = SiteConfigTable::new(named("default")).with_site("shop.example", named("shop"));

        assert_eq!(table.resolve("shop.example").name, "shop");
        assert_eq!(table.resolve("https://eu.stores.shop.example/x").name, "shop");
        assert_eq!(table.resolve("other.example").name, "default");
        assert_eq!(table.resolve("unknown").name, "default");
    }

    #[test]
    fn test_alias_lookup() {
        let table = SiteConfigTable::default()
            .with_site("shop.example", named("shop"))
            .with_alias("shop.co.example", "shop.example");

        assert_eq!(table.resolve("www.shop.co.example").name, "shop");
        assert_eq!(table.resolve("m.shop.co.example").name, "shop");
    }

    #[test]
    fn test_cached_result_is_shared() {
        let table = SiteConfigTable::default().with_site("a.example", named("a"));
        let first = table.resolve("a.example");
        let second = table.resolve("A.EXAMPLE");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "default": {{"name": "fallback"}},
                "sites": {{"maps.example": {{"name": "maps", "native": {{"mode": "selectors", "selectors": [".pin"]}}}}}},
                "aliases": {{"karten.example": "maps.example"}}
            }}"#
        )
        .unwrap();

        let table = SiteConfigTable::from_json_file(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        let config = table.resolve("karten.example");
        assert_eq!(config.name, "maps");
        assert_eq!(config.native.mode, NativeMode::Selectors);
        assert_eq!(config.native.lat_attr, "data-lat");
        assert_eq!(table.resolve("x.example").name, "fallback");
    }

    #[test]
    fn test_native_detection_defaults_and_opt_out() {
        let fallback = SiteConfig::default();
        assert_eq!(fallback.native.mode, NativeMode::Selectors);
        assert_eq!(fallback.native.selectors.len(), DEFAULT_NATIVE_SELECTORS.len());

        let opted_out: SiteConfig =
            serde_json::from_str(r#"{"native": {"mode": "off"}}"#).unwrap();
        assert_eq!(opted_out.native.mode, NativeMode::Off);
        assert_eq!(opted_out.native.selectors.len(), DEFAULT_NATIVE_SELECTORS.len());
    }
}
