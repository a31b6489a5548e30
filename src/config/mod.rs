// src/config/mod.rs
//! Service configuration: `config/newsfeed.toml` (path overridable via
//! `NEWSFEED_CONFIG_PATH`) plus a handful of env overrides.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};
use tracing::{info, warn};

use crate::cache::{ReconnectPolicy, TieredCacheConfig};
use crate::catalog::DEFAULT_MIN_ACTIVE;
use crate::feed::FeedConfig;
use crate::selector::{SelectorConfig, DEFAULT_FRIENDLY, DEFAULT_OPPOSING, DEFAULT_SEARCH_RADIUS};

pub const DEFAULT_CONFIG_PATH: &str = "config/newsfeed.toml";
pub const ENV_CONFIG_PATH: &str = "NEWSFEED_CONFIG_PATH";

fn default_catalog_path() -> PathBuf {
    PathBuf::from("config/sources.json")
}
fn default_min_active() -> usize {
    DEFAULT_MIN_ACTIVE
}
fn default_poll_secs() -> u64 {
    5
}
fn default_friendly() -> usize {
    DEFAULT_FRIENDLY
}
fn default_opposing() -> usize {
    DEFAULT_OPPOSING
}
fn default_radius() -> f64 {
    DEFAULT_SEARCH_RADIUS
}
fn default_true() -> bool {
    true
}
fn default_max_entries() -> usize {
    crate::cache::lru::DEFAULT_MAX_ENTRIES
}
fn default_sweep_secs() -> u64 {
    60
}
fn default_key_prefix() -> String {
    "balanced-feed:".to_string()
}
fn default_op_timeout_ms() -> u64 {
    500
}
fn default_reconnect_base_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    10_000
}
fn default_reconnect_attempts() -> u32 {
    10
}
fn default_ttl_secs() -> u64 {
    1800
}
fn default_provider_timeout_ms() -> u64 {
    8_000
}
fn default_provider_kind() -> ProviderKind {
    ProviderKind::NewsApi
}
fn default_base_url() -> String {
    crate::provider::newsapi::DEFAULT_BASE_URL.to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_page_size() -> u32 {
    50
}
fn default_rate_limit() -> u32 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSection {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    #[serde(default = "default_min_active")]
    pub min_active: usize,
    /// Poll the catalog file and reload on change.
    #[serde(default)]
    pub watch: bool,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSection {
    #[serde(default = "default_friendly")]
    pub friendly_count: usize,
    #[serde(default = "default_opposing")]
    pub opposing_count: usize,
    #[serde(default = "default_radius")]
    pub search_radius: f64,
    #[serde(default = "default_true")]
    pub diversity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
    /// No URL → in-process tier only.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// Reject out-of-range coordinates instead of clamping them.
    #[serde(default)]
    pub strict_bias: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    NewsApi,
    Fixture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from NEWS_API_KEY.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    /// 0 disables rate limiting.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            min_active: default_min_active(),
            watch: false,
            poll_secs: default_poll_secs(),
        }
    }
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            friendly_count: default_friendly(),
            opposing_count: default_opposing(),
            search_radius: default_radius(),
            diversity: default_true(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            sweep_secs: default_sweep_secs(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_attempts: default_reconnect_attempts(),
        }
    }
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            provider_timeout_ms: default_provider_timeout_ms(),
            strict_bias: false,
        }
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            api_key: default_api_key(),
            page_size: default_page_size(),
            fixture_path: None,
        }
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub selector: SelectorSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub api: ApiSection,
}

impl AppConfig {
    /// Path from `NEWSFEED_CONFIG_PATH`, else `config/newsfeed.toml`.
    pub fn path_from_env() -> PathBuf {
        env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from the env-selected path. A missing file yields defaults; a
    /// malformed one is an error.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::path_from_env();
        let mut cfg = if path.exists() {
            Self::from_file(&path)?
        } else {
            info!(target: "config", path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        cfg.apply_env();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: AppConfig = toml::from_str(data)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env wins over the file.
    pub fn apply_env(&mut self) {
        if let Some(url) = non_empty_env("REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Some(path) = non_empty_env("CATALOG_PATH") {
            self.catalog.path = PathBuf::from(path);
        }
        if env::var("CATALOG_HOT_RELOAD").is_ok_and(|v| v == "1") {
            self.catalog.watch = true;
        }
        if let Some(key) = non_empty_env("NEWS_API_KEY") {
            if self.provider.api_key.trim().is_empty()
                || self.provider.api_key.trim().eq_ignore_ascii_case("env")
            {
                self.provider.api_key = key;
            }
        }
    }

    /// Clamp nonsensical values back to something usable.
    pub fn sanitize(&mut self) {
        if !(self.selector.search_radius.is_finite() && self.selector.search_radius > 0.0) {
            warn!(target: "config", radius = self.selector.search_radius, "invalid search_radius, using default");
            self.selector.search_radius = default_radius();
        }
        self.cache.max_entries = self.cache.max_entries.max(1);
        self.cache.sweep_secs = self.cache.sweep_secs.max(1);
        self.catalog.poll_secs = self.catalog.poll_secs.max(1);
        if self.cache.reconnect_max_ms < self.cache.reconnect_base_ms {
            std::mem::swap(
                &mut self.cache.reconnect_base_ms,
                &mut self.cache.reconnect_max_ms,
            );
        }
        if self
            .cache
            .redis_url
            .as_deref()
            .is_some_and(|u| u.trim().is_empty())
        {
            self.cache.redis_url = None;
        }
    }

    /// API key with the `"ENV"` placeholder resolved; empty when unset.
    pub fn resolved_api_key(&self) -> String {
        let k = self.provider.api_key.trim();
        if k.eq_ignore_ascii_case("env") {
            non_empty_env("NEWS_API_KEY").unwrap_or_default()
        } else {
            k.to_string()
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            friendly_count: self.selector.friendly_count,
            opposing_count: self.selector.opposing_count,
            search_radius: self.selector.search_radius,
            diversity: self.selector.diversity,
        }
    }

    pub fn cache_config(&self) -> TieredCacheConfig {
        TieredCacheConfig {
            max_entries: self.cache.max_entries,
            op_timeout: Duration::from_millis(self.cache.op_timeout_ms),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.cache.reconnect_base_ms),
                max_delay: Duration::from_millis(self.cache.reconnect_max_ms),
                max_attempts: self.cache.reconnect_max_attempts,
            },
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            ttl: Duration::from_secs(self.feed.ttl_secs),
            provider_timeout: Duration::from_millis(self.feed.provider_timeout_ms),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
