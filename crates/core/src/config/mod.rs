//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PAGEWIRE_*)
//! 2. TOML config file (if PAGEWIRE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PAGEWIRE_*)
/// 2. TOML config file (if PAGEWIRE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection string for the external shared cache.
    ///
    /// Set via PAGEWIRE_SHARED_CACHE_URL. When unset or unreachable the
    /// dedup cache runs on its local map only.
    #[serde(default)]
    pub shared_cache_url: Option<String>,

    /// Path to the offline chapter database.
    #[serde(default = "default_offline_db_path")]
    pub offline_db_path: PathBuf,

    /// Address the proxy server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL clients use to reach the proxy.
    #[serde(default = "default_proxy_base_url")]
    pub proxy_base_url: String,

    /// User-Agent string for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Dedup cache entry lifetime in seconds (7 days).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Interval between expired-entry sweeps in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on concurrent outbound sockets.
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,

    /// Idle sockets kept per host for reuse.
    #[serde(default = "default_max_idle_sockets")]
    pub max_idle_sockets: usize,

    /// Base delay for exponential retry backoff in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Maximum body size for general fetches.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Timeout for general fetches in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempt ceiling for general fetches.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum body size for image fetches.
    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: usize,

    /// Timeout for image fetches in milliseconds.
    #[serde(default = "default_image_timeout_ms")]
    pub image_timeout_ms: u64,

    /// Attempt ceiling for image fetches.
    #[serde(default = "default_image_max_retries")]
    pub image_max_retries: u32,

    /// Simultaneous loads in the client priority queue.
    #[serde(default = "default_queue_concurrency")]
    pub queue_concurrency: usize,

    /// Results kept by the client queue's LRU cache.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request timeout inside the client queue in milliseconds.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// Client-side result lifetime in seconds (24 hours).
    #[serde(default = "default_queue_result_ttl_secs")]
    pub queue_result_ttl_secs: u64,

    /// Timeout of the direct tier when downloading offline, in milliseconds.
    #[serde(default = "default_direct_timeout_ms")]
    pub direct_timeout_ms: u64,

    /// Timeout of the proxied tier when downloading offline, in milliseconds.
    #[serde(default = "default_proxied_timeout_ms")]
    pub proxied_timeout_ms: u64,

    /// Default `w` for proxied image requests.
    #[serde(default = "default_width")]
    pub default_width: u32,

    /// Default `q` for proxied image requests.
    #[serde(default = "default_quality")]
    pub default_quality: u8,

    /// External transformation service, with `{url}`, `{w}` and `{q}` placeholders.
    #[serde(default)]
    pub transform_url_template: Option<String>,

    /// Refuse to proxy private, loopback and link-local addresses.
    #[serde(default = "default_true")]
    pub block_private_addresses: bool,
}

fn default_offline_db_path() -> PathBuf {
    PathBuf::from("./pagewire-offline.sqlite")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".into()
}

fn default_proxy_base_url() -> String {
    "http://127.0.0.1:8787".into()
}

fn default_user_agent() -> String {
    "pagewire/0.1".into()
}

fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_sockets() -> usize {
    10
}

fn default_max_idle_sockets() -> usize {
    5
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_image_max_bytes() -> usize {
    20_971_520 // 20MB
}

fn default_image_timeout_ms() -> u64 {
    30_000
}

fn default_image_max_retries() -> u32 {
    2
}

fn default_queue_concurrency() -> usize {
    15
}

fn default_queue_capacity() -> usize {
    100
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

fn default_queue_result_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_direct_timeout_ms() -> u64 {
    15_000
}

fn default_proxied_timeout_ms() -> u64 {
    20_000
}

fn default_width() -> u32 {
    1200
}

fn default_quality() -> u8 {
    80
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shared_cache_url: None,
            offline_db_path: default_offline_db_path(),
            bind_addr: default_bind_addr(),
            proxy_base_url: default_proxy_base_url(),
            user_agent: default_user_agent(),
            cache_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_sockets: default_max_sockets(),
            max_idle_sockets: default_max_idle_sockets(),
            retry_base_ms: default_retry_base_ms(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            image_max_bytes: default_image_max_bytes(),
            image_timeout_ms: default_image_timeout_ms(),
            image_max_retries: default_image_max_retries(),
            queue_concurrency: default_queue_concurrency(),
            queue_capacity: default_queue_capacity(),
            queue_timeout_ms: default_queue_timeout_ms(),
            queue_result_ttl_secs: default_queue_result_ttl_secs(),
            direct_timeout_ms: default_direct_timeout_ms(),
            proxied_timeout_ms: default_proxied_timeout_ms(),
            default_width: default_width(),
            default_quality: default_quality(),
            transform_url_template: None,
            block_private_addresses: true,
        }
    }
}

impl AppConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn queue_result_ttl(&self) -> Duration {
        Duration::from_secs(self.queue_result_ttl_secs)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    pub fn proxied_timeout(&self) -> Duration {
        Duration::from_millis(self.proxied_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PAGEWIRE_`
    /// 2. TOML file from `PAGEWIRE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PAGEWIRE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PAGEWIRE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// The transformation template, if configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no template is set.
    pub fn require_transform_template(&self) -> Result<&str, ConfigError> {
        self.transform_url_template.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "transform_url_template".into(),
            hint: "Set PAGEWIRE_TRANSFORM_URL_TEMPLATE environment variable".into(),
        })
    }
}
