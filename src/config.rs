use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::render::ResourceKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub extraction: ExtractionConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub metrics: MetricsConfig,
    /// Per-retailer overrides keyed by retailer id ("asda", "tesco", ...).
    pub retailers: HashMap<String, AdapterOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// Long-lived headless Chrome instances.
    Chrome,
    /// Plain HTTP fetch of the search page, no script execution.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub backend: RenderBackend,
    pub size: usize,
    pub acquire_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    pub blocked_resources: Vec<ResourceKind>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backend: RenderBackend::Chrome,
            size: 3,
            acquire_timeout_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
            chrome_path: None,
            blocked_resources: vec![ResourceKind::Image, ResourceKind::Font, ResourceKind::Media],
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub navigation_timeout_ms: u64,
    pub selector_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 15_000,
            selector_timeout_ms: 3_000,
            poll_interval_ms: 100,
        }
    }
}

impl ExtractionConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Longest accepted cache TTL: 30 days.
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Periodic removal of expired entries. Reads evict lazily either way.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            sweep_interval_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Share one extraction between concurrent misses for the same key.
    pub coalesce_inflight: bool,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            coalesce_inflight: true,
            retry_attempts: 0,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOverride {
    pub url_template: Option<String>,
    pub selectors: Option<Vec<String>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Environment variables with prefix "BASKET", e.g. BASKET__POOL__SIZE=4
            .add_source(Environment::with_prefix("BASKET").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.pool.chrome_path.is_none() {
            config.pool.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    /// Structural checks only; retailer templates and selectors are checked
    /// when the adapter registry is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port must be greater than 0".into()));
        }

        if self.server.request_timeout == 0 {
            return Err(ConfigError::Message("Server request_timeout must be greater than 0".into()));
        }

        if self.pool.size == 0 {
            return Err(ConfigError::Message("Pool size must be greater than 0".into()));
        }

        if self.pool.acquire_timeout_ms == 0 {
            return Err(ConfigError::Message("Pool acquire_timeout_ms must be greater than 0".into()));
        }

        if self.pool.blocked_resources.contains(&ResourceKind::Document) {
            return Err(ConfigError::Message("Pool blocked_resources cannot include document".into()));
        }

        if self.extraction.navigation_timeout_ms == 0 || self.extraction.selector_timeout_ms == 0 {
            return Err(ConfigError::Message("Extraction timeouts must be greater than 0".into()));
        }

        if self.extraction.poll_interval_ms == 0 {
            return Err(ConfigError::Message("Extraction poll_interval_ms must be greater than 0".into()));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Message("Cache ttl_secs must be greater than 0".into()));
        }

        if self.cache.ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Message(format!(
                "Cache ttl_secs must be at most {} (30 days)",
                MAX_CACHE_TTL_SECS
            )));
        }

        if self.cache.sweep_interval_secs == Some(0) {
            return Err(ConfigError::Message("Cache sweep_interval_secs must be greater than 0".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}
