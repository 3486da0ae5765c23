//! # Hybrid Cache Configuration
//!
//! Operational configuration for the two cache backends. Loaded once at
//! startup (environment variables prefixed `REDIS_`, optionally layered over a
//! TOML file) and immutable for the life of the process; changing it requires
//! a restart.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hybrid_cache::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! println!("write mode: {}", config.write_mode);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// URL scheme selecting the in-process [`MemoryStore`](crate::cache::MemoryStore)
pub const MEMORY_URL_SCHEME: &str = "memory://";

/// Which backend is tried first on reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPreference {
    #[default]
    Local,
    Cloud,
}

/// Where writes go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Write to every connected backend
    #[default]
    Dual,
    /// Write to the local backend only
    #[serde(alias = "local_only")]
    LocalOnly,
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Cloud => f.write_str("cloud"),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dual => f.write_str("dual"),
            Self::LocalOnly => f.write_str("local-only"),
        }
    }
}

impl FromStr for ReadPreference {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            other => Err(ConfigurationError::invalid_value(
                "read_preference",
                other,
                "expected 'local' or 'cloud'",
            )),
        }
    }
}

impl FromStr for WriteMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dual" => Ok(Self::Dual),
            "local-only" | "local_only" => Ok(Self::LocalOnly),
            other => Err(ConfigurationError::invalid_value(
                "write_mode",
                other,
                "expected 'dual' or 'local-only'",
            )),
        }
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Root configuration for the hybrid cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridCacheConfig {
    /// Address of the low-latency backend
    pub local_url: Option<String>,

    /// Address of the durable/remote backend
    pub cloud_url: Option<String>,

    pub write_mode: WriteMode,

    pub read_preference: ReadPreference,

    /// Reserved for reconciliation between backends; carries no behavior
    pub sync_enabled: bool,

    pub connect_timeout_ms: u64,

    /// Per-command timeout applied inside each store
    pub operation_timeout_ms: u64,

    /// TTL used by the facade when callers don't pass one
    pub default_ttl_seconds: u64,

    pub shutdown_grace_period_ms: u64,

    pub reconnect: ReconnectConfig,
}

impl Default for HybridCacheConfig {
    fn default() -> Self {
        Self {
            local_url: Some("redis://127.0.0.1:6379".to_string()),
            cloud_url: None,
            write_mode: WriteMode::Dual,
            read_preference: ReadPreference::Local,
            sync_enabled: false,
            connect_timeout_ms: 5_000,
            operation_timeout_ms: 2_000,
            default_ttl_seconds: crate::cache::DEFAULT_TTL.as_secs(),
            shutdown_grace_period_ms: 10_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl HybridCacheConfig {
    /// Config with both backends in-process, for tests and local development
    pub fn in_memory() -> Self {
        Self {
            local_url: Some(MEMORY_URL_SCHEME.to_string()),
            cloud_url: Some(MEMORY_URL_SCHEME.to_string()),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    /// Treat blank URLs (e.g. `REDIS_CLOUD_URL=`) as unset
    pub(crate) fn normalize(mut self) -> Self {
        let blank = |url: &Option<String>| url.as_deref().is_some_and(|u| u.trim().is_empty());
        if blank(&self.local_url) {
            self.local_url = None;
        }
        if blank(&self.cloud_url) {
            self.cloud_url = None;
        }
        self
    }

    /// Check values that would otherwise fail later, at first use
    pub fn validate(&self) -> ConfigResult<()> {
        if self.local_url.is_none() && self.cloud_url.is_none() {
            return Err(ConfigurationError::missing_required_field(
                "local_url or cloud_url",
                "hybrid cache configuration",
            ));
        }

        if self.write_mode == WriteMode::LocalOnly && self.local_url.is_none() {
            return Err(ConfigurationError::invalid_value(
                "write_mode",
                "local-only",
                "local-only writes require local_url",
            ));
        }

        for (field, url) in [("local_url", &self.local_url), ("cloud_url", &self.cloud_url)] {
            if let Some(url) = url {
                validate_url(field, url)?;
            }
        }

        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("operation_timeout_ms", self.operation_timeout_ms),
            ("reconnect.initial_backoff_ms", self.reconnect.initial_backoff_ms),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than zero",
                ));
            }
        }

        if self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms {
            return Err(ConfigurationError::invalid_value(
                "reconnect.max_backoff_ms",
                self.reconnect.max_backoff_ms.to_string(),
                "must be at least reconnect.initial_backoff_ms",
            ));
        }

        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "reconnect.multiplier",
                self.reconnect.multiplier.to_string(),
                "must be >= 1.0",
            ));
        }

        Ok(())
    }
}

fn validate_url(field: &str, url: &str) -> ConfigResult<()> {
    if url == MEMORY_URL_SCHEME {
        return Ok(());
    }
    redis::parse_redis_url(url)
        .map(|_| ())
        .ok_or_else(|| {
            ConfigurationError::invalid_value(
                field,
                crate::cache::stores::redis::redact_url(url),
                "not a valid redis:// or rediss:// URL",
            )
        })
}
