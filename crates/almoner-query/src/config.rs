//! # Query Configuration
//!
//! Defaults for the query client.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ALMONER_STALE_TIME_MS=10000                                        │
//! │     ALMONER_GC_TIME_MS=60000                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/admin/query.toml (Linux)                                 │
//! │     ~/Library/Application Support/org.almoner.admin/query.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     staleTime 30 s, gcTime 5 min, drain timeout 5 s                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # query.toml
//! [cache]
//! stale_time_ms = 30000
//! gc_time_ms = 300000
//!
//! [client]
//! name = "admin"
//! drain_timeout_ms = 5000
//! ```
//!
//! Per-query options passed to `use_query` override the `[cache]` defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{QueryError, QueryResult};
use crate::store::QueryOptions;

// =============================================================================
// Cache Settings
// =============================================================================

/// Default freshness and retention windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// How long fetched data counts as fresh (milliseconds).
    /// Zero means every request refetches.
    #[serde(default = "default_stale_time")]
    pub stale_time_ms: u64,

    /// How long an unobserved entry is kept before eviction (milliseconds).
    #[serde(default = "default_gc_time")]
    pub gc_time_ms: u64,
}

fn default_stale_time() -> u64 {
    30_000
}

fn default_gc_time() -> u64 {
    300_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            stale_time_ms: default_stale_time(),
            gc_time_ms: default_gc_time(),
        }
    }
}

// =============================================================================
// Client Settings
// =============================================================================

/// Client lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Name used in log lines (several clients may share a process in tests).
    #[serde(default = "default_client_name")]
    pub name: String,

    /// How long `shutdown` waits for in-flight fetches (milliseconds).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_client_name() -> String {
    "admin".to_string()
}

fn default_drain_timeout() -> u64 {
    5_000
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            name: default_client_name(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

// =============================================================================
// Main Query Configuration
// =============================================================================

/// Complete query client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub client: ClientSettings,
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (query.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> QueryResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading query config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load query config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> QueryResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| QueryError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Query config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> QueryResult<()> {
        // A zero GC window would evict an entry between two renders
        if self.cache.gc_time_ms == 0 {
            return Err(QueryError::InvalidConfig(
                "gc_time_ms must be greater than 0".into(),
            ));
        }

        if self.client.name.trim().is_empty() {
            return Err(QueryError::InvalidConfig("client name is empty".into()));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_millis("ALMONER_STALE_TIME_MS") {
            debug!(stale_time_ms = ms, "Overriding stale time from environment");
            self.cache.stale_time_ms = ms;
        }

        if let Some(ms) = env_millis("ALMONER_GC_TIME_MS") {
            debug!(gc_time_ms = ms, "Overriding gc time from environment");
            self.cache.gc_time_ms = ms;
        }

        if let Some(ms) = env_millis("ALMONER_DRAIN_TIMEOUT_MS") {
            self.client.drain_timeout_ms = ms;
        }

        if let Ok(name) = std::env::var("ALMONER_CLIENT_NAME") {
            self.client.name = name;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "almoner", "admin")
            .map(|dirs| dirs.config_dir().join("query.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Default per-query options derived from `[cache]`.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            stale_time: Duration::from_millis(self.cache.stale_time_ms),
            gc_time: Duration::from_millis(self.cache.gc_time_ms),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.client.drain_timeout_ms)
    }
}

fn env_millis(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!(var, value = %raw, "Ignoring non-numeric duration in environment");
            None
        }
    }
}
