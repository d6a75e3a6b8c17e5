//! Configuration loading and management.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tally_core::DurationConfig;
use tally_engine::EngineConfig;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Gap after which two heartbeats no longer belong to the same span.
    pub heartbeat_timeout_secs: i64,
    /// Time credited for the end of every span.
    pub span_epsilon_secs: i64,
    pub aggregation_interval_secs: u64,
    pub aggregation_workers: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    pub import_batch_size: usize,
    /// Heartbeats older than this many days are purged. Kept forever when unset.
    pub retention_days: Option<u32>,
    /// Extension to language overrides applied for every user.
    pub custom_languages: HashMap<String, String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("heartbeat_timeout_secs", &self.heartbeat_timeout_secs)
            .field("aggregation_interval_secs", &self.aggregation_interval_secs)
            .field("retention_days", &self.retention_days)
            .field("custom_languages", &self.custom_languages.len())
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let engine = EngineConfig::default();
        Self {
            database_path: data_dir.join("tally.db"),
            heartbeat_timeout_secs: engine.duration.idle_threshold.num_seconds(),
            span_epsilon_secs: engine.duration.span_epsilon.num_seconds(),
            aggregation_interval_secs: engine.aggregation_interval.as_secs(),
            aggregation_workers: engine.aggregation_workers,
            cache_ttl_secs: engine.cache_ttl.as_secs(),
            cache_capacity: engine.cache_capacity,
            import_batch_size: engine.import_batch_size,
            retention_days: None,
            custom_languages: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // TALLY_DATABASE_PATH, TALLY_RETENTION_DAYS, ...
        figment = figment.merge(Env::prefixed("TALLY_"));

        figment.extract()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            duration: DurationConfig::from_secs(self.heartbeat_timeout_secs, self.span_epsilon_secs),
            aggregation_interval: Duration::from_secs(self.aggregation_interval_secs),
            aggregation_workers: self.aggregation_workers,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_capacity: self.cache_capacity,
            import_batch_size: self.import_batch_size,
            retention: self
                .retention_days
                .map(|days| chrono::Duration::days(i64::from(days))),
            custom_languages: self.custom_languages.clone(),
        }
    }
}

/// Returns the platform-specific config directory for tally.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tally"))
}

/// Returns the platform-specific data directory for tally.
///
/// On Linux: `~/.local/share/tally`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tally"))
}
