//! Engine tunables and their defaults.

use std::collections::HashMap;
use std::time::Duration;

use tally_core::DurationConfig;

/// Tunables of the aggregation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub duration: DurationConfig,
    /// Time between scheduled aggregation runs.
    pub aggregation_interval: Duration,
    /// Users aggregated in parallel during one run.
    pub aggregation_workers: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    /// Heartbeats inserted per transaction during import.
    pub import_batch_size: usize,
    /// After each run, heartbeats from summarised days older than this are
    /// deleted.
    pub retention: Option<chrono::Duration>,
    /// Extension to language overrides applied for every user.
    pub custom_languages: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duration: DurationConfig::default(),
            aggregation_interval: Duration::from_secs(60 * 60),
            aggregation_workers: 4,
            cache_ttl: Duration::from_secs(5 * 60),
            cache_capacity: 10_000,
            import_batch_size: 3000,
            retention: None,
            custom_languages: HashMap::new(),
        }
    }
}
