//! Aggregation engine for heartbeat summaries.
//!
//! [`Engine`] ties the pieces together:
//! - a periodic scheduler that persists one summary per user and UTC day
//! - range retrieval that combines persisted days with live heartbeats
//! - a bounded TTL cache in front of retrieval, invalidated per user
//! - ingestion, import, language back-fill and account deletion
//!
//! Storage and CPU heavy work runs on blocking threads; the async methods
//! only await it.

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod error;
pub mod import;
pub mod ingest;
pub mod retrieval;
pub mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tally_core::{
    Alias, Filters, HeartbeatSource, HeartbeatStore, LanguageMapping, RawHeartbeat, RuleStore,
    Summary, SummaryStore, UserId, WatermarkStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use aggregation::{Aggregator, RunReport, UserAggregationState};
pub use cache::{CacheKey, Generation, SummaryCache};
pub use config::EngineConfig;
pub use error::EngineError;
pub use import::{ImportReport, JsonLinesError, JsonLinesSource};
pub use ingest::IngestReport;
pub use scheduler::SchedulerState;

/// Everything the engine needs from a storage backend.
pub trait EngineStore:
    HeartbeatStore + RuleStore + SummaryStore + WatermarkStore + Send + Sync + 'static
{
}

impl<T> EngineStore for T where
    T: HeartbeatStore + RuleStore + SummaryStore + WatermarkStore + Send + Sync + 'static
{
}

/// Cheap to clone; clones share the store, aggregator and cache.
pub struct Engine<S> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
    aggregator: Arc<Aggregator<S>>,
    cache: SummaryCache,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            aggregator: Arc::clone(&self.aggregator),
            cache: self.cache.clone(),
        }
    }
}

async fn blocking<T, F>(task: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(task).await?
}

impl<S: EngineStore> Engine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self, EngineError> {
        let config = Arc::new(config);
        let aggregator = Arc::new(Aggregator::new(Arc::clone(&store), Arc::clone(&config))?);
        let cache = SummaryCache::new(config.cache_ttl, config.cache_capacity);
        Ok(Self {
            store,
            config,
            aggregator,
            cache,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.aggregator.state()
    }

    pub async fn user_state(&self, user_id: &UserId) -> Result<UserAggregationState, EngineError> {
        let aggregator = Arc::clone(&self.aggregator);
        let user_id = user_id.clone();
        blocking(move || aggregator.user_state(&user_id)).await
    }

    /// Summary of `[from, to)`, served from the cache when possible.
    pub async fn get_summary(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: Option<Filters>,
    ) -> Result<Arc<Summary>, EngineError> {
        let key = CacheKey::new(user_id.clone(), from, to, filters);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let seen = self.cache.generation(user_id);

        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let query = key.clone();
        let summary = blocking(move || {
            retrieval::compute_summary(
                &*store,
                &config,
                &query.user_id,
                query.from,
                query.to,
                query.filters.as_ref(),
            )
        })
        .await?;

        let summary = Arc::new(summary);
        self.cache.insert(key, Arc::clone(&summary), seen);
        Ok(summary)
    }

    /// Rebuilds every persisted summary of a user from raw heartbeats.
    ///
    /// Waits for an aggregation of the same user that is already running.
    pub async fn regenerate_summaries(&self, user_id: &UserId) -> Result<usize, EngineError> {
        self.spawn_regeneration(user_id.clone()).await?
    }

    /// Starts a regeneration in the background.
    pub fn spawn_regeneration(&self, user_id: UserId) -> JoinHandle<Result<usize, EngineError>> {
        let aggregator = Arc::clone(&self.aggregator);
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            let days = aggregator.regenerate(&user_id, Utc::now());
            cache.invalidate_user(&user_id);
            days
        })
    }

    /// Applies a language mapping to already stored heartbeats without a
    /// language. Safe to rerun.
    pub async fn backfill_language(&self, mapping: LanguageMapping) -> Result<usize, EngineError> {
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        blocking(move || {
            let updated = store
                .backfill_language(&mapping)
                .map_err(EngineError::store)?;
            cache.invalidate_user(&mapping.user_id);
            info!(user = %mapping.user_id, extension = %mapping.extension, updated, "back-filled languages");
            Ok(updated)
        })
        .await
    }

    /// Validates and stores heartbeats. Malformed ones are counted and
    /// dropped without failing the batch.
    pub async fn ingest(
        &self,
        heartbeats: Vec<RawHeartbeat>,
        fallback_user: Option<UserId>,
    ) -> Result<IngestReport, EngineError> {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let aggregator = Arc::clone(&self.aggregator);
        blocking(move || {
            ingest::ingest(
                &*store,
                &config,
                &aggregator,
                heartbeats,
                fallback_user.as_ref(),
            )
        })
        .await
    }

    /// Imports a user's history from `source`, resuming after the latest
    /// heartbeat previously imported from the same origin.
    pub async fn import<H>(&self, mut source: H, user_id: &UserId) -> Result<ImportReport, EngineError>
    where
        H: HeartbeatSource + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let aggregator = Arc::clone(&self.aggregator);
        let cache = self.cache.clone();
        let user_id = user_id.clone();
        blocking(move || {
            let report = import::import(&*store, &config, &aggregator, &mut source, &user_id);
            cache.invalidate_user(&user_id);
            report
        })
        .await
    }

    /// Deletes all heartbeats, summaries and aggregation state of a user.
    pub async fn delete_user_data(&self, user_id: &UserId) -> Result<usize, EngineError> {
        let aggregator = Arc::clone(&self.aggregator);
        let cache = self.cache.clone();
        let user_id = user_id.clone();
        blocking(move || {
            let deleted = aggregator.delete_user(&user_id);
            cache.invalidate_user(&user_id);
            deleted
        })
        .await
    }

    /// Stores an alias. Persisted summaries keep their keys until the user
    /// is regenerated, but reads resolve the new alias immediately.
    pub async fn add_alias(&self, alias: Alias) -> Result<(), EngineError> {
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        blocking(move || {
            store.add_alias(&alias).map_err(EngineError::store)?;
            cache.invalidate_user(&alias.user_id);
            Ok(())
        })
        .await
    }

    pub async fn add_language_mapping(&self, mapping: LanguageMapping) -> Result<(), EngineError> {
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        blocking(move || {
            store
                .add_language_mapping(&mapping)
                .map_err(EngineError::store)?;
            cache.invalidate_user(&mapping.user_id);
            Ok(())
        })
        .await
    }

    /// Runs one aggregation pass now.
    pub async fn run_aggregation(&self) -> Result<RunReport, EngineError> {
        let aggregator = Arc::clone(&self.aggregator);
        blocking(move || aggregator.run_once(Utc::now(), &CancellationToken::new())).await
    }

    /// Aggregates on the configured interval until `shutdown` is cancelled.
    pub async fn run_scheduler(&self, shutdown: CancellationToken) {
        scheduler::run(
            Arc::clone(&self.aggregator),
            self.config.aggregation_interval,
            shutdown,
        )
        .await;
    }
}
