//! Incremental aggregation of heartbeats into persisted daily summaries.
//!
//! Each user has a durable watermark: the exclusive end of the last UTC day
//! that was summarised. A run picks up the heartbeats at or after the
//! watermark, summarises every closed day that has activity and only then
//! moves the watermark forward. A failed user keeps its old watermark and is
//! retried on the next run.
//!
//! Heartbeats that arrive for an already summarised day leave a stale mark
//! instead of touching the watermark, so ingestion never waits for a running
//! aggregation. The next aggregation of the user takes the mark and starts
//! from the earlier of the two.
//!
//! At most one aggregation per user runs at a time. Scheduled runs skip a
//! busy user, while regeneration and account deletion wait for it.
//!
//! Retention purges run after aggregation and only remove whole days that
//! are both older than the retention window and already summarised.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use serde::Serialize;
use tally_core::interval::{self, Interval};
use tally_core::{
    AliasResolver, Heartbeat, HeartbeatStore, LanguageMapper, RuleStore, Summary, SummaryBuilder,
    SummaryStore, UserId, WatermarkStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::scheduler::SchedulerState;
use crate::EngineStore;

/// Days loaded from the heartbeat store per query while aggregating.
const CHUNK_DAYS: i64 = 31;

/// Aggregation progress of one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserAggregationState {
    pub last_aggregated_at: Option<DateTime<Utc>>,
    /// Earliest summarised day that received heartbeats since.
    pub stale_from: Option<DateTime<Utc>>,
    pub in_progress: bool,
}

/// Outcome of aggregating a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    /// Another aggregation for the user was running.
    Busy,
    /// Nothing to do before the current day.
    UpToDate,
    /// Summaries were written for this many days.
    Aggregated { days: usize },
}

/// Totals of one aggregation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub users: usize,
    pub aggregated_days: usize,
    pub skipped: usize,
    pub failed: usize,
    pub purged_heartbeats: usize,
}

/// Users with an aggregation under way.
#[derive(Default)]
struct InProgress {
    users: Mutex<HashSet<UserId>>,
    released: Condvar,
}

impl InProgress {
    fn try_acquire(&self, user_id: &UserId) -> Option<UserGuard<'_>> {
        let mut users = self.users.lock();
        if !users.insert(user_id.clone()) {
            return None;
        }
        Some(UserGuard {
            registry: self,
            user_id: user_id.clone(),
        })
    }

    /// Blocks until no other aggregation holds the user.
    fn acquire(&self, user_id: &UserId) -> UserGuard<'_> {
        let mut users = self.users.lock();
        while users.contains(user_id) {
            self.released.wait(&mut users);
        }
        users.insert(user_id.clone());
        UserGuard {
            registry: self,
            user_id: user_id.clone(),
        }
    }

    fn is_held(&self, user_id: &UserId) -> bool {
        self.users.lock().contains(user_id)
    }
}

/// Releases the user's in-progress flag on drop.
struct UserGuard<'a> {
    registry: &'a InProgress,
    user_id: UserId,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        self.registry.users.lock().remove(&self.user_id);
        self.registry.released.notify_all();
    }
}

pub struct Aggregator<S> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
    in_progress: InProgress,
    state: Mutex<SchedulerState>,
    pool: rayon::ThreadPool,
}

impl<S: EngineStore> Aggregator<S> {
    pub fn new(store: Arc<S>, config: Arc<EngineConfig>) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.aggregation_workers.max(1))
            .thread_name(|index| format!("tally-aggregate-{index}"))
            .build()?;
        Ok(Self {
            store,
            config,
            in_progress: InProgress::default(),
            state: Mutex::new(SchedulerState::Idle),
            pool,
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    pub fn user_state(&self, user_id: &UserId) -> Result<UserAggregationState, EngineError> {
        Ok(UserAggregationState {
            last_aggregated_at: self.store.watermark(user_id).map_err(EngineError::store)?,
            stale_from: self.store.stale_from(user_id).map_err(EngineError::store)?,
            in_progress: self.in_progress.is_held(user_id),
        })
    }

    /// Users with a stale mark, or with heartbeats at or after their
    /// watermark and at least one closed day left to summarise.
    pub fn pending_users(&self, now: DateTime<Utc>) -> Result<Vec<UserId>, EngineError> {
        let today = interval::floor_day(now);
        let mut pending = Vec::new();
        for (user_id, latest) in self.store.latest_by_users().map_err(EngineError::store)? {
            let watermark = self.store.watermark(&user_id).map_err(EngineError::store)?;
            let stale = self.store.stale_from(&user_id).map_err(EngineError::store)?;
            let behind = stale.is_some_and(|from| from < today)
                || watermark.is_none_or(|mark| mark < today && latest >= mark);
            if behind {
                pending.push(user_id);
            }
        }
        Ok(pending)
    }

    /// One full pass over all pending users.
    pub fn run_once(
        &self,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        self.set_state(SchedulerState::Scanning);
        let result = self.run_pass(now, shutdown);
        self.set_state(SchedulerState::Idle);
        result
    }

    fn run_pass(
        &self,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let mut report = self.aggregate_pending(now, shutdown)?;
        if let Some(cutoff) = self.retention_cutoff(now) {
            report.purged_heartbeats = self.purge_expired(cutoff)?;
        }
        Ok(report)
    }

    fn aggregate_pending(
        &self,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let mut report = RunReport::default();
        let users = self.pending_users(now)?;
        report.users = users.len();
        if users.is_empty() {
            debug!("no users pending aggregation");
            return Ok(report);
        }
        self.set_state(SchedulerState::PerUserAggregating { users: users.len() });

        let outcomes: Vec<Option<Result<UserOutcome, EngineError>>> = self.pool.install(|| {
            users
                .par_iter()
                .map(|user_id| {
                    if shutdown.is_cancelled() {
                        return None;
                    }
                    Some(self.aggregate_user(user_id, now))
                })
                .collect()
        });

        for (user_id, outcome) in users.iter().zip(outcomes) {
            match outcome {
                Some(Ok(UserOutcome::Aggregated { days })) => report.aggregated_days += days,
                Some(Ok(UserOutcome::UpToDate)) => {}
                Some(Ok(UserOutcome::Busy)) | None => report.skipped += 1,
                Some(Err(err)) => {
                    report.failed += 1;
                    warn!(user = %user_id, error = %err, "aggregation failed, will retry next run");
                }
            }
        }
        info!(
            users = report.users,
            days = report.aggregated_days,
            skipped = report.skipped,
            failed = report.failed,
            "aggregation run finished"
        );
        Ok(report)
    }

    /// Aggregates one user unless another aggregation for it is running.
    pub fn aggregate_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome, EngineError> {
        let Some(_guard) = self.in_progress.try_acquire(user_id) else {
            debug!(user = %user_id, "aggregation already running, skipping");
            return Ok(UserOutcome::Busy);
        };
        self.aggregate_held(user_id, now)
    }

    /// Drops all persisted summaries of a user and rebuilds them from the
    /// full heartbeat history, waiting for a running aggregation first.
    pub fn regenerate(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let _guard = self.in_progress.acquire(user_id);
        SummaryStore::delete_by_user(&*self.store, user_id).map_err(EngineError::store)?;
        self.store
            .clear_watermark(user_id)
            .map_err(EngineError::store)?;
        let days = match self.aggregate_held(user_id, now)? {
            UserOutcome::Aggregated { days } => days,
            UserOutcome::UpToDate | UserOutcome::Busy => 0,
        };
        info!(user = %user_id, days, "regenerated summaries");
        Ok(days)
    }

    /// Start of the first day that is kept under the retention window.
    fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.config
            .retention
            .map(|retention| interval::floor_day(now - retention))
    }

    /// Deletes heartbeats before `cutoff`, but never from a day that is not
    /// summarised yet. A user without a watermark keeps everything.
    fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, EngineError> {
        let mut purged = 0;
        for (user_id, _) in self.store.latest_by_users().map_err(EngineError::store)? {
            let Some(watermark) = self.store.watermark(&user_id).map_err(EngineError::store)?
            else {
                continue;
            };
            let stale = self.store.stale_from(&user_id).map_err(EngineError::store)?;
            let before = stale.map_or(watermark, |from| from.min(watermark)).min(cutoff);
            let deleted = self
                .store
                .delete_before(&user_id, before)
                .map_err(EngineError::store)?;
            if deleted > 0 {
                debug!(user = %user_id, deleted, before = %before, "purged expired heartbeats");
            }
            purged += deleted;
        }
        if purged > 0 {
            info!(deleted = purged, before = %cutoff, "purged expired heartbeats");
        }
        Ok(purged)
    }

    /// Marks the day containing `time` for summarising again on the next
    /// run. Returns without waiting for an aggregation of the same user.
    ///
    /// Times in the current day need no mark. Days before the retention
    /// window are left alone; their heartbeats are purged instead.
    pub fn rewind(
        &self,
        user_id: &UserId,
        time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let day = interval::floor_day(time);
        if day >= interval::floor_day(now) {
            return Ok(());
        }
        if self.retention_cutoff(now).is_some_and(|cutoff| day < cutoff) {
            debug!(user = %user_id, day = %day, "late heartbeats older than retention");
            return Ok(());
        }
        self.store
            .mark_stale(user_id, day)
            .map_err(EngineError::store)?;
        debug!(user = %user_id, from = %day, "marked days stale for late heartbeats");
        Ok(())
    }

    /// Removes every heartbeat, summary and the watermark of a user.
    pub fn delete_user(&self, user_id: &UserId) -> Result<usize, EngineError> {
        let _guard = self.in_progress.acquire(user_id);
        let heartbeats =
            HeartbeatStore::delete_by_user(&*self.store, user_id).map_err(EngineError::store)?;
        let summaries =
            SummaryStore::delete_by_user(&*self.store, user_id).map_err(EngineError::store)?;
        self.store
            .clear_watermark(user_id)
            .map_err(EngineError::store)?;
        info!(user = %user_id, heartbeats, summaries, "deleted user data");
        Ok(heartbeats)
    }

    /// Aggregates from the earlier of the watermark and the taken stale
    /// mark. The mark is put back when the run fails.
    fn aggregate_held(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome, EngineError> {
        let stale = self.store.take_stale(user_id).map_err(EngineError::store)?;
        let result = self.aggregate_from(user_id, stale, now);
        if let (Err(_), Some(from)) = (&result, stale) {
            if let Err(err) = self.store.mark_stale(user_id, from) {
                warn!(user = %user_id, error = %err, "failed to restore stale mark");
            }
        }
        result
    }

    fn aggregate_from(
        &self,
        user_id: &UserId,
        stale: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome, EngineError> {
        let today = interval::floor_day(now);
        let watermark = self.store.watermark(user_id).map_err(EngineError::store)?;
        let since = match (watermark, stale) {
            (Some(mark), Some(from)) => Some(mark.min(from)),
            (Some(mark), None) => Some(mark),
            // never aggregated: the whole history is read anyway
            (None, _) => None,
        };
        let Some(earliest) = self
            .store
            .earliest_unaggregated(user_id, since)
            .map_err(EngineError::store)?
        else {
            return Ok(UserOutcome::UpToDate);
        };
        let start = interval::floor_day(earliest);
        if start >= today {
            return Ok(UserOutcome::UpToDate);
        }

        let builder = load_builder(&*self.store, &self.config, user_id)?;
        let mut days = 0;
        let mut chunk_start = start;
        while chunk_start < today {
            let chunk_end = (chunk_start + Duration::days(CHUNK_DAYS)).min(today);
            let heartbeats = HeartbeatStore::query_range(&*self.store, user_id, chunk_start, chunk_end)
                .map_err(EngineError::store)?;
            let summaries = daily_summaries(&builder, user_id, &heartbeats, chunk_start, chunk_end);
            self.store
                .upsert_daily(&summaries)
                .map_err(EngineError::store)?;
            days += summaries.len();
            chunk_start = chunk_end;
        }

        self.store
            .set_watermark(user_id, today)
            .map_err(EngineError::store)?;
        debug!(user = %user_id, days, until = %today, "aggregated user");
        Ok(UserOutcome::Aggregated { days })
    }
}

/// One summary per UTC day in `[from, to)` that has heartbeats.
///
/// `heartbeats` must be sorted ascending by time.
fn daily_summaries(
    builder: &SummaryBuilder,
    user_id: &UserId,
    heartbeats: &[Heartbeat],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<Summary> {
    interval::days(from, to)
        .into_iter()
        .filter_map(|Interval { from, to }| {
            let lo = heartbeats.partition_point(|hb| hb.time < from);
            let hi = heartbeats.partition_point(|hb| hb.time < to);
            (lo < hi).then(|| builder.build(user_id, &heartbeats[lo..hi], from, to, None))
        })
        .collect()
}

/// Builder holding the user's current aliases and language mappings.
pub(crate) fn load_builder<S: RuleStore>(
    store: &S,
    config: &EngineConfig,
    user_id: &UserId,
) -> Result<SummaryBuilder, EngineError> {
    let aliases = store.aliases_by_user(user_id).map_err(EngineError::store)?;
    let mappings = store
        .language_mappings_by_user(user_id)
        .map_err(EngineError::store)?;
    Ok(SummaryBuilder::new(config.duration)
        .with_aliases(AliasResolver::new(&aliases))
        .with_language_mapper(LanguageMapper::new(mappings, &config.custom_languages)))
}
