//! Storage and import boundaries consumed by the aggregation engine.
//!
//! All store traits share one error type through [`Store`] so a single
//! backend can implement every trait.

use chrono::{DateTime, Utc};

use crate::alias::Alias;
use crate::heartbeat::Heartbeat;
use crate::language::LanguageMapping;
use crate::summary::Summary;
use crate::types::UserId;

/// Common error type of a storage backend.
pub trait Store {
    type Error: std::error::Error + Send + Sync + 'static;
}

pub trait HeartbeatStore: Store {
    /// Inserts heartbeats, silently skipping ones already stored.
    ///
    /// Returns the number of rows actually inserted.
    fn insert_batch(&self, heartbeats: &[Heartbeat]) -> Result<usize, Self::Error>;

    /// Heartbeats of a user in `[from, to)`, ascending by time.
    fn query_range(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Heartbeat>, Self::Error>;

    /// Time of the earliest heartbeat at or after `since`, or of the
    /// earliest heartbeat overall when `since` is `None`.
    fn earliest_unaggregated(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, Self::Error>;

    /// Latest heartbeat time of every user that has heartbeats.
    fn latest_by_users(&self) -> Result<Vec<(UserId, DateTime<Utc>)>, Self::Error>;

    /// Latest heartbeat time of a user from one origin.
    fn latest_by_origin(
        &self,
        user_id: &UserId,
        origin: &str,
    ) -> Result<Option<DateTime<Utc>>, Self::Error>;

    /// Deletes a user's heartbeats strictly older than `before`.
    fn delete_before(
        &self,
        user_id: &UserId,
        before: DateTime<Utc>,
    ) -> Result<usize, Self::Error>;

    fn delete_by_user(&self, user_id: &UserId) -> Result<usize, Self::Error>;

    /// Sets the language of the mapping's user's heartbeats that have no
    /// language and whose entity carries the mapping's extension.
    ///
    /// Returns the number of rows changed; rerunning changes nothing.
    fn backfill_language(&self, mapping: &LanguageMapping) -> Result<usize, Self::Error>;
}

pub trait RuleStore: Store {
    fn aliases_by_user(&self, user_id: &UserId) -> Result<Vec<Alias>, Self::Error>;

    fn language_mappings_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<LanguageMapping>, Self::Error>;

    /// Stores an alias, replacing the value of an existing (category, key).
    fn add_alias(&self, alias: &Alias) -> Result<(), Self::Error>;

    /// Stores a mapping, replacing the language of an existing extension.
    fn add_language_mapping(&self, mapping: &LanguageMapping) -> Result<(), Self::Error>;
}

pub trait SummaryStore: Store {
    /// Replaces the persisted summaries covering the same user and range.
    ///
    /// The whole batch is written atomically.
    fn upsert_daily(&self, summaries: &[Summary]) -> Result<(), Self::Error>;

    /// Persisted summaries lying entirely inside `[from, to)`, ascending.
    fn query_range(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Summary>, Self::Error>;

    fn delete_by_user(&self, user_id: &UserId) -> Result<usize, Self::Error>;
}

/// Durable per-user aggregation progress.
///
/// The watermark is the exclusive end of the last aggregated day. Separately,
/// a user can carry a stale mark: the earliest day that received heartbeats
/// after it was aggregated. Stale marks are recorded without coordinating
/// with a running aggregation, so they only ever move earlier until taken.
pub trait WatermarkStore: Store {
    fn watermark(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, Self::Error>;

    /// Moves the watermark to `at`, leaving any stale mark in place.
    fn set_watermark(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), Self::Error>;

    /// Removes the watermark and the stale mark.
    fn clear_watermark(&self, user_id: &UserId) -> Result<(), Self::Error>;

    /// Records that days from `from` on must be summarised again. Keeps the
    /// earlier of `from` and an existing mark.
    fn mark_stale(&self, user_id: &UserId, from: DateTime<Utc>) -> Result<(), Self::Error>;

    fn stale_from(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, Self::Error>;

    /// Returns and clears the stale mark in one step. Marks recorded
    /// afterwards survive until the next take.
    fn take_stale(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, Self::Error>;
}

/// Lazily yielded heartbeats from an import source.
pub type HeartbeatIter<'a, E> = Box<dyn Iterator<Item = Result<Heartbeat, E>> + 'a>;

/// External producer of historical heartbeats.
pub trait HeartbeatSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Origin recorded on every heartbeat this source produces.
    fn origin(&self) -> &str;

    /// Heartbeats of `user_id` strictly newer than `after` (all when `None`).
    ///
    /// The iterator is finite. Individual items may fail without ending it.
    fn heartbeats<'a>(
        &'a mut self,
        user_id: &UserId,
        after: Option<DateTime<Utc>>,
    ) -> Result<HeartbeatIter<'a, Self::Error>, Self::Error>;
}
