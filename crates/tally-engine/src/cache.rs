//! Bounded TTL cache of computed summaries.
//!
//! Every user has a generation that invalidation bumps. A caller captures it
//! before computing a summary and the insert is dropped if the generation
//! moved on meanwhile, so a computation that raced with a rule change never
//! lands in the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use parking_lot::Mutex;
use tally_core::heartbeat::truncate_to_millis;
use tally_core::{Filters, Summary, UserId};

/// Identifies one summary query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: UserId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub filters: Option<Filters>,
}

impl CacheKey {
    /// Builds a key with the range normalised to millisecond precision.
    pub fn new(
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: Option<Filters>,
    ) -> Self {
        Self {
            user_id,
            from: truncate_to_millis(from),
            to: truncate_to_millis(to),
            filters,
        }
    }
}

/// Invalidation count of one user, captured before a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Clone)]
pub struct SummaryCache {
    inner: Cache<CacheKey, Arc<Summary>>,
    generations: Arc<Mutex<HashMap<UserId, u64>>>,
}

impl SummaryCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            generations: Arc::default(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Summary>> {
        self.inner.get(key)
    }

    pub fn generation(&self, user_id: &UserId) -> Generation {
        Generation(self.generations.lock().get(user_id).copied().unwrap_or(0))
    }

    /// Caches `summary` unless the key's user was invalidated after `seen`
    /// was captured. Returns whether the entry was stored.
    pub fn insert(&self, key: CacheKey, summary: Arc<Summary>, seen: Generation) -> bool {
        let generations = self.generations.lock();
        let current = generations.get(&key.user_id).copied().unwrap_or(0);
        if current != seen.0 {
            tracing::debug!(user = %key.user_id, "discarding summary computed before invalidation");
            return false;
        }
        self.inner.insert(key, summary);
        true
    }

    /// Drops every cached summary of a user and rejects inserts of
    /// summaries computed before this call.
    pub fn invalidate_user(&self, user_id: &UserId) {
        *self
            .generations
            .lock()
            .entry(user_id.clone())
            .or_default() += 1;
        let stale: Vec<Arc<CacheKey>> = self
            .inner
            .iter()
            .filter(|(key, _)| &key.user_id == user_id)
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.inner.invalidate(key.as_ref());
        }
        tracing::debug!(user = %user_id, entries = stale.len(), "invalidated cached summaries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(name: &str) -> CacheKey {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
        CacheKey::new(UserId::new(name).unwrap(), from, to, None)
    }

    fn summary(key: &CacheKey) -> Arc<Summary> {
        Arc::new(Summary::empty(key.user_id.clone(), key.from, key.to))
    }

    fn insert(cache: &SummaryCache, key: &CacheKey) {
        let seen = cache.generation(&key.user_id);
        assert!(cache.insert(key.clone(), summary(key), seen));
    }

    #[test]
    fn keys_normalise_sub_millisecond_precision() {
        let a = key("ferris");
        let mut b = a.clone();
        b.from += chrono::Duration::nanoseconds(300);
        assert_eq!(CacheKey::new(b.user_id, b.from, b.to, None), a);
    }

    #[test]
    fn invalidate_user_keeps_other_users() {
        let cache = SummaryCache::new(Duration::from_secs(60), 100);
        let ferris = key("ferris");
        let bob = key("bob");
        insert(&cache, &ferris);
        insert(&cache, &bob);

        cache.invalidate_user(&ferris.user_id);
        assert!(cache.get(&ferris).is_none());
        assert!(cache.get(&bob).is_some());
    }

    #[test]
    fn insert_after_invalidation_is_discarded() {
        let cache = SummaryCache::new(Duration::from_secs(60), 100);
        let ferris = key("ferris");
        let bob = key("bob");
        let seen = cache.generation(&ferris.user_id);
        let bob_seen = cache.generation(&bob.user_id);

        // a rule change lands while the summaries are being computed
        cache.invalidate_user(&ferris.user_id);
        assert!(!cache.insert(ferris.clone(), summary(&ferris), seen));
        assert!(cache.get(&ferris).is_none());
        assert!(cache.insert(bob.clone(), summary(&bob), bob_seen));

        let fresh = cache.generation(&ferris.user_id);
        assert_ne!(fresh, seen);
        assert!(cache.insert(ferris.clone(), summary(&ferris), fresh));
        assert!(cache.get(&ferris).is_some());
    }

    #[test]
    fn filters_are_part_of_the_key() {
        let cache = SummaryCache::new(Duration::from_secs(60), 100);
        let plain = key("ferris");
        let filtered = CacheKey {
            filters: Some(Filters::default()),
            ..plain.clone()
        };
        insert(&cache, &plain);
        assert!(cache.get(&filtered).is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = SummaryCache::new(Duration::from_millis(20), 100);
        let ferris = key("ferris");
        insert(&cache, &ferris);
        assert!(cache.get(&ferris).is_some());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get(&ferris).is_none());
    }
}
