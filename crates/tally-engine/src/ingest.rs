//! Validation and storage of incoming heartbeats.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{Heartbeat, HeartbeatStore, LanguageMapper, RawHeartbeat, RuleStore, UserId};
use tracing::{debug, warn};

use crate::EngineStore;
use crate::aggregation::Aggregator;
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Heartbeats that passed validation.
    pub accepted: usize,
    /// Heartbeats dropped as malformed.
    pub rejected: usize,
    /// Accepted heartbeats that were not already stored.
    pub inserted: usize,
}

/// Validates a batch, rejecting malformed heartbeats individually.
pub fn validate_batch(
    raw: Vec<RawHeartbeat>,
    fallback_user: Option<&UserId>,
) -> (Vec<Heartbeat>, usize) {
    let mut rejected = 0;
    let accepted = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| match raw.validate(fallback_user) {
            Ok(heartbeat) => Some(heartbeat),
            Err(err) => {
                rejected += 1;
                warn!(index, error = %err, "rejected heartbeat");
                None
            }
        })
        .collect();
    (accepted, rejected)
}

/// Fills missing languages using each user's mappings.
pub(crate) fn infer_languages<S: RuleStore>(
    store: &S,
    config: &EngineConfig,
    heartbeats: &mut [Heartbeat],
) -> Result<(), EngineError> {
    let mut mappers: HashMap<UserId, LanguageMapper> = HashMap::new();
    for heartbeat in heartbeats.iter_mut().filter(|hb| hb.language.is_empty()) {
        let mapper = match mappers.entry(heartbeat.user_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let rules = store
                    .language_mappings_by_user(entry.key())
                    .map_err(EngineError::store)?;
                entry.insert(LanguageMapper::new(rules, &config.custom_languages))
            }
        };
        mapper.augment(heartbeat);
    }
    Ok(())
}

pub(crate) fn ingest<S: EngineStore>(
    store: &S,
    config: &EngineConfig,
    aggregator: &Aggregator<S>,
    raw: Vec<RawHeartbeat>,
    fallback_user: Option<&UserId>,
) -> Result<IngestReport, EngineError> {
    let (mut heartbeats, rejected) = validate_batch(raw, fallback_user);
    infer_languages(store, config, &mut heartbeats)?;
    let inserted = store
        .insert_batch(&heartbeats)
        .map_err(EngineError::store)?;

    // heartbeats arriving for already aggregated days reopen those days
    let mut earliest: BTreeMap<&UserId, DateTime<Utc>> = BTreeMap::new();
    for heartbeat in &heartbeats {
        earliest
            .entry(&heartbeat.user_id)
            .and_modify(|time| *time = (*time).min(heartbeat.time))
            .or_insert(heartbeat.time);
    }
    let now = Utc::now();
    for (user_id, time) in earliest {
        aggregator.rewind(user_id, time, now)?;
    }

    let report = IngestReport {
        accepted: heartbeats.len(),
        rejected,
        inserted,
    };
    debug!(
        accepted = report.accepted,
        rejected = report.rejected,
        inserted = report.inserted,
        "ingested heartbeats"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::RawTime;

    fn raw(user: Option<&str>, entity: &str, time: Option<f64>) -> RawHeartbeat {
        RawHeartbeat {
            user: user.map(str::to_string),
            entity: entity.into(),
            time: time.map(RawTime::EpochSeconds),
            ..RawHeartbeat::default()
        }
    }

    #[test]
    fn malformed_heartbeats_do_not_fail_the_batch() {
        let batch = vec![
            raw(Some("ferris"), "a.rs", Some(1_700_000_000.0)),
            raw(Some("ferris"), "", Some(1_700_000_001.0)),
            raw(Some("ferris"), "b.rs", None),
            raw(None, "c.rs", Some(1_700_000_002.0)),
        ];
        let (accepted, rejected) = validate_batch(batch, None);
        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected, 3);
    }

    #[test]
    fn fallback_user_claims_anonymous_heartbeats() {
        let fallback = UserId::new("ferris").unwrap();
        let (accepted, rejected) =
            validate_batch(vec![raw(None, "c.rs", Some(1_700_000_002.0))], Some(&fallback));
        assert_eq!(rejected, 0);
        assert_eq!(accepted[0].user_id, fallback);
    }
}
