//! Composes range summaries from persisted days and live heartbeats.

use chrono::{DateTime, Utc};
use tally_core::interval::{self, Interval};
use tally_core::{Filters, HeartbeatStore, Summary, SummaryStore, UserId};
use tracing::debug;

use crate::EngineStore;
use crate::aggregation::load_builder;
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Computes the summary of `[from, to)` without consulting the cache.
///
/// Without filters, persisted daily summaries are reused and only the gaps
/// between them are built from raw heartbeats. Filtered queries are always
/// built from raw heartbeats, since persisted summaries no longer know which
/// heartbeats shared a project with a language.
pub fn compute_summary<S: EngineStore>(
    store: &S,
    config: &EngineConfig,
    user_id: &UserId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    filters: Option<&Filters>,
) -> Result<Summary, EngineError> {
    if from >= to {
        return Err(EngineError::InvalidRange { from, to });
    }
    let builder = load_builder(store, config, user_id)?;

    if filters.is_some() {
        let heartbeats =
            HeartbeatStore::query_range(store, user_id, from, to).map_err(EngineError::store)?;
        return Ok(builder.build(user_id, &heartbeats, from, to, filters));
    }

    let persisted =
        SummaryStore::query_range(store, user_id, from, to).map_err(EngineError::store)?;
    let covered: Vec<Interval> = persisted
        .iter()
        .map(|summary| Interval::new(summary.from, summary.to))
        .collect();
    let missing = interval::missing_intervals(Interval::new(from, to), &covered);
    debug!(
        user = %user_id,
        persisted = persisted.len(),
        live = missing.len(),
        "composing summary"
    );

    // persisted rows hold keys resolved with the rules of their day; live
    // parts come out of the builder already resolved
    let mut summary = Summary::empty(user_id.clone(), from, to);
    for day in &persisted {
        summary = summary.merge(day)?;
    }
    let mut summary = summary.with_resolved_aliases(builder.resolver());
    for gap in missing {
        let heartbeats = HeartbeatStore::query_range(store, user_id, gap.from, gap.to)
            .map_err(EngineError::store)?;
        if heartbeats.is_empty() {
            continue;
        }
        let live = builder.build(user_id, &heartbeats, gap.from, gap.to, None);
        summary = summary.merge(&live)?;
    }
    Ok(summary)
}
