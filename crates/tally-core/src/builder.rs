//! Builds a [`Summary`] from raw heartbeats.
//!
//! Every category is grouped independently: a heartbeat contributes to one
//! key in each category, and each key's total is estimated over that key's
//! own timeline. The summary total is estimated over the combined timeline,
//! so per-key totals within a category may sum to more than the total when
//! keys interleave.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::alias::AliasResolver;
use crate::category::{Category, UNKNOWN_KEY};
use crate::duration::{self, DurationConfig};
use crate::filters::Filters;
use crate::heartbeat::Heartbeat;
use crate::language::LanguageMapper;
use crate::summary::{Summary, SummaryItem};
use crate::types::UserId;

/// Per-user summary construction state.
#[derive(Debug, Clone, Default)]
pub struct SummaryBuilder {
    config: DurationConfig,
    resolver: AliasResolver,
    mapper: LanguageMapper,
}

impl SummaryBuilder {
    pub fn new(config: DurationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_aliases(mut self, resolver: AliasResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_language_mapper(mut self, mapper: LanguageMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn resolver(&self) -> &AliasResolver {
        &self.resolver
    }

    /// Summarises the user's heartbeats inside `[from, to)`.
    ///
    /// With `filters`, only heartbeats matching at least one set field are
    /// counted. Heartbeats of other users or outside the range are ignored.
    pub fn build(
        &self,
        user_id: &UserId,
        heartbeats: &[Heartbeat],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: Option<&Filters>,
    ) -> Summary {
        let relevant: Vec<Cow<'_, Heartbeat>> = heartbeats
            .iter()
            .filter(|hb| &hb.user_id == user_id && hb.time >= from && hb.time < to)
            .map(|hb| self.with_inferred_language(hb))
            .filter(|hb| filters.is_none_or(|filters| filters.matches(hb, &self.resolver)))
            .collect();

        let mut summary = Summary::empty(user_id.clone(), from, to);
        if relevant.is_empty() {
            return summary;
        }

        for category in Category::ALL {
            let mut timelines: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
            for hb in &relevant {
                let key = self.resolver.resolve(category, hb.key(category));
                timelines.entry(key).or_default().push(hb.time);
            }
            let items = summary.items_mut(category);
            for (key, timeline) in timelines {
                let item = SummaryItem::new(
                    category,
                    key,
                    duration::estimate(timeline, &self.config),
                );
                if item.total_secs > 0 || key == UNKNOWN_KEY {
                    items.push(item);
                }
            }
        }

        summary.total_secs = duration::estimate(relevant.iter().map(|hb| hb.time), &self.config)
            .num_seconds();
        summary.sort_items();
        summary
    }

    fn with_inferred_language<'a>(&self, heartbeat: &'a Heartbeat) -> Cow<'a, Heartbeat> {
        if !heartbeat.language.is_empty() {
            return Cow::Borrowed(heartbeat);
        }
        match self.mapper.map(&heartbeat.entity) {
            Some(language) => {
                let mut owned = heartbeat.clone();
                owned.language = language.to_string();
                Cow::Owned(owned)
            }
            None => Cow::Borrowed(heartbeat),
        }
    }
}
