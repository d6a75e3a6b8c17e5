//! Summaries: per-category time totals for one user over a time range.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alias::AliasResolver;
use crate::category::Category;
use crate::types::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SummaryError {
    #[error("cannot merge summaries of different users ({left} and {right})")]
    UserMismatch { left: UserId, right: UserId },
}

/// Time spent on one key of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub category: Category,
    pub key: String,
    /// Whole seconds.
    pub total_secs: i64,
}

impl SummaryItem {
    pub fn new(category: Category, key: impl Into<String>, total: Duration) -> Self {
        Self {
            category,
            key: key.into(),
            total_secs: total.num_seconds(),
        }
    }

    pub fn total(&self) -> Duration {
        Duration::seconds(self.total_secs)
    }
}

/// Aggregated time for a user over `[from, to)`.
///
/// Item lists are kept sorted by total descending, then key ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub user_id: UserId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub projects: Vec<SummaryItem>,
    pub languages: Vec<SummaryItem>,
    pub editors: Vec<SummaryItem>,
    pub operating_systems: Vec<SummaryItem>,
    pub machines: Vec<SummaryItem>,
    /// Category-agnostic total in whole seconds.
    pub total_secs: i64,
}

impl Summary {
    /// An empty summary for the given range.
    pub fn empty(user_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            user_id,
            from,
            to,
            projects: Vec::new(),
            languages: Vec::new(),
            editors: Vec::new(),
            operating_systems: Vec::new(),
            machines: Vec::new(),
            total_secs: 0,
        }
    }

    pub fn total(&self) -> Duration {
        Duration::seconds(self.total_secs)
    }

    /// True when no time was recorded.
    pub fn is_empty(&self) -> bool {
        self.total_secs == 0 && Category::ALL.iter().all(|c| self.items(*c).is_empty())
    }

    pub fn items(&self, category: Category) -> &[SummaryItem] {
        match category {
            Category::Project => &self.projects,
            Category::Language => &self.languages,
            Category::Editor => &self.editors,
            Category::OperatingSystem => &self.operating_systems,
            Category::Machine => &self.machines,
        }
    }

    pub fn items_mut(&mut self, category: Category) -> &mut Vec<SummaryItem> {
        match category {
            Category::Project => &mut self.projects,
            Category::Language => &mut self.languages,
            Category::Editor => &mut self.editors,
            Category::OperatingSystem => &mut self.operating_systems,
            Category::Machine => &mut self.machines,
        }
    }

    /// Adds time to a key, creating the item if needed. Call
    /// [`Summary::sort_items`] once all items are in.
    pub fn add_item(&mut self, category: Category, key: &str, total_secs: i64) {
        let items = self.items_mut(category);
        match items.iter_mut().find(|item| item.key == key) {
            Some(item) => item.total_secs += total_secs,
            None => items.push(SummaryItem {
                category,
                key: key.to_string(),
                total_secs,
            }),
        }
    }

    /// Restores canonical item order.
    pub fn sort_items(&mut self) {
        for category in Category::ALL {
            self.items_mut(category).sort_by(|a, b| {
                b.total_secs
                    .cmp(&a.total_secs)
                    .then_with(|| a.key.cmp(&b.key))
            });
        }
    }

    /// Combines two summaries of the same user.
    ///
    /// Items add by (category, key), the range widens to cover both.
    pub fn merge(&self, other: &Self) -> Result<Self, SummaryError> {
        if self.user_id != other.user_id {
            return Err(SummaryError::UserMismatch {
                left: self.user_id.clone(),
                right: other.user_id.clone(),
            });
        }
        let mut merged = self.clone();
        merged.from = self.from.min(other.from);
        merged.to = self.to.max(other.to);
        merged.total_secs += other.total_secs;
        for category in Category::ALL {
            for item in other.items(category) {
                merged.add_item(category, &item.key, item.total_secs);
            }
        }
        merged.sort_items();
        Ok(merged)
    }

    /// Rewrites keys through the resolver, summing items that collapse onto
    /// the same canonical key.
    #[must_use]
    pub fn with_resolved_aliases(&self, resolver: &AliasResolver) -> Self {
        if resolver.is_empty() {
            return self.clone();
        }
        let mut resolved = Self::empty(self.user_id.clone(), self.from, self.to);
        resolved.total_secs = self.total_secs;
        for category in Category::ALL {
            for item in self.items(category) {
                let key = resolver.resolve(category, &item.key);
                resolved.add_item(category, key, item.total_secs);
            }
        }
        resolved.sort_items();
        resolved
    }

    /// Sum of all items of one category.
    pub fn total_time_by(&self, category: Category) -> Duration {
        Duration::seconds(self.items(category).iter().map(|item| item.total_secs).sum())
    }

    pub fn total_time_by_key(&self, category: Category, key: &str) -> Duration {
        Duration::seconds(
            self.items(category)
                .iter()
                .filter(|item| item.key == key)
                .map(|item| item.total_secs)
                .sum(),
        )
    }
}
