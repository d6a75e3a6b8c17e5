//! Per-category filters for summary queries.
//!
//! Set fields combine with OR: a heartbeat passes when it matches at least
//! one of them. A present filter with no fields set matches nothing, which is
//! different from passing no filter at all.

use serde::{Deserialize, Serialize};

use crate::alias::AliasResolver;
use crate::category::Category;
use crate::heartbeat::Heartbeat;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub project: Option<String>,
    pub language: Option<String>,
    pub editor: Option<String>,
    pub operating_system: Option<String>,
    pub machine: Option<String>,
}

impl Filters {
    /// Returns a copy with the filter for `category` set to `value`.
    #[must_use]
    pub fn with(mut self, category: Category, value: impl Into<String>) -> Self {
        *self.slot_mut(category) = Some(value.into());
        self
    }

    pub fn get(&self, category: Category) -> Option<&str> {
        match category {
            Category::Project => self.project.as_deref(),
            Category::Language => self.language.as_deref(),
            Category::Editor => self.editor.as_deref(),
            Category::OperatingSystem => self.operating_system.as_deref(),
            Category::Machine => self.machine.as_deref(),
        }
    }

    fn slot_mut(&mut self, category: Category) -> &mut Option<String> {
        match category {
            Category::Project => &mut self.project,
            Category::Language => &mut self.language,
            Category::Editor => &mut self.editor,
            Category::OperatingSystem => &mut self.operating_system,
            Category::Machine => &mut self.machine,
        }
    }

    /// Set fields in category order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &str)> + '_ {
        Category::ALL
            .into_iter()
            .filter_map(|category| self.get(category).map(|value| (category, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// True if the heartbeat matches at least one set field, comparing
    /// against both the raw key and its alias-resolved form.
    pub fn matches(&self, heartbeat: &Heartbeat, resolver: &AliasResolver) -> bool {
        self.iter().any(|(category, wanted)| {
            let raw = heartbeat.key(category);
            raw == wanted || resolver.resolve(category, raw) == wanted
        })
    }
}
