//! User-defined aliases that fold raw category keys into canonical ones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::types::{UserId, ValidationError};

/// Maps a raw key of one category onto a canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub user_id: UserId,
    pub category: Category,
    /// Raw key as reported by clients (e.g. "tally-mobile").
    pub key: String,
    /// Canonical key it resolves to (e.g. "tally").
    pub value: String,
}

impl Alias {
    /// Creates an alias after validation.
    pub fn new(
        user_id: UserId,
        category: Category,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let key = key.into().trim().to_string();
        let value = value.into().trim().to_string();
        if key.is_empty() {
            return Err(ValidationError::Empty { field: "alias key" });
        }
        if value.is_empty() {
            return Err(ValidationError::Empty {
                field: "alias value",
            });
        }
        if key == value {
            return Err(ValidationError::InvalidRule {
                rule: "alias",
                reason: "key and value are identical",
            });
        }
        Ok(Self {
            user_id,
            category,
            key,
            value,
        })
    }
}

/// Resolves raw keys to canonical keys for one user.
///
/// Total: keys without a rule resolve to themselves. Chained rules are
/// followed to their end, so resolving an already resolved key is a no-op.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    rules: HashMap<Category, HashMap<String, String>>,
}

impl AliasResolver {
    /// Builds a resolver from a user's aliases. Later duplicates win.
    pub fn new<'a, I>(aliases: I) -> Self
    where
        I: IntoIterator<Item = &'a Alias>,
    {
        let mut rules: HashMap<Category, HashMap<String, String>> = HashMap::new();
        for alias in aliases {
            rules
                .entry(alias.category)
                .or_default()
                .insert(alias.key.clone(), alias.value.clone());
        }
        Self { rules }
    }

    pub fn resolve<'a>(&'a self, category: Category, key: &'a str) -> &'a str {
        let Some(rules) = self.rules.get(&category) else {
            return key;
        };
        let mut resolved = key;
        // a chain without a cycle visits each rule at most once
        for _ in 0..rules.len() {
            match rules.get(resolved) {
                Some(next) => resolved = next,
                None => return resolved,
            }
        }
        resolved
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
