//! Extension-based language inference for heartbeats without a language.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::heartbeat::Heartbeat;
use crate::types::{UserId, ValidationError};

/// Extensions recognised without any configuration, matched case-insensitively.
const BUILTIN_LANGUAGES: &[(&str, &str)] = &[
    ("astro", "Astro"),
    ("c", "C"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("cs", "C#"),
    ("css", "CSS"),
    ("dart", "Dart"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("go", "Go"),
    ("h", "C"),
    ("hpp", "C++"),
    ("hs", "Haskell"),
    ("html", "HTML"),
    ("java", "Java"),
    ("js", "JavaScript"),
    ("json", "JSON"),
    ("jsx", "JavaScript"),
    ("kt", "Kotlin"),
    ("lua", "Lua"),
    ("md", "Markdown"),
    ("php", "PHP"),
    ("py", "Python"),
    ("rb", "Ruby"),
    ("rs", "Rust"),
    ("scala", "Scala"),
    ("scss", "SCSS"),
    ("sh", "Bash"),
    ("sql", "SQL"),
    ("svelte", "Svelte"),
    ("swift", "Swift"),
    ("toml", "TOML"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("vue", "Vue.js"),
    ("yaml", "YAML"),
    ("yml", "YAML"),
    ("zig", "Zig"),
];

/// A user rule mapping a file extension to a language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageMapping {
    pub user_id: UserId,
    /// Extension without the leading dot (e.g. "astro", "blade.php").
    pub extension: String,
    pub language: String,
}

impl LanguageMapping {
    /// Creates a mapping after validation. A leading dot is stripped.
    pub fn new(
        user_id: UserId,
        extension: impl Into<String>,
        language: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let extension = normalize_extension(&extension.into());
        let language = language.into().trim().to_string();
        if extension.is_empty() {
            return Err(ValidationError::Empty { field: "extension" });
        }
        if extension.contains(['/', '\\']) {
            return Err(ValidationError::InvalidRule {
                rule: "language mapping",
                reason: "extension contains a path separator",
            });
        }
        if language.is_empty() {
            return Err(ValidationError::Empty { field: "language" });
        }
        Ok(Self {
            user_id,
            extension,
            language,
        })
    }

    /// True when `entity` ends with `.{extension}`.
    pub fn matches(&self, entity: &str) -> bool {
        entity
            .strip_suffix(self.extension.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
    }
}

fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_string()
}

/// Resolves languages from entity paths.
///
/// Precedence: user rules, then configured custom languages, then the
/// built-in table.
#[derive(Debug, Clone, Default)]
pub struct LanguageMapper {
    user_rules: Vec<LanguageMapping>,
    custom: HashMap<String, String>,
}

impl LanguageMapper {
    pub fn new(user_rules: Vec<LanguageMapping>, custom: &HashMap<String, String>) -> Self {
        let mut user_rules = user_rules;
        // most specific extension first, so "blade.php" beats "php"
        user_rules.sort_by(|a, b| {
            b.extension
                .len()
                .cmp(&a.extension.len())
                .then_with(|| a.extension.cmp(&b.extension))
        });
        let custom = custom
            .iter()
            .map(|(ext, lang)| (normalize_extension(ext).to_ascii_lowercase(), lang.clone()))
            .filter(|(ext, lang)| !ext.is_empty() && !lang.is_empty())
            .collect();
        Self { user_rules, custom }
    }

    /// Maps an entity path to a language, if any rule applies.
    pub fn map(&self, entity: &str) -> Option<&str> {
        if let Some(rule) = self.user_rules.iter().find(|rule| rule.matches(entity)) {
            return Some(&rule.language);
        }
        let extension = Path::new(entity)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();
        if let Some(language) = self.custom.get(&extension) {
            return Some(language);
        }
        BUILTIN_LANGUAGES
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, language)| *language)
    }

    /// Fills in the language of a heartbeat that did not report one.
    ///
    /// Returns true if the heartbeat was changed.
    pub fn augment(&self, heartbeat: &mut Heartbeat) -> bool {
        if !heartbeat.language.is_empty() {
            return false;
        }
        match self.map(&heartbeat.entity) {
            Some(language) => {
                heartbeat.language = language.to_string();
                true
            }
            None => false,
        }
    }
}
