//! Summary categories as the single source of truth for category names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ValidationError;

/// Key used for heartbeats that carry no value for a category.
pub const UNKNOWN_KEY: &str = "unknown";

/// The dimensions a summary is broken down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Project,
    Language,
    Editor,
    OperatingSystem,
    Machine,
}

impl Category {
    /// All categories in storage order.
    pub const ALL: [Self; 5] = [
        Self::Project,
        Self::Language,
        Self::Editor,
        Self::OperatingSystem,
        Self::Machine,
    ];

    /// Stable name used in config files, CLI flags and JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Language => "language",
            Self::Editor => "editor",
            Self::OperatingSystem => "os",
            Self::Machine => "machine",
        }
    }

    /// Stable integer code used in the database.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Project => 0,
            Self::Language => 1,
            Self::Editor => 2,
            Self::OperatingSystem => 3,
            Self::Machine => 4,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ValidationError> {
        match code {
            0 => Ok(Self::Project),
            1 => Ok(Self::Language),
            2 => Ok(Self::Editor),
            3 => Ok(Self::OperatingSystem),
            4 => Ok(Self::Machine),
            _ => Err(ValidationError::UnknownCategory {
                value: code.to_string(),
            }),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "language" => Ok(Self::Language),
            "editor" => Ok(Self::Editor),
            "os" | "operating_system" => Ok(Self::OperatingSystem),
            "machine" => Ok(Self::Machine),
            _ => Err(ValidationError::UnknownCategory {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
