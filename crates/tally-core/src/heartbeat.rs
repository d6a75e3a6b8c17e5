//! Heartbeats: timestamped samples of coding activity.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::{Category, UNKNOWN_KEY};
use crate::types::{UserId, ValidationError};

/// Origin recorded when a client does not name one.
pub const DEFAULT_ORIGIN: &str = "client";

/// One observed activity sample.
///
/// Category fields hold an empty string when the client did not report a
/// value. [`Heartbeat::key`] surfaces such values as [`UNKNOWN_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub user_id: UserId,
    /// Millisecond precision; finer parts are truncated on conversion.
    pub time: DateTime<Utc>,
    pub entity: String,
    /// Entity type reported by the client (e.g. "file", "domain").
    #[serde(default)]
    pub entity_type: String,
    /// Activity kind (e.g. "coding", "debugging").
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub editor: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub is_write: bool,
    #[serde(default = "default_origin")]
    pub origin: String,
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

impl Heartbeat {
    /// Creates a heartbeat with every optional field left empty.
    pub fn new(user_id: UserId, time: DateTime<Utc>, entity: impl Into<String>) -> Self {
        Self {
            user_id,
            time: truncate_to_millis(time),
            entity: entity.into(),
            entity_type: String::new(),
            kind: String::new(),
            project: String::new(),
            branch: String::new(),
            language: String::new(),
            editor: String::new(),
            operating_system: String::new(),
            machine: String::new(),
            is_write: false,
            origin: default_origin(),
        }
    }

    /// Raw value stored for a category, possibly empty.
    pub fn value(&self, category: Category) -> &str {
        match category {
            Category::Project => &self.project,
            Category::Language => &self.language,
            Category::Editor => &self.editor,
            Category::OperatingSystem => &self.operating_system,
            Category::Machine => &self.machine,
        }
    }

    /// Value for a category with empty values replaced by [`UNKNOWN_KEY`].
    pub fn key(&self, category: Category) -> &str {
        let value = self.value(category);
        if value.is_empty() { UNKNOWN_KEY } else { value }
    }

    /// Deterministic content hash used to suppress duplicate inserts.
    ///
    /// The language is left out since it may be inferred or back-filled
    /// after the heartbeat was first stored.
    pub fn hash(&self) -> String {
        let content = format!(
            "heartbeat|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.user_id,
            self.time.timestamp_millis(),
            self.entity,
            self.project,
            self.branch,
            self.editor,
            self.operating_system,
            self.machine,
            self.is_write,
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string()
    }
}

/// Drops sub-millisecond precision.
pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

/// How far ahead of the local clock a client timestamp may be.
pub const MAX_CLOCK_SKEW: Duration = Duration::days(1);

/// Timestamp as sent on the wire: float epoch seconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    EpochSeconds(f64),
    Text(String),
}

impl RawTime {
    /// Parses the timestamp and rejects times before the Unix epoch or more
    /// than [`MAX_CLOCK_SKEW`] ahead of `now`.
    fn parse_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
        let time = self.parse()?;
        if time < DateTime::UNIX_EPOCH || time > now + MAX_CLOCK_SKEW {
            return Err(ValidationError::InvalidTimestamp {
                value: format_timestamp(time),
            });
        }
        Ok(time)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn parse(&self) -> Result<DateTime<Utc>, ValidationError> {
        match self {
            Self::EpochSeconds(secs) => {
                let invalid = || ValidationError::InvalidTimestamp {
                    value: secs.to_string(),
                };
                if !secs.is_finite() || *secs <= 0.0 {
                    return Err(invalid());
                }
                DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).ok_or_else(invalid)
            }
            Self::Text(text) => {
                if let Ok(secs) = text.trim().parse::<f64>() {
                    return Self::EpochSeconds(secs).parse();
                }
                DateTime::parse_from_rfc3339(text.trim())
                    .map(|parsed| truncate_to_millis(parsed.with_timezone(&Utc)))
                    .map_err(|_| ValidationError::InvalidTimestamp {
                        value: text.clone(),
                    })
            }
        }
    }
}

/// Heartbeat as received from a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHeartbeat {
    pub user: Option<String>,
    pub time: Option<RawTime>,
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub category: String,
    pub project: String,
    pub branch: String,
    pub language: String,
    pub editor: String,
    pub operating_system: String,
    pub machine: String,
    pub is_write: bool,
    pub origin: Option<String>,
}

impl RawHeartbeat {
    /// Validates the heartbeat, attributing it to `fallback_user` when the
    /// payload does not name a user. Times must fall between the Unix epoch
    /// and a day past the local clock.
    pub fn validate(self, fallback_user: Option<&UserId>) -> Result<Heartbeat, ValidationError> {
        let user_id = match self.user.filter(|user| !user.trim().is_empty()) {
            Some(user) => UserId::new(user)?,
            None => fallback_user
                .cloned()
                .ok_or(ValidationError::Missing { field: "user" })?,
        };
        let time = self
            .time
            .ok_or(ValidationError::Missing { field: "time" })?
            .parse_at(Utc::now())?;
        if self.entity.trim().is_empty() {
            return Err(ValidationError::Empty { field: "entity" });
        }
        Ok(Heartbeat {
            user_id,
            time,
            entity: self.entity,
            entity_type: self.entity_type,
            kind: self.category,
            project: self.project.trim().to_string(),
            branch: self.branch,
            language: self.language.trim().to_string(),
            editor: self.editor.trim().to_string(),
            operating_system: self.operating_system.trim().to_string(),
            machine: self.machine.trim().to_string(),
            is_write: self.is_write,
            origin: self
                .origin
                .filter(|origin| !origin.trim().is_empty())
                .unwrap_or_else(default_origin),
        })
    }
}

/// Formats a timestamp the way the storage layer persists it.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
