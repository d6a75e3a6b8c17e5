//! Core domain logic for heartbeat aggregation.
//!
//! This crate contains the fundamental types and logic for:
//! - Duration estimation: turning heartbeat gaps into elapsed time
//! - Key resolution: aliases and extension-based language mapping
//! - Summaries: building, merging and querying per-category totals
//! - Store traits: the persistence boundary implemented by `tally-db`

pub mod alias;
pub mod builder;
pub mod category;
pub mod duration;
pub mod filters;
pub mod heartbeat;
pub mod interval;
pub mod language;
pub mod store;
pub mod summary;
pub mod types;

pub use alias::{Alias, AliasResolver};
pub use builder::SummaryBuilder;
pub use category::{Category, UNKNOWN_KEY};
pub use duration::DurationConfig;
pub use filters::Filters;
pub use heartbeat::{Heartbeat, RawHeartbeat, RawTime, format_timestamp};
pub use interval::{Interval, floor_day};
pub use language::{LanguageMapper, LanguageMapping};
pub use store::{
    HeartbeatIter, HeartbeatSource, HeartbeatStore, RuleStore, Store, SummaryStore,
    WatermarkStore,
};
pub use summary::{Summary, SummaryError, SummaryItem};
pub use types::{UserId, ValidationError};
