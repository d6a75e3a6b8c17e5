//! Storage layer for heartbeats, rules and summaries.
//!
//! Provides persistence for every `tally-core` store trait using `rusqlite`.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so [`Database`] keeps its
//! connection behind a `parking_lot::Mutex`. Every trait method takes the lock
//! for the duration of one statement or transaction, which makes a
//! `Database` shareable through an `Arc` across the aggregation workers.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond
//! precision (e.g., `2024-01-15T10:30:00.000Z`). The fixed width keeps
//! lexicographic ordering equal to chronological ordering.
//!
//! ## Category Values
//!
//! Heartbeat category columns hold an empty string when the client reported
//! no value; they are never NULL. Summary items and aliases store categories
//! as their stable integer code.

mod heartbeats;
mod rules;
mod summaries;
mod watermarks;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tally_core::{Store, ValidationError};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp in {table}: {value}")]
    TimestampParse {
        table: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row no longer passes domain validation.
    #[error("invalid row in {table}: {source}")]
    InvalidRow {
        table: &'static str,
        #[source]
        source: ValidationError,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Store for Database {
    type Error = DbError;
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            -- Heartbeats: raw activity samples
            -- hash: content hash, duplicates are ignored on insert
            -- time: RFC 3339 with milliseconds (e.g., '2024-01-15T10:30:00.000Z')
            CREATE TABLE IF NOT EXISTS heartbeats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                time TEXT NOT NULL,
                entity TEXT NOT NULL,
                entity_type TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT '',
                project TEXT NOT NULL DEFAULT '',
                branch TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT '',
                editor TEXT NOT NULL DEFAULT '',
                operating_system TEXT NOT NULL DEFAULT '',
                machine TEXT NOT NULL DEFAULT '',
                is_write INTEGER NOT NULL DEFAULT 0,
                origin TEXT NOT NULL DEFAULT 'client'
            );

            CREATE INDEX IF NOT EXISTS idx_heartbeats_user_time ON heartbeats(user_id, time);
            CREATE INDEX IF NOT EXISTS idx_heartbeats_user_origin ON heartbeats(user_id, origin, time);

            CREATE TABLE IF NOT EXISTS aliases (
                user_id TEXT NOT NULL,
                category INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, category, key)
            );

            CREATE TABLE IF NOT EXISTS language_mappings (
                user_id TEXT NOT NULL,
                extension TEXT NOT NULL,
                language TEXT NOT NULL,
                PRIMARY KEY (user_id, extension)
            );

            -- Summaries: one row per user and aggregated range
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                from_time TEXT NOT NULL,
                to_time TEXT NOT NULL,
                total_secs INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, from_time, to_time)
            );

            CREATE TABLE IF NOT EXISTS summary_items (
                summary_id INTEGER NOT NULL,
                category INTEGER NOT NULL,
                key TEXT NOT NULL,
                total_secs INTEGER NOT NULL,
                PRIMARY KEY (summary_id, category, key),
                FOREIGN KEY (summary_id) REFERENCES summaries(id) ON DELETE CASCADE
            );

            -- aggregated_until: exclusive end of the last aggregated day
            -- stale_from: earliest day with heartbeats that arrived after it was aggregated
            CREATE TABLE IF NOT EXISTS aggregation_watermarks (
                user_id TEXT PRIMARY KEY,
                aggregated_until TEXT,
                stale_from TEXT,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

fn parse_timestamp(value: &str, table: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            table,
            value: value.to_string(),
            source,
        })
}

fn parse_user(value: String, table: &'static str) -> Result<tally_core::UserId, DbError> {
    tally_core::UserId::new(value).map_err(|source| DbError::InvalidRow { table, source })
}
