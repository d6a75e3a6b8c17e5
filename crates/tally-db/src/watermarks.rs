use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tally_core::{UserId, WatermarkStore, format_timestamp};

use crate::{Database, DbError, parse_timestamp};

const TABLE: &str = "aggregation_watermarks";

/// Reads one nullable timestamp column of a user's row.
fn read_column(
    conn: &Connection,
    column: &str,
    user_id: &UserId,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let value: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT {column} FROM {TABLE} WHERE user_id = ?"),
            [user_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    value
        .flatten()
        .map(|value| parse_timestamp(&value, TABLE))
        .transpose()
}

impl WatermarkStore for Database {
    fn watermark(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, DbError> {
        read_column(&self.conn(), "aggregated_until", user_id)
    }

    fn set_watermark(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO aggregation_watermarks (user_id, aggregated_until, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                 aggregated_until = excluded.aggregated_until,
                 updated_at = excluded.updated_at",
            params![
                user_id.as_str(),
                format_timestamp(at),
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(())
    }

    fn clear_watermark(&self, user_id: &UserId) -> Result<(), DbError> {
        self.conn().execute(
            "DELETE FROM aggregation_watermarks WHERE user_id = ?",
            [user_id.as_str()],
        )?;
        Ok(())
    }

    fn mark_stale(&self, user_id: &UserId, from: DateTime<Utc>) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO aggregation_watermarks (user_id, stale_from, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                 stale_from = MIN(COALESCE(stale_from, excluded.stale_from), excluded.stale_from),
                 updated_at = excluded.updated_at",
            params![
                user_id.as_str(),
                format_timestamp(from),
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(())
    }

    fn stale_from(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, DbError> {
        read_column(&self.conn(), "stale_from", user_id)
    }

    fn take_stale(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, DbError> {
        // one guard for both statements, so no mark slips in between
        let conn = self.conn();
        let stale = read_column(&conn, "stale_from", user_id)?;
        if stale.is_some() {
            conn.execute(
                "UPDATE aggregation_watermarks SET stale_from = NULL WHERE user_id = ?",
                [user_id.as_str()],
            )?;
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ferris() -> UserId {
        UserId::new("ferris").unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn watermark_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.watermark(&ferris()).unwrap(), None);

        db.set_watermark(&ferris(), day(15)).unwrap();
        db.set_watermark(&ferris(), day(16)).unwrap();
        assert_eq!(db.watermark(&ferris()).unwrap(), Some(day(16)));

        db.clear_watermark(&ferris()).unwrap();
        assert_eq!(db.watermark(&ferris()).unwrap(), None);
    }

    #[test]
    fn stale_mark_keeps_earliest_day() {
        let db = Database::open_in_memory().unwrap();
        db.set_watermark(&ferris(), day(16)).unwrap();

        db.mark_stale(&ferris(), day(14)).unwrap();
        db.mark_stale(&ferris(), day(15)).unwrap();
        db.mark_stale(&ferris(), day(12)).unwrap();
        assert_eq!(db.stale_from(&ferris()).unwrap(), Some(day(12)));

        // moving the watermark forward leaves the mark alone
        db.set_watermark(&ferris(), day(17)).unwrap();
        assert_eq!(db.stale_from(&ferris()).unwrap(), Some(day(12)));
        assert_eq!(db.watermark(&ferris()).unwrap(), Some(day(17)));
    }

    #[test]
    fn take_stale_clears_the_mark_once() {
        let db = Database::open_in_memory().unwrap();
        db.mark_stale(&ferris(), day(14)).unwrap();
        assert_eq!(db.watermark(&ferris()).unwrap(), None);

        assert_eq!(db.take_stale(&ferris()).unwrap(), Some(day(14)));
        assert_eq!(db.take_stale(&ferris()).unwrap(), None);

        db.mark_stale(&ferris(), day(15)).unwrap();
        assert_eq!(db.stale_from(&ferris()).unwrap(), Some(day(15)));
        db.clear_watermark(&ferris()).unwrap();
        assert_eq!(db.stale_from(&ferris()).unwrap(), None);
    }
}
