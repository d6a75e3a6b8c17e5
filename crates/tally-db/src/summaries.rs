use chrono::{DateTime, Utc};
use rusqlite::params;
use tally_core::{Category, Summary, SummaryStore, UserId, format_timestamp};

use crate::{Database, DbError, parse_timestamp};

const TABLE: &str = "summaries";

impl SummaryStore for Database {
    fn upsert_daily(&self, summaries: &[Summary]) -> Result<(), DbError> {
        if summaries.is_empty() {
            return Ok(());
        }
        let now = format_timestamp(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut delete_items = tx.prepare(
                "DELETE FROM summary_items WHERE summary_id IN (
                     SELECT id FROM summaries WHERE user_id = ? AND from_time = ? AND to_time = ?
                 )",
            )?;
            let mut delete_summary = tx.prepare(
                "DELETE FROM summaries WHERE user_id = ? AND from_time = ? AND to_time = ?",
            )?;
            let mut insert_summary = tx.prepare(
                "INSERT INTO summaries (user_id, from_time, to_time, total_secs, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            let mut insert_item = tx.prepare(
                "INSERT INTO summary_items (summary_id, category, key, total_secs)
                 VALUES (?, ?, ?, ?)",
            )?;

            for summary in summaries {
                let user = summary.user_id.as_str();
                let from = format_timestamp(summary.from);
                let to = format_timestamp(summary.to);
                delete_items.execute(params![user, from, to])?;
                delete_summary.execute(params![user, from, to])?;
                insert_summary.execute(params![user, from, to, summary.total_secs, now])?;
                let summary_id = tx.last_insert_rowid();
                for category in Category::ALL {
                    for item in summary.items(category) {
                        insert_item.execute(params![
                            summary_id,
                            category.code(),
                            item.key,
                            item.total_secs
                        ])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_range(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Summary>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, from_time, to_time, total_secs FROM summaries
             WHERE user_id = ? AND from_time >= ? AND to_time <= ?
             ORDER BY from_time ASC",
        )?;
        let rows = stmt
            .query_map(
                params![user_id.as_str(), format_timestamp(from), format_timestamp(to)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items_stmt = conn.prepare(
            "SELECT category, key, total_secs FROM summary_items WHERE summary_id = ?",
        )?;
        let mut summaries = Vec::with_capacity(rows.len());
        for (id, from_time, to_time, total_secs) in rows {
            let mut summary = Summary::empty(
                user_id.clone(),
                parse_timestamp(&from_time, TABLE)?,
                parse_timestamp(&to_time, TABLE)?,
            );
            summary.total_secs = total_secs;
            let items = items_stmt
                .query_map([id], |row| {
                    Ok((
                        row.get::<_, u8>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (code, key, secs) in items {
                let category = Category::from_code(code).map_err(|source| DbError::InvalidRow {
                    table: "summary_items",
                    source,
                })?;
                summary.add_item(category, &key, secs);
            }
            summary.sort_items();
            summaries.push(summary);
        }
        Ok(summaries)
    }

    fn delete_by_user(&self, user_id: &UserId) -> Result<usize, DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM summary_items WHERE summary_id IN (
                 SELECT id FROM summaries WHERE user_id = ?
             )",
            [user_id.as_str()],
        )?;
        let deleted = tx.execute("DELETE FROM summaries WHERE user_id = ?", [user_id.as_str()])?;
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn user() -> UserId {
        UserId::new("ferris").unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap()
    }

    fn daily(d: u32, project_secs: i64) -> Summary {
        let mut summary = Summary::empty(user(), day(d), day(d) + Duration::days(1));
        summary.add_item(Category::Project, "tally", project_secs);
        summary.add_item(Category::Language, "Rust", project_secs);
        summary.add_item(Category::Editor, "unknown", project_secs);
        summary.total_secs = project_secs;
        summary.sort_items();
        summary
    }

    #[test]
    fn upsert_roundtrips_items() {
        let db = Database::open_in_memory().unwrap();
        let summary = daily(15, 120);
        db.upsert_daily(std::slice::from_ref(&summary)).unwrap();

        let stored = SummaryStore::query_range(&db, &user(), day(1), day(31)).unwrap();
        assert_eq!(stored, vec![summary]);
    }

    #[test]
    fn upsert_replaces_same_day() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily(15, 120)]).unwrap();
        db.upsert_daily(&[daily(15, 300)]).unwrap();

        let stored = SummaryStore::query_range(&db, &user(), day(1), day(31)).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].total_secs, 300);
        assert_eq!(stored[0].projects.len(), 1);
        assert_eq!(stored[0].projects[0].total_secs, 300);
    }

    #[test]
    fn query_range_only_returns_contained_days() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily(14, 10), daily(15, 20), daily(16, 30)])
            .unwrap();

        let stored =
            SummaryStore::query_range(&db, &user(), day(14) + Duration::hours(6), day(17)).unwrap();
        let starts: Vec<_> = stored.iter().map(|summary| summary.from).collect();
        assert_eq!(starts, vec![day(15), day(16)]);
    }

    #[test]
    fn delete_by_user_removes_summaries_and_items() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily(14, 10), daily(15, 20)]).unwrap();

        assert_eq!(SummaryStore::delete_by_user(&db, &user()).unwrap(), 2);
        let orphans: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM summary_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
