use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use tally_core::{Heartbeat, HeartbeatStore, LanguageMapping, UserId, format_timestamp};

use crate::{Database, DbError, parse_timestamp, parse_user};

const TABLE: &str = "heartbeats";

const COLUMNS: &str = "user_id, time, entity, entity_type, kind, project, branch, language, \
                       editor, operating_system, machine, is_write, origin";

/// A heartbeat row before timestamp and user validation.
struct HeartbeatRow {
    user_id: String,
    time: String,
    entity: String,
    entity_type: String,
    kind: String,
    project: String,
    branch: String,
    language: String,
    editor: String,
    operating_system: String,
    machine: String,
    is_write: bool,
    origin: String,
}

impl HeartbeatRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            time: row.get(1)?,
            entity: row.get(2)?,
            entity_type: row.get(3)?,
            kind: row.get(4)?,
            project: row.get(5)?,
            branch: row.get(6)?,
            language: row.get(7)?,
            editor: row.get(8)?,
            operating_system: row.get(9)?,
            machine: row.get(10)?,
            is_write: row.get(11)?,
            origin: row.get(12)?,
        })
    }

    fn into_heartbeat(self) -> Result<Heartbeat, DbError> {
        Ok(Heartbeat {
            user_id: parse_user(self.user_id, TABLE)?,
            time: parse_timestamp(&self.time, TABLE)?,
            entity: self.entity,
            entity_type: self.entity_type,
            kind: self.kind,
            project: self.project,
            branch: self.branch,
            language: self.language,
            editor: self.editor,
            operating_system: self.operating_system,
            machine: self.machine,
            is_write: self.is_write,
            origin: self.origin,
        })
    }
}

impl HeartbeatStore for Database {
    fn insert_batch(&self, heartbeats: &[Heartbeat]) -> Result<usize, DbError> {
        if heartbeats.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO heartbeats (hash, {COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))?;
            for heartbeat in heartbeats {
                inserted += stmt.execute(params![
                    heartbeat.hash(),
                    heartbeat.user_id.as_str(),
                    format_timestamp(heartbeat.time),
                    heartbeat.entity,
                    heartbeat.entity_type,
                    heartbeat.kind,
                    heartbeat.project,
                    heartbeat.branch,
                    heartbeat.language,
                    heartbeat.editor,
                    heartbeat.operating_system,
                    heartbeat.machine,
                    heartbeat.is_write,
                    heartbeat.origin,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(received = heartbeats.len(), inserted, "stored heartbeats");
        Ok(inserted)
    }

    fn query_range(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Heartbeat>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM heartbeats
             WHERE user_id = ? AND time >= ? AND time < ?
             ORDER BY time ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    user_id.as_str(),
                    format_timestamp(from),
                    format_timestamp(to)
                ],
                HeartbeatRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(HeartbeatRow::into_heartbeat).collect()
    }

    fn earliest_unaggregated(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn();
        let earliest: Option<String> = match since {
            Some(since) => conn.query_row(
                "SELECT MIN(time) FROM heartbeats WHERE user_id = ? AND time >= ?",
                params![user_id.as_str(), format_timestamp(since)],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT MIN(time) FROM heartbeats WHERE user_id = ?",
                [user_id.as_str()],
                |row| row.get(0),
            )?,
        };
        earliest
            .map(|value| parse_timestamp(&value, TABLE))
            .transpose()
    }

    fn latest_by_users(&self) -> Result<Vec<(UserId, DateTime<Utc>)>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, MAX(time) FROM heartbeats GROUP BY user_id ORDER BY user_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(user, time)| Ok((parse_user(user, TABLE)?, parse_timestamp(&time, TABLE)?)))
            .collect()
    }

    fn latest_by_origin(
        &self,
        user_id: &UserId,
        origin: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn();
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(time) FROM heartbeats WHERE user_id = ? AND origin = ?",
            params![user_id.as_str(), origin],
            |row| row.get(0),
        )?;
        latest.map(|value| parse_timestamp(&value, TABLE)).transpose()
    }

    fn delete_before(&self, user_id: &UserId, before: DateTime<Utc>) -> Result<usize, DbError> {
        let deleted = self.conn().execute(
            "DELETE FROM heartbeats WHERE user_id = ? AND time < ?",
            params![user_id.as_str(), format_timestamp(before)],
        )?;
        tracing::debug!(user = %user_id, deleted, before = %before, "deleted old heartbeats");
        Ok(deleted)
    }

    fn delete_by_user(&self, user_id: &UserId) -> Result<usize, DbError> {
        Ok(self
            .conn()
            .execute("DELETE FROM heartbeats WHERE user_id = ?", [user_id.as_str()])?)
    }

    fn backfill_language(&self, mapping: &LanguageMapping) -> Result<usize, DbError> {
        let suffix = format!(".{}", mapping.extension);
        let updated = self.conn().execute(
            "UPDATE heartbeats SET language = ?1
             WHERE user_id = ?2 AND language = ''
               AND length(entity) > length(?3) AND substr(entity, -length(?3)) = ?3",
            params![mapping.language, mapping.user_id.as_str(), suffix],
        )?;
        tracing::debug!(
            user = %mapping.user_id,
            extension = %mapping.extension,
            updated,
            "back-filled heartbeat languages"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn heartbeat(name: &str, seconds: i64, entity: &str) -> Heartbeat {
        let mut heartbeat = Heartbeat::new(user(name), at(seconds), entity);
        heartbeat.project = "tally".into();
        heartbeat
    }

    #[test]
    fn insert_batch_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let batch = vec![heartbeat("ferris", 0, "a.rs"), heartbeat("ferris", 30, "a.rs")];

        assert_eq!(db.insert_batch(&batch).unwrap(), 2);
        assert_eq!(db.insert_batch(&batch).unwrap(), 0);
        assert_eq!(
            HeartbeatStore::query_range(&db, &user("ferris"), at(0), at(60))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn query_range_is_half_open_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        let mut stored = heartbeat("ferris", 30, "b.rs");
        stored.is_write = true;
        stored.editor = "helix".into();
        db.insert_batch(&[
            stored.clone(),
            heartbeat("ferris", 0, "a.rs"),
            heartbeat("ferris", 60, "c.rs"),
            heartbeat("bob", 10, "x.rs"),
        ])
        .unwrap();

        let rows = HeartbeatStore::query_range(&db, &user("ferris"), at(0), at(60)).unwrap();
        let entities: Vec<_> = rows.iter().map(|hb| hb.entity.as_str()).collect();
        assert_eq!(entities, ["a.rs", "b.rs"]);
        assert_eq!(rows[1], stored);
    }

    #[test]
    fn earliest_unaggregated_respects_since() {
        let db = Database::open_in_memory().unwrap();
        db.insert_batch(&[heartbeat("ferris", 0, "a.rs"), heartbeat("ferris", 100, "a.rs")])
            .unwrap();

        let ferris = user("ferris");
        assert_eq!(db.earliest_unaggregated(&ferris, None).unwrap(), Some(at(0)));
        assert_eq!(
            db.earliest_unaggregated(&ferris, Some(at(50))).unwrap(),
            Some(at(100))
        );
        assert_eq!(db.earliest_unaggregated(&ferris, Some(at(101))).unwrap(), None);
        assert_eq!(db.earliest_unaggregated(&user("nobody"), None).unwrap(), None);
    }

    #[test]
    fn latest_by_users_and_origin() {
        let db = Database::open_in_memory().unwrap();
        let mut imported = heartbeat("ferris", 50, "a.rs");
        imported.origin = "wakatime".into();
        db.insert_batch(&[
            heartbeat("ferris", 0, "a.rs"),
            heartbeat("ferris", 100, "a.rs"),
            imported,
            heartbeat("bob", 10, "b.rs"),
        ])
        .unwrap();

        assert_eq!(
            db.latest_by_users().unwrap(),
            vec![(user("bob"), at(10)), (user("ferris"), at(100))]
        );
        assert_eq!(
            db.latest_by_origin(&user("ferris"), "wakatime").unwrap(),
            Some(at(50))
        );
        assert_eq!(db.latest_by_origin(&user("ferris"), "other").unwrap(), None);
    }

    #[test]
    fn delete_before_and_by_user() {
        let db = Database::open_in_memory().unwrap();
        db.insert_batch(&[
            heartbeat("ferris", 0, "a.rs"),
            heartbeat("ferris", 100, "a.rs"),
            heartbeat("bob", 10, "b.rs"),
        ])
        .unwrap();

        assert_eq!(db.delete_before(&user("ferris"), at(50)).unwrap(), 1);
        assert_eq!(HeartbeatStore::delete_by_user(&db, &user("ferris")).unwrap(), 1);
        assert_eq!(db.latest_by_users().unwrap(), vec![(user("bob"), at(10))]);
        assert_eq!(HeartbeatStore::delete_by_user(&db, &user("bob")).unwrap(), 1);
        assert!(db.latest_by_users().unwrap().is_empty());
    }

    #[test]
    fn backfill_language_only_touches_empty_matching_rows() {
        let db = Database::open_in_memory().unwrap();
        let mut reported = heartbeat("ferris", 10, "page.astro");
        reported.language = "HTML".into();
        db.insert_batch(&[
            heartbeat("ferris", 0, "index.astro"),
            reported,
            heartbeat("ferris", 20, "main.rs"),
            heartbeat("bob", 30, "other.astro"),
        ])
        .unwrap();

        let mapping = LanguageMapping::new(user("ferris"), "astro", "Astro").unwrap();
        assert_eq!(db.backfill_language(&mapping).unwrap(), 1);
        assert_eq!(db.backfill_language(&mapping).unwrap(), 0);

        let rows = HeartbeatStore::query_range(&db, &user("ferris"), at(0), at(60)).unwrap();
        let languages: Vec<_> = rows.iter().map(|hb| hb.language.as_str()).collect();
        assert_eq!(languages, ["Astro", "HTML", ""]);
    }
}
