//! Status command for showing aggregation progress per user.

use std::io::Write;

use anyhow::Result;
use tally_core::{HeartbeatStore, format_timestamp};
use tally_db::Database;
use tally_engine::Engine;

use crate::Config;

pub async fn run<W: Write>(writer: &mut W, engine: &Engine<Database>, config: &Config) -> Result<()> {
    let users = engine.store().latest_by_users()?;

    writeln!(writer, "Tally status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    if users.is_empty() {
        writeln!(writer, "No heartbeats recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Users:")?;
    for (user_id, latest) in users {
        let state = engine.user_state(&user_id).await?;
        let aggregated = state
            .last_aggregated_at
            .map_or_else(|| "never".to_string(), format_timestamp);
        let stale = state
            .stale_from
            .map(|from| format!(", stale from {}", format_timestamp(from)))
            .unwrap_or_default();
        writeln!(
            writer,
            "- {user_id}: last heartbeat {}, aggregated until {aggregated}{stale}",
            format_timestamp(latest)
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use tally_core::{Heartbeat, UserId, WatermarkStore};

    #[tokio::test]
    async fn status_command_outputs_progress_per_user() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("tally.db");
        let db = Database::open(&db_path).unwrap();

        let ferris = UserId::new("ferris").unwrap();
        let bob = UserId::new("bob").unwrap();
        let time = Utc.with_ymd_and_hms(2025, 1, 14, 9, 30, 0).unwrap();
        db.insert_batch(&[
            Heartbeat::new(ferris.clone(), time, "src/main.rs"),
            Heartbeat::new(bob, time, "app.py"),
        ])
        .unwrap();
        db.set_watermark(&ferris, Utc.with_ymd_and_hms(2025, 1, 14, 0, 0, 0).unwrap())
            .unwrap();
        db.mark_stale(&ferris, Utc.with_ymd_and_hms(2025, 1, 13, 0, 0, 0).unwrap())
            .unwrap();

        let config = Config {
            database_path: db_path.clone(),
            ..Config::default()
        };
        let engine = Engine::new(Arc::new(db), config.engine_config()).unwrap();
        let mut output = Vec::new();
        run(&mut output, &engine, &config).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&db_path.display().to_string(), "[TEMP]/tally.db");
        assert_snapshot!(output, @r"
        Tally status
        Database: [TEMP]/tally.db
        Users:
        - bob: last heartbeat 2025-01-14T09:30:00.000Z, aggregated until never
        - ferris: last heartbeat 2025-01-14T09:30:00.000Z, aggregated until 2025-01-14T00:00:00.000Z, stale from 2025-01-13T00:00:00.000Z
        ");
    }
}
