//! Ingest command: heartbeats as JSON lines on stdin.

use std::io::{self, BufRead};

use anyhow::{Context, Result};
use tally_core::{RawHeartbeat, UserId};
use tally_db::Database;
use tally_engine::{Engine, IngestReport};

pub async fn run(engine: &Engine<Database>, user: Option<UserId>) -> Result<IngestReport> {
    let (heartbeats, malformed) = parse_heartbeats(io::stdin().lock())?;
    let mut report = engine
        .ingest(heartbeats, user)
        .await
        .context("failed to ingest heartbeats")?;
    report.rejected += malformed;

    eprintln!(
        "Ingested {} new heartbeats ({} accepted, {} rejected)",
        report.inserted, report.accepted, report.rejected
    );
    Ok(report)
}

/// Parses one heartbeat per line, counting lines that are not valid JSON.
fn parse_heartbeats<R: BufRead>(reader: R) -> Result<(Vec<RawHeartbeat>, usize)> {
    let mut heartbeats = Vec::new();
    let mut malformed = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str(trimmed) {
            Ok(heartbeat) => heartbeats.push(heartbeat),
            Err(err) => {
                malformed += 1;
                tracing::warn!(line = idx + 1, error = %err, "malformed heartbeat");
            }
        }
    }
    Ok((heartbeats, malformed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blank_and_counts_malformed_lines() {
        let input = "{\"entity\":\"a.rs\",\"time\":1.0}\n\nnot json\n{\"entity\":\"b.rs\"}\n";
        let (heartbeats, malformed) = parse_heartbeats(input.as_bytes()).unwrap();
        assert_eq!(heartbeats.len(), 2);
        assert_eq!(malformed, 1);
        assert_eq!(heartbeats[1].entity, "b.rs");
        assert!(heartbeats[1].time.is_none());
    }
}
