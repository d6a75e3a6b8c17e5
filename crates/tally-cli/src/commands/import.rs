//! Import command for a user's heartbeat history.

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::UserId;
use tally_db::Database;
use tally_engine::{Engine, ImportReport, JsonLinesSource};

pub async fn run(
    engine: &Engine<Database>,
    user: &UserId,
    file: &Path,
    origin: &str,
) -> Result<ImportReport> {
    let source = JsonLinesSource::open(file, origin)
        .with_context(|| format!("failed to open {}", file.display()))?;
    let report = engine
        .import(source, user)
        .await
        .context("import failed")?;

    match report.after {
        Some(after) => eprintln!("Resuming {} import after {after}", report.origin),
        None => eprintln!("Full {} import", report.origin),
    }
    eprintln!(
        "Imported {} new heartbeats ({} read, {} malformed), regenerated {} days",
        report.inserted, report.received, report.rejected, report.regenerated_days
    );
    Ok(report)
}
