//! Aggregation commands: a single pass or the long-running scheduler.

use anyhow::{Context, Result};
use tally_db::Database;
use tally_engine::{Engine, RunReport};
use tokio_util::sync::CancellationToken;

pub async fn run(engine: &Engine<Database>) -> Result<RunReport> {
    let report = engine
        .run_aggregation()
        .await
        .context("aggregation failed")?;
    eprintln!(
        "Aggregated {} days for {} users ({} skipped, {} failed)",
        report.aggregated_days, report.users, report.skipped, report.failed
    );
    if report.purged_heartbeats > 0 {
        eprintln!("Purged {} expired heartbeats", report.purged_heartbeats);
    }
    Ok(report)
}

/// Runs the scheduler until Ctrl-C.
pub async fn serve(engine: &Engine<Database>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
        }
        signal.cancel();
    });

    tracing::info!(
        interval_secs = engine.config().aggregation_interval.as_secs(),
        "aggregation scheduler started"
    );
    engine.run_scheduler(shutdown).await;
    tracing::info!("aggregation scheduler stopped");
    Ok(())
}
