//! Periodic aggregation task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::EngineStore;
use crate::aggregation::Aggregator;

/// What the aggregator is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    /// Looking for users with unaggregated heartbeats.
    Scanning,
    /// Summarising the pending users on the worker pool.
    PerUserAggregating { users: usize },
}

/// Runs the aggregator once at start-up and then every `interval` until
/// `shutdown` is cancelled.
///
/// A run in progress when shutdown is requested stops before its next user.
pub async fn run<S: EngineStore>(
    aggregator: Arc<Aggregator<S>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "aggregation scheduler started");
    // first tick completes immediately
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let aggregator = Arc::clone(&aggregator);
        let token = shutdown.clone();
        let result =
            tokio::task::spawn_blocking(move || aggregator.run_once(Utc::now(), &token)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => error!(error = %err, "aggregation run failed"),
            Err(err) => error!(error = %err, "aggregation task panicked"),
        }
    }
    info!("aggregation scheduler stopped");
}
