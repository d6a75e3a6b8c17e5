use chrono::{DateTime, Utc};
use tally_core::{SummaryError, ValidationError};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The storage backend failed.
    #[error("storage error: {0}")]
    Store(#[source] BoxError),
    /// An import source failed as a whole.
    #[error("import source failed: {0}")]
    Source(#[source] BoxError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid range: {from} is not before {to}")]
    InvalidRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("failed to build aggregation worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl EngineError {
    pub(crate) fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store(Box::new(err))
    }

    pub(crate) fn import_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source(Box::new(err))
    }
}
