use thiserror::Error;

use crate::store::StoreError;

/// Fatal, run-aborting failures. Per-posting failures (tailoring,
/// submission) never surface here; they are contained inside the
/// orchestration loop and become `skipped_error` outcomes.
///
/// Configuration problems are caught before a run starts, at `Config`
/// construction, and propagate through `anyhow` at the CLI boundary.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("another run is already in progress (started {started_at}); use 'autoapply unlock' if it crashed")]
    ConcurrentRun { started_at: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("tracking store error: {0}")]
    Store(#[from] StoreError),
}
