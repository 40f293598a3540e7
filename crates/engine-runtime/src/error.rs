use chrono::{DateTime, Utc};
use engine_core::error::{SourceError, TargetError};
use thiserror::Error;

/// Top-level errors of a timeout migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// A run is already in progress and the request does not describe it.
    #[error(
        "A migration for endpoint '{endpoint}' (cutoff {cutoff}) is in progress and does not \
         match the request. Re-run with the same parameters to resume it, or abort it first"
    )]
    ConflictingRun {
        endpoint: String,
        cutoff: DateTime<Utc>,
    },

    /// The target moved a different number of timeouts than the batch holds.
    /// The run is left as is so it can be inspected and resumed.
    #[error(
        "Batch {batch_number} of endpoint '{endpoint}': expected {expected} timeouts, \
         {actual} were {step}. The migration was halted and can be resumed"
    )]
    BatchCountMismatch {
        endpoint: String,
        batch_number: u32,
        step: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Migration was cancelled; it can be resumed by running it again")]
    Cancelled,
}

impl MigrationError {
    /// Whether the run was left in a state that a later invocation resumes.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            MigrationError::BatchCountMismatch { .. }
                | MigrationError::Cancelled
                | MigrationError::Source(SourceError::Cancelled)
        ) || self.is_transient()
    }

    pub fn is_transient(&self) -> bool {
        match self {
            MigrationError::Source(e) => e.is_transient(),
            MigrationError::Target(e) => e.is_transient(),
            _ => false,
        }
    }
}
