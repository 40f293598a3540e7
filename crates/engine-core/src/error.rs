use chrono::{DateTime, Utc};
use model::{
    execution::status::MigrationStatus,
    records::batch::BatchState,
};
use thiserror::Error;

/// Errors raised by a [`TimeoutsSource`](crate::connectors::source::TimeoutsSource).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(
        "A migration for endpoint '{endpoint}' (cutoff {cutoff}) is already in progress; \
         requested endpoint '{requested_endpoint}' (cutoff {requested_cutoff}). \
         Abort the ongoing migration before starting a different one"
    )]
    ConflictingMigration {
        endpoint: String,
        cutoff: DateTime<Utc>,
        requested_endpoint: String,
        requested_cutoff: DateTime<Utc>,
    },

    #[error("No migration is in progress")]
    NoMigrationInProgress,

    #[error("Batch {0} does not exist")]
    BatchNotFound(u32),

    #[error("Batch {number} cannot move from {from} to {to}")]
    InvalidBatchTransition {
        number: u32,
        from: BatchState,
        to: BatchState,
    },

    #[error("Migration cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: MigrationStatus,
        to: MigrationStatus,
    },

    #[error("Migration cannot complete, batch {0} is not completed")]
    IncompleteBatches(u32),

    #[error("Timeout '{0}' referenced by a batch is missing from the store")]
    MissingTimeout(String),

    #[error("Preparation was cancelled; the migration can be resumed")]
    Cancelled,

    #[error("Storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The store refused the statement itself; repeating it cannot succeed.
    #[error("Storage rejected the operation: {0}")]
    Rejected(String),

    #[error("Failed to encode or decode stored data: {0}")]
    Serialization(String),
}

impl SourceError {
    /// Whether the failed call can be repeated without side effects.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Storage(_) | SourceError::Timeout(_))
    }
}

/// Errors raised by a [`TimeoutsTarget`](crate::connectors::target::TimeoutsTarget).
#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Staging area for endpoint '{endpoint}' still holds {count} timeouts")]
    StagingNotEmpty { endpoint: String, count: usize },

    #[error("Storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage rejected the operation: {0}")]
    Rejected(String),

    #[error("Failed to encode or decode stored data: {0}")]
    Serialization(String),
}

impl TargetError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TargetError::Storage(_) | TargetError::Timeout(_))
    }
}
