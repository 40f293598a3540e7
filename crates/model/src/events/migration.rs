use crate::events::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted while a timeout migration run makes progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationEvent {
    /// The source finished (or resumed) partitioning an endpoint.
    RunPrepared {
        endpoint: String,
        number_of_batches: u32,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },

    /// The target refused an endpoint during its readiness check.
    EndpointSkipped {
        endpoint: String,
        problems: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    BatchStaged {
        endpoint: String,
        batch_number: u32,
        timeouts: usize,
        timestamp: DateTime<Utc>,
    },

    BatchCompleted {
        endpoint: String,
        batch_number: u32,
        number_of_batches: u32,
        timeouts: usize,
        timestamp: DateTime<Utc>,
    },

    RunCompleted {
        endpoint: String,
        number_of_batches: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    RunAborted {
        endpoint: String,
        timestamp: DateTime<Utc>,
    },
}

impl MigrationEvent {
    pub fn endpoint(&self) -> &str {
        match self {
            MigrationEvent::RunPrepared { endpoint, .. }
            | MigrationEvent::EndpointSkipped { endpoint, .. }
            | MigrationEvent::BatchStaged { endpoint, .. }
            | MigrationEvent::BatchCompleted { endpoint, .. }
            | MigrationEvent::RunCompleted { endpoint, .. }
            | MigrationEvent::RunAborted { endpoint, .. } => endpoint,
        }
    }
}

impl Event for MigrationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MigrationEvent::RunPrepared { .. } => "migration.prepared",
            MigrationEvent::EndpointSkipped { .. } => "migration.endpoint_skipped",
            MigrationEvent::BatchStaged { .. } => "migration.batch_staged",
            MigrationEvent::BatchCompleted { .. } => "migration.batch_completed",
            MigrationEvent::RunCompleted { .. } => "migration.completed",
            MigrationEvent::RunAborted { .. } => "migration.aborted",
        }
    }
}
