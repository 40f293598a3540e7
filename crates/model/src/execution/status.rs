use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a migration run. "Not started" is the absence of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStatus {
    Preparing,
    StoragePrepared,
    Completed,
    Aborted,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Preparing => "Preparing",
            MigrationStatus::StoragePrepared => "StoragePrepared",
            MigrationStatus::Completed => "Completed",
            MigrationStatus::Aborted => "Aborted",
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            MigrationStatus::Preparing => 1,
            MigrationStatus::StoragePrepared => 2,
            MigrationStatus::Completed => 3,
            MigrationStatus::Aborted => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MigrationStatus::Preparing),
            2 => Some(MigrationStatus::StoragePrepared),
            3 => Some(MigrationStatus::Completed),
            4 => Some(MigrationStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Aborted)
    }

    pub fn can_transition_to(&self, next: MigrationStatus) -> bool {
        use MigrationStatus::*;
        matches!(
            (self, next),
            (Preparing, StoragePrepared)
                | (Preparing, Aborted)
                | (StoragePrepared, Completed)
                | (StoragePrepared, Aborted)
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
