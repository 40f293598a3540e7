use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    Pending,
    Staged,
    Completed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "Pending",
            BatchState::Staged => "Staged",
            BatchState::Completed => "Completed",
        }
    }

    /// Numeric code used by stores that persist the state as an integer.
    pub fn code(&self) -> i64 {
        match self {
            BatchState::Pending => 0,
            BatchState::Staged => 1,
            BatchState::Completed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BatchState::Pending),
            1 => Some(BatchState::Staged),
            2 => Some(BatchState::Completed),
            _ => None,
        }
    }

    /// Pending/Staged may move to Staged; any state may move to Completed.
    pub fn can_transition_to(&self, next: BatchState) -> bool {
        match next {
            BatchState::Pending => *self == BatchState::Pending,
            BatchState::Staged => *self != BatchState::Completed,
            BatchState::Completed => true,
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BatchState::Pending),
            "staged" => Ok(BatchState::Staged),
            "completed" => Ok(BatchState::Completed),
            other => Err(format!("Unknown batch state: {other}")),
        }
    }
}

/// A numbered, fixed partition of timeouts migrated as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// 1-based, dense within a run.
    pub number: u32,
    pub state: BatchState,
    pub number_of_timeouts: usize,
    /// Empty when the backend materializes membership lazily.
    pub timeout_ids: Vec<String>,
}

impl BatchInfo {
    pub fn new(number: u32, timeout_ids: Vec<String>) -> Self {
        BatchInfo {
            number,
            state: BatchState::Pending,
            number_of_timeouts: timeout_ids.len(),
            timeout_ids,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == BatchState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_batches_cannot_be_restaged() {
        assert!(BatchState::Pending.can_transition_to(BatchState::Staged));
        assert!(BatchState::Staged.can_transition_to(BatchState::Staged));
        assert!(!BatchState::Completed.can_transition_to(BatchState::Staged));
        assert!(!BatchState::Staged.can_transition_to(BatchState::Pending));
        assert!(BatchState::Pending.can_transition_to(BatchState::Completed));
    }

    #[test]
    fn codes_round_trip() {
        for state in [BatchState::Pending, BatchState::Staged, BatchState::Completed] {
            assert_eq!(BatchState::from_code(state.code()), Some(state));
        }
        assert_eq!(BatchState::from_code(9), None);
    }
}
