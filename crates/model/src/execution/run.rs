use crate::{core::identifiers::RunToken, execution::status::MigrationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller-supplied metadata stored with a run and echoed back on resume.
pub type RunParameters = BTreeMap<String, String>;

/// Persisted record of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub endpoint_name: String,
    pub cutoff: DateTime<Utc>,
    pub run_parameters: RunParameters,
    pub number_of_batches: u32,
    pub status: MigrationStatus,
    pub token: RunToken,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationRun {
    pub fn start(
        endpoint_name: &str,
        cutoff: DateTime<Utc>,
        run_parameters: &RunParameters,
    ) -> Self {
        MigrationRun {
            endpoint_name: endpoint_name.to_string(),
            cutoff,
            run_parameters: run_parameters.clone(),
            number_of_batches: 0,
            status: MigrationStatus::Preparing,
            token: RunToken::generate(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether a request to prepare `endpoint_name` at `cutoff` refers to this run.
    /// Cutoffs compare at microsecond precision, the finest SQL stores keep.
    pub fn matches(
        &self,
        endpoint_name: &str,
        cutoff: DateTime<Utc>,
        run_parameters: &RunParameters,
    ) -> bool {
        self.endpoint_name == endpoint_name
            && self.cutoff.timestamp_micros() == cutoff.timestamp_micros()
            && &self.run_parameters == run_parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_requires_identical_parameters() {
        let cutoff = Utc::now();
        let params = RunParameters::from([("cutoff".into(), cutoff.to_rfc3339())]);
        let run = MigrationRun::start("Sales", cutoff, &params);

        assert_eq!(run.status, MigrationStatus::Preparing);
        assert!(run.matches("Sales", cutoff, &params));
        assert!(!run.matches("Billing", cutoff, &params));
        assert!(!run.matches("Sales", cutoff + chrono::Duration::seconds(1), &params));
        assert!(!run.matches("Sales", cutoff, &RunParameters::new()));
    }
}
