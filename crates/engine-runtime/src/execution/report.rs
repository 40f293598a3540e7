use engine_core::metrics::MetricsSnapshot;
use model::records::endpoint::EndpointInfo;
use serde::Serialize;
use std::collections::BTreeSet;

/// Selects which endpoints a run migrates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EndpointFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl EndpointFilter {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EndpointFilter::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, endpoint_name: &str) -> bool {
        match self {
            EndpointFilter::All => true,
            EndpointFilter::Only(names) => names.contains(endpoint_name),
        }
    }
}

/// An endpoint migrated to completion by one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointReport {
    pub endpoint_name: String,
    pub number_of_batches: u32,
    pub timeouts_migrated: usize,
    /// Whether the run was picked up from an earlier, interrupted invocation.
    pub resumed: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEndpoint {
    pub endpoint_name: String,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub migrated: Vec<EndpointReport>,
    pub skipped: Vec<SkippedEndpoint>,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    /// True when no endpoint was refused by the target.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Result of a dry-run readiness check for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointPreview {
    pub endpoint: EndpointInfo,
    pub problems: Vec<String>,
}

impl EndpointPreview {
    pub fn can_migrate(&self) -> bool {
        self.problems.is_empty()
    }
}
