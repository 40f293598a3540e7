use serde::Serialize;

/// Outcome of a target's readiness check for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationCheckResult {
    pub problems: Vec<String>,
}

impl MigrationCheckResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn add_problem(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    pub fn can_migrate(&self) -> bool {
        self.problems.is_empty()
    }
}
