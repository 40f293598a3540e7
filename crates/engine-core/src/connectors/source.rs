use crate::{error::SourceError, state::ToolState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    execution::run::RunParameters,
    records::{endpoint::EndpointInfo, timeout::TimeoutData},
};
use tokio_util::sync::CancellationToken;

/// A legacy timeout store acting as the source of a migration.
///
/// The source is the sole owner of run and batch state: every mutating call
/// must leave the store in a state from which the same call (or `abort`) can
/// be repeated after a crash.
#[async_trait]
pub trait TimeoutsSource: Send + Sync {
    /// The current non-terminal run, if any. Never mutates the store.
    async fn try_load_ongoing_migration(&self) -> Result<Option<Box<dyn ToolState>>, SourceError>;

    /// Endpoints owning at least one timeout due at or after `cutoff`.
    ///
    /// Timeouts hidden by an ongoing run are counted under the endpoint they
    /// came from; migrated timeouts are never listed.
    async fn list_endpoints(&self, cutoff: DateTime<Utc>) -> Result<Vec<EndpointInfo>, SourceError>;

    /// Partitions the eligible timeouts of `endpoint_name` into batches and
    /// hides them from the legacy scheduler.
    ///
    /// Resumes the ongoing run when it was started with the same parameters and
    /// fails with [`SourceError::ConflictingMigration`] otherwise.
    async fn prepare(
        &self,
        cutoff: DateTime<Utc>,
        endpoint_name: &str,
        run_parameters: &RunParameters,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ToolState>, SourceError>;

    /// Materializes the timeouts of a batch. Pure read.
    async fn read_batch(&self, batch_number: u32) -> Result<Vec<TimeoutData>, SourceError>;

    async fn mark_batch_as_staged(&self, batch_number: u32) -> Result<(), SourceError>;

    /// Marks the batch completed and its timeouts permanently migrated.
    async fn mark_batch_as_completed(&self, batch_number: u32) -> Result<(), SourceError>;

    /// Closes a run whose batches are all completed.
    async fn complete(&self) -> Result<(), SourceError>;

    /// Returns every timeout of an unfinished batch to the legacy scheduler and
    /// discards the run. A no-op when nothing is in progress.
    async fn abort(&self) -> Result<(), SourceError>;

    async fn check_if_a_migration_is_in_progress(&self) -> Result<bool, SourceError> {
        Ok(self.try_load_ongoing_migration().await?.is_some())
    }
}
