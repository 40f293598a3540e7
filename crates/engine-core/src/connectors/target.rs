use crate::error::TargetError;
use async_trait::async_trait;
use model::{
    execution::check::MigrationCheckResult,
    records::{endpoint::EndpointInfo, timeout::TimeoutData},
};

/// A native delayed-delivery mechanism receiving migrated timeouts.
#[async_trait]
pub trait TimeoutsTarget: Send + Sync {
    /// Dry-run readiness check. Reports every problem found instead of
    /// failing on the first one; I/O failures are reported as problems too.
    async fn able_to_migrate(&self, endpoint: &EndpointInfo) -> MigrationCheckResult;

    /// Declares the staging resource used by one endpoint's run.
    async fn prepare_target_endpoint_batch_migrator(
        &self,
        endpoint_name: &str,
    ) -> Result<Box<dyn EndpointTargetBatchMigrator>, TargetError>;

    /// Drops the staging resource together with anything still staged.
    async fn abort(&self, endpoint_name: &str) -> Result<(), TargetError>;

    /// Verifies the staging resource is empty, then drops it.
    async fn complete(&self, endpoint_name: &str) -> Result<(), TargetError>;
}

/// Moves one endpoint's batches through staging into live delayed delivery.
#[async_trait]
pub trait EndpointTargetBatchMigrator: Send + Sync {
    /// Replaces the staging contents with `timeouts` and returns how many were staged.
    /// Calling it again for the same batch never duplicates staged records.
    async fn stage_batch(
        &self,
        timeouts: &[TimeoutData],
        batch_number: u32,
    ) -> Result<usize, TargetError>;

    /// Promotes staged timeouts into delayed delivery and returns how many moved.
    async fn complete_batch(&self, batch_number: u32) -> Result<usize, TargetError>;
}
