use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    execution::{run::RunParameters, status::MigrationStatus},
    records::batch::{BatchInfo, BatchState},
};

/// Live view of one migration run owned by a source store.
///
/// Batch transitions made through the source are visible to the next
/// [`ToolState::try_get_next_batch`] call; the remaining accessors describe the
/// run as it was when the handle was obtained.
#[async_trait]
pub trait ToolState: Send + Sync {
    fn endpoint_name(&self) -> &str;
    fn cutoff(&self) -> DateTime<Utc>;
    fn run_parameters(&self) -> &RunParameters;
    fn number_of_batches(&self) -> u32;
    fn status(&self) -> MigrationStatus;

    /// Next batch that still needs work, or `None` once every batch is completed.
    async fn try_get_next_batch(&self) -> Result<Option<BatchInfo>, SourceError>;
}

/// Picks the batch a run should work on next.
///
/// A staged batch wins over pending ones so that a crash between staging and
/// completing resumes at the completion step. Ties go to the lowest number.
pub fn select_next_batch<I>(batches: I) -> Option<BatchInfo>
where
    I: IntoIterator<Item = BatchInfo>,
{
    batches
        .into_iter()
        .filter(|b| b.state != BatchState::Completed)
        .min_by_key(|b| (b.state != BatchState::Staged, b.number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(number: u32, state: BatchState) -> BatchInfo {
        BatchInfo {
            number,
            state,
            number_of_timeouts: 1,
            timeout_ids: Vec::new(),
        }
    }

    #[test]
    fn prefers_staged_over_pending() {
        let next = select_next_batch(vec![
            batch(1, BatchState::Completed),
            batch(2, BatchState::Pending),
            batch(3, BatchState::Staged),
        ]);
        assert_eq!(next.map(|b| b.number), Some(3));
    }

    #[test]
    fn lowest_pending_batch_goes_first() {
        let next = select_next_batch(vec![
            batch(4, BatchState::Pending),
            batch(2, BatchState::Pending),
            batch(1, BatchState::Completed),
        ]);
        assert_eq!(next.map(|b| b.number), Some(2));
    }

    #[test]
    fn nothing_left_when_all_completed() {
        let next = select_next_batch(vec![
            batch(1, BatchState::Completed),
            batch(2, BatchState::Completed),
        ]);
        assert!(next.is_none());
        assert!(select_next_batch(Vec::new()).is_none());
    }
}
