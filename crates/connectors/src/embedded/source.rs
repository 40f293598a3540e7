use crate::{
    embedded::codec::{abort, batch_key, decode, encode, number_from_key},
    error::ConnectorError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{
    connectors::source::TimeoutsSource,
    error::SourceError,
    partition::BatchAssembler,
    settings::MigrationSettings,
    state::ToolState,
};
use model::{
    core::identifiers::RunToken,
    execution::{
        run::{MigrationRun, RunParameters},
        status::MigrationStatus,
    },
    records::{
        batch::{BatchInfo, BatchState},
        endpoint::{EndpointAggregator, EndpointInfo},
        timeout::TimeoutData,
    },
};
use serde::{Deserialize, Serialize};
use sled::{
    Transactional, Tree,
    transaction::{ConflictableTransactionResult, TransactionError},
};
use std::{ops::Bound, path::Path};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TIMEOUTS_TREE: &str = "timeouts";
const MIGRATED_TREE: &str = "migrated";
const BATCHES_TREE: &str = "batches";
const MEMBERS_TREE: &str = "batch_members";
const MIGRATION_TREE: &str = "migration";
const HISTORY_TREE: &str = "history";
const CURRENT_RUN_KEY: &[u8] = b"current";

/// Ownership of a stored timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutStatus {
    /// Visible to the legacy scheduler.
    Available,
    /// Claimed by the run holding `token`, as part of batch `batch`.
    InProgress { token: RunToken, batch: u32 },
    Migrated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTimeout {
    timeout: TimeoutData,
    status: TimeoutStatus,
}

/// Per-batch bookkeeping without membership, so picking the next batch never
/// decodes id lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BatchSlot {
    state: BatchState,
    number_of_timeouts: usize,
}

impl BatchSlot {
    fn info(self, number: u32) -> BatchInfo {
        BatchInfo {
            number,
            state: self.state,
            number_of_timeouts: self.number_of_timeouts,
            timeout_ids: Vec::new(),
        }
    }
}

/// Legacy timeout store kept in an embedded `sled` database.
///
/// Live timeouts sit in the `timeouts` tree keyed by id. Completing a batch
/// moves its timeouts into `migrated`, so the legacy scheduler (which only
/// reads `timeouts`) never sees them again. Batch states live in `batches`
/// and batch membership in `batch_members`, both keyed by big-endian number.
#[derive(Clone)]
pub struct SledTimeoutsSource {
    db: sled::Db,
    timeouts: Tree,
    migrated: Tree,
    batches: Tree,
    members: Tree,
    migration: Tree,
    history: Tree,
    settings: MigrationSettings,
}

impl SledTimeoutsSource {
    pub fn open(path: impl AsRef<Path>, settings: MigrationSettings) -> Result<Self, ConnectorError> {
        Self::from_db(sled::open(path)?, settings)
    }

    pub fn from_db(db: sled::Db, settings: MigrationSettings) -> Result<Self, ConnectorError> {
        Ok(SledTimeoutsSource {
            timeouts: db.open_tree(TIMEOUTS_TREE)?,
            migrated: db.open_tree(MIGRATED_TREE)?,
            batches: db.open_tree(BATCHES_TREE)?,
            members: db.open_tree(MEMBERS_TREE)?,
            migration: db.open_tree(MIGRATION_TREE)?,
            history: db.open_tree(HISTORY_TREE)?,
            db,
            settings,
        })
    }

    /// Schedules a timeout the way the legacy timeout manager does.
    pub fn insert_timeout(&self, timeout: &TimeoutData) -> Result<(), ConnectorError> {
        let stored = StoredTimeout {
            timeout: timeout.clone(),
            status: TimeoutStatus::Available,
        };
        self.timeouts.insert(timeout.id.as_bytes(), encode(&stored)?)?;
        Ok(())
    }

    /// Number of timeouts still in the live tree, hidden ones included.
    pub fn timeout_count(&self) -> usize {
        self.timeouts.len()
    }

    pub fn migrated_count(&self) -> usize {
        self.migrated.len()
    }

    pub fn status_of(&self, id: &str) -> Result<Option<TimeoutStatus>, ConnectorError> {
        for tree in [&self.timeouts, &self.migrated] {
            if let Some(raw) = tree.get(id.as_bytes())? {
                let stored: StoredTimeout = decode(&raw)?;
                return Ok(Some(stored.status));
            }
        }
        Ok(None)
    }

    /// Completed runs, oldest first.
    pub fn history(&self) -> Result<Vec<MigrationRun>, ConnectorError> {
        self.history
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    pub async fn flush(&self) -> Result<(), ConnectorError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn load_run(&self) -> Result<Option<MigrationRun>, SourceError> {
        match self.migration.get(CURRENT_RUN_KEY).map_err(ConnectorError::from)? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn require_run(&self) -> Result<MigrationRun, SourceError> {
        self.load_run()?.ok_or(SourceError::NoMigrationInProgress)
    }

    fn save_run(&self, run: &MigrationRun) -> Result<(), SourceError> {
        self.migration
            .insert(CURRENT_RUN_KEY, encode(run)?)
            .map_err(ConnectorError::from)?;
        Ok(())
    }

    fn load_slot(&self, number: u32) -> Result<BatchSlot, SourceError> {
        let raw = self
            .batches
            .get(batch_key(number))
            .map_err(ConnectorError::from)?
            .ok_or(SourceError::BatchNotFound(number))?;
        Ok(decode(&raw)?)
    }

    fn save_slot(&self, number: u32, slot: BatchSlot) -> Result<(), SourceError> {
        self.batches
            .insert(batch_key(number), encode(&slot)?)
            .map_err(ConnectorError::from)?;
        Ok(())
    }

    fn load_members(&self, number: u32) -> Result<Vec<String>, SourceError> {
        let raw = self
            .members
            .get(batch_key(number))
            .map_err(ConnectorError::from)?
            .ok_or(SourceError::BatchNotFound(number))?;
        Ok(decode(&raw)?)
    }

    fn last_batch_number(&self) -> Result<u32, SourceError> {
        let last = self.batches.last().map_err(ConnectorError::from)?;
        Ok(last
            .and_then(|(key, _)| number_from_key(&key))
            .unwrap_or(0))
    }

    fn clear_batches(&self) -> Result<(), SourceError> {
        self.batches.clear().map_err(ConnectorError::from)?;
        self.members.clear().map_err(ConnectorError::from)?;
        Ok(())
    }

    fn state_for(&self, run: MigrationRun) -> Box<dyn ToolState> {
        Box::new(SledToolState {
            run,
            batches: self.batches.clone(),
        })
    }

    fn read_page(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(sled::IVec, StoredTimeout)>, SourceError> {
        let iter = match after {
            Some(key) => self
                .timeouts
                .range::<&[u8], _>((Bound::Excluded(key), Bound::Unbounded)),
            None => self.timeouts.iter(),
        };

        let mut page = Vec::with_capacity(limit);
        for entry in iter.take(limit) {
            let (key, raw) = entry.map_err(ConnectorError::from)?;
            page.push((key, decode(&raw)?));
        }
        Ok(page)
    }

    fn is_eligible(stored: &StoredTimeout, run: &MigrationRun) -> bool {
        match &stored.status {
            TimeoutStatus::Available => {
                stored.timeout.owning_timeout_manager == run.endpoint_name
                    && stored.timeout.time >= run.cutoff
            }
            // Hidden only together with its batch record, so already assigned.
            TimeoutStatus::InProgress { .. } | TimeoutStatus::Migrated => false,
        }
    }

    /// Records `batch` and hides its timeouts in one transaction.
    fn commit_batch(&self, token: &RunToken, batch: &BatchInfo) -> Result<(), SourceError> {
        let key = batch_key(batch.number);
        let slot_bytes = encode(&BatchSlot {
            state: batch.state,
            number_of_timeouts: batch.number_of_timeouts,
        })?;
        let member_bytes = encode(&batch.timeout_ids)?;

        let result = (&self.timeouts, &self.batches, &self.members).transaction(
            |(timeouts, batches, members)| -> ConflictableTransactionResult<(), SourceError> {
                for id in &batch.timeout_ids {
                    let Some(raw) = timeouts.get(id.as_bytes())? else {
                        return Err(abort(SourceError::MissingTimeout(id.clone())));
                    };
                    let mut stored: StoredTimeout =
                        decode(&raw).map_err(abort::<SourceError, _>)?;
                    stored.status = TimeoutStatus::InProgress {
                        token: token.clone(),
                        batch: batch.number,
                    };
                    let bytes = encode(&stored).map_err(abort::<SourceError, _>)?;
                    timeouts.insert(id.as_bytes(), bytes)?;
                }
                batches.insert(&key[..], slot_bytes.as_slice())?;
                members.insert(&key[..], member_bytes.as_slice())?;
                Ok(())
            },
        );
        map_transaction(result)?;

        debug!(
            batch = batch.number,
            timeouts = batch.number_of_timeouts,
            "Committed batch"
        );
        Ok(())
    }
}

fn map_transaction<T>(result: Result<T, TransactionError<SourceError>>) -> Result<T, SourceError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(ConnectorError::from(e).into()),
    }
}

fn slots(tree: &Tree) -> impl Iterator<Item = Result<(u32, BatchSlot), SourceError>> + '_ {
    tree.iter().map(|entry| {
        let (key, raw) = entry.map_err(ConnectorError::from)?;
        let number = number_from_key(&key).ok_or_else(|| {
            SourceError::Serialization(format!("Malformed batch key of {} bytes", key.len()))
        })?;
        Ok((number, decode(&raw)?))
    })
}

/// First staged batch, otherwise the lowest pending one. Stops at the first
/// staged slot; never touches membership.
fn next_slot(tree: &Tree) -> Result<Option<BatchInfo>, SourceError> {
    let mut pending = None;
    for entry in slots(tree) {
        let (number, slot) = entry?;
        match slot.state {
            BatchState::Staged => return Ok(Some(slot.info(number))),
            BatchState::Pending if pending.is_none() => pending = Some(slot.info(number)),
            _ => {}
        }
    }
    Ok(pending)
}

#[async_trait]
impl TimeoutsSource for SledTimeoutsSource {
    async fn try_load_ongoing_migration(&self) -> Result<Option<Box<dyn ToolState>>, SourceError> {
        Ok(self
            .load_run()?
            .filter(|run| !run.status.is_terminal())
            .map(|run| self.state_for(run)))
    }

    async fn list_endpoints(&self, cutoff: DateTime<Utc>) -> Result<Vec<EndpointInfo>, SourceError> {
        let mut aggregator = EndpointAggregator::new();

        for raw in self.timeouts.iter().values() {
            let raw = raw.map_err(ConnectorError::from)?;
            let stored: StoredTimeout = decode(&raw)?;
            let timeout = &stored.timeout;
            if stored.status == TimeoutStatus::Migrated || timeout.time < cutoff {
                continue;
            }
            aggregator.record(
                &timeout.owning_timeout_manager,
                &timeout.destination,
                1,
                timeout.time,
                timeout.time,
            );
        }

        Ok(aggregator.finish())
    }

    async fn prepare(
        &self,
        cutoff: DateTime<Utc>,
        endpoint_name: &str,
        run_parameters: &RunParameters,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ToolState>, SourceError> {
        let mut run = match self.load_run()? {
            Some(run) if run.matches(endpoint_name, cutoff, run_parameters) => {
                if run.status == MigrationStatus::StoragePrepared {
                    info!(endpoint = %run.endpoint_name, "Resuming prepared migration");
                    return Ok(self.state_for(run));
                }
                info!(endpoint = %run.endpoint_name, "Resuming interrupted preparation");
                run
            }
            Some(run) => {
                return Err(SourceError::ConflictingMigration {
                    endpoint: run.endpoint_name,
                    cutoff: run.cutoff,
                    requested_endpoint: endpoint_name.to_string(),
                    requested_cutoff: cutoff,
                });
            }
            None => {
                self.clear_batches()?;
                let run = MigrationRun::start(endpoint_name, cutoff, run_parameters);
                self.save_run(&run)?;
                info!(endpoint = endpoint_name, %cutoff, token = %run.token, "Started migration run");
                run
            }
        };

        let mut assembler =
            BatchAssembler::resume(self.settings.batch_size(), self.last_batch_number()?);
        let mut cursor: Option<sled::IVec> = None;

        loop {
            if cancel.is_cancelled() {
                warn!(endpoint = endpoint_name, "Preparation cancelled");
                return Err(SourceError::Cancelled);
            }

            let page = self.read_page(cursor.as_deref(), self.settings.page_size())?;
            let Some((last_key, _)) = page.last() else {
                break;
            };
            cursor = Some(last_key.clone());

            for (_, stored) in page {
                if !Self::is_eligible(&stored, &run) {
                    continue;
                }
                if let Some(batch) = assembler.push(stored.timeout.id) {
                    self.commit_batch(&run.token, &batch)?;
                }
            }
            tokio::task::yield_now().await;
        }

        if let Some(batch) = assembler.finish() {
            self.commit_batch(&run.token, &batch)?;
        }

        let next = MigrationStatus::StoragePrepared;
        if !run.status.can_transition_to(next) {
            return Err(SourceError::InvalidStatusTransition {
                from: run.status,
                to: next,
            });
        }
        run.status = next;
        run.number_of_batches = assembler.last_number();
        self.save_run(&run)?;
        self.flush().await?;

        info!(
            endpoint = endpoint_name,
            batches = run.number_of_batches,
            "Storage prepared"
        );
        Ok(self.state_for(run))
    }

    async fn read_batch(&self, batch_number: u32) -> Result<Vec<TimeoutData>, SourceError> {
        let ids = self.load_members(batch_number)?;
        let mut timeouts = Vec::with_capacity(ids.len());

        for id in &ids {
            let raw = match self.timeouts.get(id.as_bytes()).map_err(ConnectorError::from)? {
                Some(raw) => raw,
                None => self
                    .migrated
                    .get(id.as_bytes())
                    .map_err(ConnectorError::from)?
                    .ok_or_else(|| SourceError::MissingTimeout(id.clone()))?,
            };
            let stored: StoredTimeout = decode(&raw)?;
            timeouts.push(stored.timeout);
        }
        Ok(timeouts)
    }

    async fn mark_batch_as_staged(&self, batch_number: u32) -> Result<(), SourceError> {
        self.require_run()?;
        let mut slot = self.load_slot(batch_number)?;
        if slot.state == BatchState::Staged {
            return Ok(());
        }
        if !slot.state.can_transition_to(BatchState::Staged) {
            return Err(SourceError::InvalidBatchTransition {
                number: batch_number,
                from: slot.state,
                to: BatchState::Staged,
            });
        }
        slot.state = BatchState::Staged;
        self.save_slot(batch_number, slot)
    }

    async fn mark_batch_as_completed(&self, batch_number: u32) -> Result<(), SourceError> {
        self.require_run()?;
        let mut slot = self.load_slot(batch_number)?;
        if slot.state == BatchState::Completed {
            return Ok(());
        }
        let ids = self.load_members(batch_number)?;
        slot.state = BatchState::Completed;
        let slot_bytes = encode(&slot)?;

        let result = (&self.timeouts, &self.migrated, &self.batches).transaction(
            |(timeouts, migrated, batches)| -> ConflictableTransactionResult<(), SourceError> {
                for id in &ids {
                    let Some(raw) = timeouts.remove(id.as_bytes())? else {
                        continue;
                    };
                    let mut stored: StoredTimeout =
                        decode(&raw).map_err(abort::<SourceError, _>)?;
                    stored.status = TimeoutStatus::Migrated;
                    let bytes = encode(&stored).map_err(abort::<SourceError, _>)?;
                    migrated.insert(id.as_bytes(), bytes)?;
                }
                batches.insert(&batch_key(batch_number)[..], slot_bytes.as_slice())?;
                Ok(())
            },
        );
        map_transaction(result)?;

        debug!(batch = batch_number, "Batch completed");
        Ok(())
    }

    async fn complete(&self) -> Result<(), SourceError> {
        let mut run = self.require_run()?;
        let next = MigrationStatus::Completed;
        if !run.status.can_transition_to(next) {
            return Err(SourceError::InvalidStatusTransition {
                from: run.status,
                to: next,
            });
        }

        for entry in slots(&self.batches) {
            let (number, slot) = entry?;
            if slot.state != BatchState::Completed {
                return Err(SourceError::IncompleteBatches(number));
            }
        }

        run.status = next;
        run.completed_at = Some(Utc::now());
        let history_key = format!("{}-{}", run.started_at.timestamp_micros(), run.token);
        let run_bytes = encode(&run)?;

        // Batches go first: a crash afterwards leaves a run with nothing left
        // to do, which completes again on the next attempt.
        self.clear_batches()?;
        let result = (&self.migration, &self.history).transaction(
            |(migration, history)| -> ConflictableTransactionResult<(), SourceError> {
                history.insert(history_key.as_bytes(), run_bytes.as_slice())?;
                migration.remove(CURRENT_RUN_KEY)?;
                Ok(())
            },
        );
        map_transaction(result)?;
        self.flush().await?;

        info!(endpoint = %run.endpoint_name, "Migration run completed");
        Ok(())
    }

    async fn abort(&self) -> Result<(), SourceError> {
        let Some(run) = self.load_run()? else {
            debug!("Nothing to abort");
            return Ok(());
        };

        let mut restored = 0usize;
        let mut cursor: Option<sled::IVec> = None;
        loop {
            let page = self.read_page(cursor.as_deref(), self.settings.page_size())?;
            let Some((last_key, _)) = page.last() else {
                break;
            };
            cursor = Some(last_key.clone());

            let mut writes = sled::Batch::default();
            for (key, mut stored) in page {
                if let TimeoutStatus::InProgress { token, .. } = &stored.status
                    && token == &run.token
                {
                    stored.status = TimeoutStatus::Available;
                    writes.insert(key, encode(&stored)?);
                    restored += 1;
                }
            }
            self.timeouts
                .apply_batch(writes)
                .map_err(ConnectorError::from)?;
        }

        self.clear_batches()?;
        self.migration
            .remove(CURRENT_RUN_KEY)
            .map_err(ConnectorError::from)?;
        self.flush().await?;

        info!(endpoint = %run.endpoint_name, restored, "Migration run aborted");
        Ok(())
    }
}

/// Run handle reading batch state straight from the store.
pub struct SledToolState {
    run: MigrationRun,
    batches: Tree,
}

#[async_trait]
impl ToolState for SledToolState {
    fn endpoint_name(&self) -> &str {
        &self.run.endpoint_name
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.run.cutoff
    }

    fn run_parameters(&self) -> &RunParameters {
        &self.run.run_parameters
    }

    fn number_of_batches(&self) -> u32 {
        self.run.number_of_batches
    }

    fn status(&self) -> MigrationStatus {
        self.run.status
    }

    async fn try_get_next_batch(&self) -> Result<Option<BatchInfo>, SourceError> {
        next_slot(&self.batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn source(batch_size: usize) -> (TempDir, SledTimeoutsSource) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = MigrationSettings::default();
        settings.set_batch_size(batch_size);
        settings.set_page_size(4);
        let source = SledTimeoutsSource::open(dir.path(), settings).unwrap();
        (dir, source)
    }

    fn timeout(id: &str, endpoint: &str, due_in_days: i64) -> TimeoutData {
        TimeoutData {
            id: id.to_string(),
            destination: format!("{endpoint}.Handler"),
            saga_id: Uuid::new_v4(),
            time: Utc::now() + Duration::days(due_in_days),
            headers: BTreeMap::from([("Content-Type".into(), "application/json".into())]),
            state: b"{}".to_vec(),
            owning_timeout_manager: endpoint.to_string(),
        }
    }

    fn seed(source: &SledTimeoutsSource, endpoint: &str, count: usize) {
        for i in 0..count {
            let t = timeout(&format!("{endpoint}-{i:03}"), endpoint, 7 + i as i64);
            source.insert_timeout(&t).unwrap();
        }
    }

    #[tokio::test]
    async fn prepare_partitions_and_hides_eligible_timeouts() {
        let (_dir, source) = source(3);
        seed(&source, "Sales", 10);
        seed(&source, "Billing", 2);

        let state = source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.number_of_batches(), 4);
        assert_eq!(state.status(), MigrationStatus::StoragePrepared);

        let sizes: Vec<_> = slots(&source.batches)
            .map(|entry| entry.unwrap().1.number_of_timeouts)
            .collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);

        assert!(matches!(
            source.status_of("Sales-000").unwrap(),
            Some(TimeoutStatus::InProgress { batch: 1, .. })
        ));
        assert_eq!(
            source.status_of("Billing-000").unwrap(),
            Some(TimeoutStatus::Available)
        );
    }

    #[tokio::test]
    async fn prepare_respects_cutoff() {
        let (_dir, source) = source(1);
        seed(&source, "Sales", 10);

        let state = source
            .prepare(
                Utc::now() + Duration::days(10),
                "Sales",
                &RunParameters::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Due dates are now+7d .. now+16d.
        assert_eq!(state.number_of_batches(), 6);
    }

    #[tokio::test]
    async fn prepare_with_different_parameters_conflicts() {
        let (_dir, source) = source(5);
        seed(&source, "Sales", 3);
        seed(&source, "Billing", 3);
        let cutoff = Utc::now();
        let cancel = CancellationToken::new();

        source
            .prepare(cutoff, "Sales", &RunParameters::new(), &cancel)
            .await
            .unwrap();
        let err = source
            .prepare(cutoff, "Billing", &RunParameters::new(), &cancel)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SourceError::ConflictingMigration { .. }));
    }

    #[tokio::test]
    async fn prepare_twice_resumes_the_same_run() {
        let (_dir, source) = source(4);
        seed(&source, "Sales", 6);
        let cutoff = Utc::now();
        let cancel = CancellationToken::new();

        let first = source
            .prepare(cutoff, "Sales", &RunParameters::new(), &cancel)
            .await
            .unwrap();
        let second = source
            .prepare(cutoff, "Sales", &RunParameters::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(first.number_of_batches(), second.number_of_batches());
        assert_eq!(slots(&source.batches).count(), 2);
        assert_eq!(source.members.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_preparation_resumes_without_duplicates() {
        let (_dir, source) = source(2);
        seed(&source, "Sales", 7);
        let cutoff = Utc::now();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source
            .prepare(cutoff, "Sales", &RunParameters::new(), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Cancelled));
        assert!(source.check_if_a_migration_is_in_progress().await.unwrap());

        let state = source
            .prepare(cutoff, "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.number_of_batches(), 4);

        let mut ids: Vec<String> = source
            .members
            .iter()
            .values()
            .flat_map(|raw| decode::<Vec<String>>(&raw.unwrap()).unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 7);
    }

    #[tokio::test]
    async fn read_batch_is_stable() {
        let (_dir, source) = source(3);
        seed(&source, "Sales", 5);
        source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        let first = source.read_batch(1).await.unwrap();
        let second = source.read_batch(1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|t| t.owning_timeout_manager == "Sales"));
    }

    #[tokio::test]
    async fn listing_counts_hidden_but_not_migrated_timeouts() {
        let (_dir, source) = source(2);
        seed(&source, "Sales", 4);
        let state = source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        let listed = source.list_endpoints(Utc::now()).await.unwrap();
        assert_eq!(listed[0].nr_of_timeouts, 4);

        let next = state.try_get_next_batch().await.unwrap().unwrap();
        source.mark_batch_as_staged(next.number).await.unwrap();
        source.mark_batch_as_completed(next.number).await.unwrap();

        let listed = source.list_endpoints(Utc::now()).await.unwrap();
        assert_eq!(listed[0].nr_of_timeouts, 2);
        assert_eq!(source.migrated_count(), 2);
    }

    #[tokio::test]
    async fn staged_batch_is_picked_before_pending_ones() {
        let (_dir, source) = source(1);
        seed(&source, "Sales", 3);
        let state = source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        source.mark_batch_as_staged(2).await.unwrap();
        assert_eq!(state.try_get_next_batch().await.unwrap().unwrap().number, 2);
    }

    #[tokio::test]
    async fn complete_requires_every_batch_completed() {
        let (_dir, source) = source(2);
        seed(&source, "Sales", 3);
        let state = source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            source.complete().await,
            Err(SourceError::IncompleteBatches(1))
        ));

        while let Some(batch) = state.try_get_next_batch().await.unwrap() {
            source.mark_batch_as_staged(batch.number).await.unwrap();
            source.mark_batch_as_completed(batch.number).await.unwrap();
        }
        source.complete().await.unwrap();

        assert!(!source.check_if_a_migration_is_in_progress().await.unwrap());
        assert_eq!(source.timeout_count(), 0);
        assert_eq!(source.history().unwrap().len(), 1);
        assert_eq!(source.history().unwrap()[0].status, MigrationStatus::Completed);
    }

    #[tokio::test]
    async fn abort_restores_unfinished_batches_only() {
        let (_dir, source) = source(2);
        seed(&source, "Sales", 4);
        source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        source.mark_batch_as_staged(1).await.unwrap();
        source.mark_batch_as_completed(1).await.unwrap();

        source.abort().await.unwrap();
        source.abort().await.unwrap();

        assert!(!source.check_if_a_migration_is_in_progress().await.unwrap());
        assert_eq!(source.timeout_count(), 2);
        assert_eq!(source.migrated_count(), 2);
        for id in ["Sales-002", "Sales-003"] {
            assert_eq!(source.status_of(id).unwrap(), Some(TimeoutStatus::Available));
        }
    }

    #[tokio::test]
    async fn completed_batch_cannot_be_staged_again() {
        let (_dir, source) = source(5);
        seed(&source, "Sales", 1);
        source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        source.mark_batch_as_staged(1).await.unwrap();
        source.mark_batch_as_completed(1).await.unwrap();

        assert!(matches!(
            source.mark_batch_as_staged(1).await,
            Err(SourceError::InvalidBatchTransition { .. })
        ));
    }

    #[tokio::test]
    async fn next_batch_comes_from_state_records_only() {
        let (_dir, source) = source(2);
        seed(&source, "Sales", 5);
        let state = source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        // Membership is not needed to pick a batch.
        source.members.clear().unwrap();

        let next = state.try_get_next_batch().await.unwrap().unwrap();
        assert_eq!(next.number, 1);
        assert_eq!(next.state, BatchState::Pending);
        assert_eq!(next.number_of_timeouts, 2);
        assert!(next.timeout_ids.is_empty());

        source.mark_batch_as_staged(3).await.unwrap();
        let next = state.try_get_next_batch().await.unwrap().unwrap();
        assert_eq!((next.number, next.state), (3, BatchState::Staged));
        assert_eq!(next.number_of_timeouts, 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn abort_before_any_batch_completes_restores_everything() {
        let (_dir, source) = source(3);
        seed(&source, "Sales", 8);
        let cutoff = Utc::now();
        source
            .prepare(cutoff, "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        source.abort().await.unwrap();

        assert!(source.try_load_ongoing_migration().await.unwrap().is_none());
        let listed = source.list_endpoints(cutoff).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].nr_of_timeouts, 8);
        for i in 0..8 {
            assert_eq!(
                source.status_of(&format!("Sales-{i:03}")).unwrap(),
                Some(TimeoutStatus::Available)
            );
        }
        assert_eq!(source.migrated_count(), 0);
        assert!(source.batches.is_empty() && source.members.is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn abort_after_partial_preparation_restores_only_its_own_rows() {
        let (_dir, source) = source(2);
        seed(&source, "Sales", 6);

        // Hidden by some other run that never cleaned up.
        let foreign = RunToken::generate();
        let stray = StoredTimeout {
            timeout: timeout("Sales-stray", "Sales", 30),
            status: TimeoutStatus::InProgress {
                token: foreign.clone(),
                batch: 9,
            },
        };
        source
            .timeouts
            .insert(b"Sales-stray", encode(&stray).unwrap())
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source
            .prepare(Utc::now(), "Sales", &RunParameters::new(), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Cancelled));

        // One batch got committed before the interruption.
        let run = source.load_run().unwrap().unwrap();
        let first = BatchInfo::new(1, vec!["Sales-000".into(), "Sales-001".into()]);
        source.commit_batch(&run.token, &first).unwrap();
        assert!(matches!(
            source.status_of("Sales-001").unwrap(),
            Some(TimeoutStatus::InProgress { batch: 1, .. })
        ));

        source.abort().await.unwrap();

        for i in 0..6 {
            assert_eq!(
                source.status_of(&format!("Sales-{i:03}")).unwrap(),
                Some(TimeoutStatus::Available)
            );
        }
        assert_eq!(
            source.status_of("Sales-stray").unwrap(),
            Some(TimeoutStatus::InProgress {
                token: foreign,
                batch: 9
            })
        );
        assert!(source.try_load_ongoing_migration().await.unwrap().is_none());
    }

    #[traced_test]
    #[tokio::test]
    async fn fully_migrated_endpoint_is_not_listed() {
        let (_dir, source) = source(5);
        seed(&source, "Sales", 2);
        seed(&source, "Billing", 3);
        let cutoff = Utc::now();
        let state = source
            .prepare(cutoff, "Billing", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        while let Some(batch) = state.try_get_next_batch().await.unwrap() {
            source.mark_batch_as_staged(batch.number).await.unwrap();
            source.mark_batch_as_completed(batch.number).await.unwrap();
        }

        let listed = source.list_endpoints(cutoff).await.unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.endpoint_name.as_str()).collect();
        assert_eq!(names, vec!["Sales"]);
        assert_eq!(source.migrated_count(), 3);
    }
}
