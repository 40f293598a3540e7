use crate::{
    error::ConnectorError,
    sql::base::{
        dialect::TimeoutDialect,
        executor::{SqlExecutor, SqlStatement},
        query::generator::QueryGenerator,
        row::{SqlParam, SqlRow},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{
    connectors::source::TimeoutsSource,
    error::SourceError,
    partition::BatchAssembler,
    settings::MigrationSettings,
    state::{ToolState, select_next_batch},
};
use model::{
    core::{
        identifiers::RunToken,
        owner::{MIGRATED_PREFIX, OwnerMarker},
    },
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
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Batch membership rows written per `INSERT` statement.
const MEMBERS_PER_STATEMENT: usize = 500;

/// Table layout of a SQL timeout store.
#[derive(Debug, Clone)]
pub struct SqlSourceOptions {
    pub timeouts_table: String,
    pub runs_table: String,
    pub batches_table: String,
    /// Delete migrated timeouts instead of tagging their owner as migrated.
    pub delete_migrated: bool,
}

impl Default for SqlSourceOptions {
    fn default() -> Self {
        Self {
            timeouts_table: "TimeoutEntity".into(),
            runs_table: "TimeoutsMigration_State".into(),
            batches_table: "TimeoutsMigration_Batches".into(),
            delete_migrated: true,
        }
    }
}

/// Legacy timeout table in PostgreSQL or MySQL.
///
/// Ownership is tracked by rewriting the owner column (see [`OwnerMarker`]);
/// run and batch bookkeeping live in two side tables created on demand.
#[derive(Clone)]
pub struct SqlTimeoutsSource {
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn TimeoutDialect>,
    options: SqlSourceOptions,
    settings: MigrationSettings,
}

impl SqlTimeoutsSource {
    /// Creates the bookkeeping tables when missing.
    pub async fn new(
        executor: Arc<dyn SqlExecutor>,
        dialect: Arc<dyn TimeoutDialect>,
        options: SqlSourceOptions,
        settings: MigrationSettings,
    ) -> Result<Self, ConnectorError> {
        let source = SqlTimeoutsSource {
            executor,
            dialect,
            options,
            settings,
        };

        let generator = source.generator();
        source
            .executor
            .batch_execute(&[
                generator.create_run_table(&source.options.runs_table),
                generator.create_batch_table(&source.options.batches_table),
            ])
            .await?;

        debug!(dialect = source.dialect.name(), "SQL timeout source ready");
        Ok(source)
    }

    /// Creates the legacy timeout table itself; used to provision test stores.
    pub async fn create_timeouts_table(&self) -> Result<(), ConnectorError> {
        let sql = self
            .generator()
            .create_timeouts_table(&self.options.timeouts_table);
        self.executor.batch_execute(&[sql]).await
    }

    /// Schedules a timeout the way the legacy timeout manager does.
    pub async fn insert_timeout(&self, timeout: &TimeoutData) -> Result<(), ConnectorError> {
        let sql = self.generator().insert_timeout(&self.options.timeouts_table);
        let saga_id = if timeout.has_saga() {
            SqlParam::Text(timeout.saga_id.to_string())
        } else {
            SqlParam::Text(String::new())
        };
        let params = vec![
            SqlParam::from(timeout.id.as_str()),
            SqlParam::from(timeout.destination.as_str()),
            saga_id,
            SqlParam::Time(timeout.time),
            SqlParam::Text(serde_json::to_string(&timeout.headers)?),
            SqlParam::Bytes(timeout.state.clone()),
            SqlParam::from(timeout.owning_timeout_manager.as_str()),
        ];
        self.executor.execute(&sql, &params).await?;
        Ok(())
    }

    /// Number of rows in the legacy timeout table, hidden and tagged ones included.
    pub async fn timeout_count(&self) -> Result<u64, ConnectorError> {
        let sql = self.generator().count_rows(&self.options.timeouts_table);
        let rows = self.executor.query(&sql, &[]).await?;
        match rows.first() {
            Some(row) => Ok(row.get_i64(0)? as u64),
            None => Ok(0),
        }
    }

    fn generator(&self) -> QueryGenerator<'_> {
        QueryGenerator::new(self.dialect.as_ref())
    }

    /// Bounds a storage call by the configured command timeout.
    async fn timed<T, F>(&self, fut: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, ConnectorError>>,
    {
        bounded(self.settings.command_timeout(), fut).await
    }

    async fn load_run(&self) -> Result<Option<MigrationRun>, SourceError> {
        let sql = self.generator().select_runs_with_status(
            &self.options.runs_table,
            &[
                MigrationStatus::Preparing.code(),
                MigrationStatus::StoragePrepared.code(),
            ],
        );
        let rows = self.timed(self.executor.query(&sql, &[])).await?;
        match rows.first() {
            Some(row) => Ok(Some(Self::run_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn require_run(&self) -> Result<MigrationRun, SourceError> {
        self.load_run()
            .await?
            .ok_or(SourceError::NoMigrationInProgress)
    }

    fn run_from_row(row: &SqlRow) -> Result<MigrationRun, SourceError> {
        let raw_token = row.get_text(0)?;
        let token = RunToken::parse(&raw_token).ok_or_else(|| {
            SourceError::Serialization(format!("Invalid run token '{raw_token}'"))
        })?;
        let status_code = row.get_i64(2)?;
        Ok(MigrationRun {
            token,
            endpoint_name: row.get_text(1)?,
            status: MigrationStatus::from_code(status_code).ok_or_else(|| {
                SourceError::Serialization(format!("Unknown migration status {status_code}"))
            })?,
            cutoff: row.get_time(3)?,
            run_parameters: serde_json::from_str(&row.get_text(4)?)
                .map_err(ConnectorError::from)?,
            number_of_batches: row.get_i64(5)? as u32,
            started_at: row.get_time(6)?,
            completed_at: row.get_opt_time(7)?,
        })
    }

    fn state_for(&self, run: MigrationRun) -> Box<dyn ToolState> {
        Box::new(SqlToolState {
            run,
            executor: self.executor.clone(),
            summary_sql: self.generator().batch_summary(&self.options.batches_table),
            command_timeout: self.settings.command_timeout(),
        })
    }

    async fn insert_run(&self, run: &MigrationRun) -> Result<(), SourceError> {
        let sql = self.generator().insert_run(&self.options.runs_table);
        let params = vec![
            SqlParam::from(run.token.as_str()),
            SqlParam::from(run.endpoint_name.as_str()),
            SqlParam::Int(run.status.code()),
            SqlParam::Time(run.cutoff),
            SqlParam::Text(serde_json::to_string(&run.run_parameters).map_err(ConnectorError::from)?),
            SqlParam::from(run.number_of_batches),
            SqlParam::Time(run.started_at),
            SqlParam::OptTime(run.completed_at),
        ];
        self.timed(self.executor.execute(&sql, &params)).await?;
        Ok(())
    }

    fn update_run_statement(&self, run: &MigrationRun) -> SqlStatement {
        SqlStatement::new(
            self.generator().update_run(&self.options.runs_table),
            vec![
                SqlParam::Int(run.status.code()),
                SqlParam::from(run.number_of_batches),
                SqlParam::OptTime(run.completed_at),
                SqlParam::from(run.token.as_str()),
            ],
        )
    }

    /// Writes the membership rows of `batch` and hides its timeouts atomically.
    async fn commit_batch(&self, batch: &BatchInfo, hidden_owner: &str) -> Result<(), SourceError> {
        let generator = self.generator();
        let batches = &self.options.batches_table;

        let mut statements: Vec<SqlStatement> = batch
            .timeout_ids
            .chunks(MEMBERS_PER_STATEMENT)
            .map(|ids| {
                let params = ids
                    .iter()
                    .flat_map(|id| {
                        [
                            SqlParam::from(batch.number),
                            SqlParam::from(id.as_str()),
                            SqlParam::Int(BatchState::Pending.code()),
                        ]
                    })
                    .collect();
                SqlStatement::new(generator.insert_batch_members(batches, ids.len()), params)
            })
            .collect();
        statements.push(SqlStatement::new(
            generator.hide_batch(&self.options.timeouts_table, batches),
            vec![SqlParam::from(hidden_owner), SqlParam::from(batch.number)],
        ));

        let affected = self
            .timed(self.executor.execute_in_transaction(&statements))
            .await?;
        debug!(
            batch = batch.number,
            timeouts = batch.number_of_timeouts,
            hidden = affected.last().copied().unwrap_or_default(),
            "Committed batch"
        );
        Ok(())
    }

    async fn batch_state(&self, batch_number: u32) -> Result<BatchState, SourceError> {
        let sql = self.generator().batch_state(&self.options.batches_table);
        let rows = self
            .timed(self.executor.query(&sql, &[SqlParam::from(batch_number)]))
            .await?;

        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            states.push(decode_batch_state(row.get_i64(0)?)?);
        }
        // Rows of one batch change state together; a mix means an update was
        // interrupted outside a transaction, so report the least advanced one.
        states
            .into_iter()
            .min_by_key(|s| s.code())
            .ok_or(SourceError::BatchNotFound(batch_number))
    }

    fn update_batch_state_statement(&self, batch_number: u32, state: BatchState) -> SqlStatement {
        SqlStatement::new(
            self.generator()
                .update_batch_state(&self.options.batches_table),
            vec![SqlParam::Int(state.code()), SqlParam::from(batch_number)],
        )
    }
}

fn decode_batch_state(code: i64) -> Result<BatchState, SourceError> {
    BatchState::from_code(code)
        .ok_or_else(|| SourceError::Serialization(format!("Unknown batch state {code}")))
}

fn timeout_from_row(row: &SqlRow) -> Result<TimeoutData, SourceError> {
    let saga_id = match row.get_opt_text(2)? {
        Some(raw) if !raw.trim().is_empty() => Uuid::parse_str(raw.trim())
            .map_err(|e| SourceError::Serialization(format!("Invalid saga id '{raw}': {e}")))?,
        _ => Uuid::nil(),
    };
    let headers: BTreeMap<String, String> = match row.get_opt_text(4)? {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).map_err(ConnectorError::from)?
        }
        _ => BTreeMap::new(),
    };
    let owner = OwnerMarker::parse(&row.get_text(6)?);

    Ok(TimeoutData {
        id: row.get_text(0)?,
        destination: row.get_text(1)?,
        saga_id,
        time: row.get_time(3)?,
        headers,
        state: row.get_bytes(5)?,
        owning_timeout_manager: owner.endpoint().to_string(),
    })
}

#[async_trait]
impl TimeoutsSource for SqlTimeoutsSource {
    async fn try_load_ongoing_migration(&self) -> Result<Option<Box<dyn ToolState>>, SourceError> {
        Ok(self.load_run().await?.map(|run| self.state_for(run)))
    }

    async fn list_endpoints(&self, cutoff: DateTime<Utc>) -> Result<Vec<EndpointInfo>, SourceError> {
        let sql = self
            .generator()
            .endpoint_summary(&self.options.timeouts_table);
        let rows = self
            .timed(self.executor.query(&sql, &[SqlParam::Time(cutoff)]))
            .await?;

        summarize_endpoints(&rows)
    }

    async fn prepare(
        &self,
        cutoff: DateTime<Utc>,
        endpoint_name: &str,
        run_parameters: &RunParameters,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ToolState>, SourceError> {
        let mut run = match self.load_run().await? {
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
                let run = MigrationRun::start(endpoint_name, cutoff, run_parameters);
                self.insert_run(&run).await?;
                info!(endpoint = endpoint_name, %cutoff, token = %run.token, "Started migration run");
                run
            }
        };

        let generator = self.generator();
        let rows = self
            .timed(self.executor.query(
                &generator.max_batch_number(&self.options.batches_table),
                &[],
            ))
            .await?;
        let last_number = match rows.first() {
            Some(row) => row.get_i64(0)? as u32,
            None => 0,
        };

        let hidden_owner = OwnerMarker::InProgress {
            token: run.token.clone(),
            endpoint: run.endpoint_name.clone(),
        }
        .to_string();
        let page_sql = generator.eligible_page(
            &self.options.timeouts_table,
            &self.options.batches_table,
            self.settings.page_size(),
        );
        let mut assembler = BatchAssembler::resume(self.settings.batch_size(), last_number);
        let mut after = String::new();

        loop {
            if cancel.is_cancelled() {
                warn!(endpoint = endpoint_name, "Preparation cancelled");
                return Err(SourceError::Cancelled);
            }

            let params = [
                SqlParam::from(endpoint_name),
                SqlParam::from(hidden_owner.as_str()),
                SqlParam::Time(cutoff),
                SqlParam::from(after.as_str()),
            ];
            let rows = self.timed(self.executor.query(&page_sql, &params)).await?;
            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let id = row.get_text(0)?;
                after.clone_from(&id);
                if let Some(batch) = assembler.push(id) {
                    self.commit_batch(&batch, &hidden_owner).await?;
                }
            }
        }

        if let Some(batch) = assembler.finish() {
            self.commit_batch(&batch, &hidden_owner).await?;
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
        let statement = self.update_run_statement(&run);
        self.timed(self.executor.execute(&statement.sql, &statement.params))
            .await?;

        info!(
            endpoint = endpoint_name,
            batches = run.number_of_batches,
            "Storage prepared"
        );
        Ok(self.state_for(run))
    }

    async fn read_batch(&self, batch_number: u32) -> Result<Vec<TimeoutData>, SourceError> {
        let sql = self
            .generator()
            .read_batch(&self.options.timeouts_table, &self.options.batches_table);
        let rows = self
            .timed(self.executor.query(&sql, &[SqlParam::from(batch_number)]))
            .await?;
        if rows.is_empty() {
            // Distinguish an unknown batch from one whose rows were deleted on completion.
            self.batch_state(batch_number).await?;
        }
        rows.iter().map(timeout_from_row).collect()
    }

    async fn mark_batch_as_staged(&self, batch_number: u32) -> Result<(), SourceError> {
        self.require_run().await?;
        let state = self.batch_state(batch_number).await?;
        if state == BatchState::Staged {
            return Ok(());
        }
        if !state.can_transition_to(BatchState::Staged) {
            return Err(SourceError::InvalidBatchTransition {
                number: batch_number,
                from: state,
                to: BatchState::Staged,
            });
        }

        let statement = self.update_batch_state_statement(batch_number, BatchState::Staged);
        self.timed(self.executor.execute(&statement.sql, &statement.params))
            .await?;
        Ok(())
    }

    async fn mark_batch_as_completed(&self, batch_number: u32) -> Result<(), SourceError> {
        self.require_run().await?;
        if self.batch_state(batch_number).await? == BatchState::Completed {
            return Ok(());
        }

        let generator = self.generator();
        let timeouts = &self.options.timeouts_table;
        let batches = &self.options.batches_table;
        let migrate = if self.options.delete_migrated {
            SqlStatement::new(
                generator.delete_batch_timeouts(timeouts, batches),
                vec![SqlParam::from(batch_number)],
            )
        } else {
            SqlStatement::new(
                generator.tag_batch_timeouts(timeouts, batches, OwnerMarker::hidden_prefix_len()),
                vec![SqlParam::from(MIGRATED_PREFIX), SqlParam::from(batch_number)],
            )
        };
        let statements = [
            migrate,
            self.update_batch_state_statement(batch_number, BatchState::Completed),
        ];

        self.timed(self.executor.execute_in_transaction(&statements))
            .await?;
        debug!(batch = batch_number, "Batch completed");
        Ok(())
    }

    async fn complete(&self) -> Result<(), SourceError> {
        let mut run = self.require_run().await?;
        let next = MigrationStatus::Completed;
        if !run.status.can_transition_to(next) {
            return Err(SourceError::InvalidStatusTransition {
                from: run.status,
                to: next,
            });
        }

        let summary = self
            .timed(self.executor.query(
                &self.generator().batch_summary(&self.options.batches_table),
                &[],
            ))
            .await?;
        for row in &summary {
            if decode_batch_state(row.get_i64(1)?)? != BatchState::Completed {
                return Err(SourceError::IncompleteBatches(row.get_i64(0)? as u32));
            }
        }

        run.status = next;
        run.completed_at = Some(Utc::now());
        let statements = [
            self.update_run_statement(&run),
            SqlStatement::new(
                self.generator().delete_all(&self.options.batches_table),
                Vec::new(),
            ),
        ];
        self.timed(self.executor.execute_in_transaction(&statements))
            .await?;

        info!(endpoint = %run.endpoint_name, "Migration run completed");
        Ok(())
    }

    async fn abort(&self) -> Result<(), SourceError> {
        let Some(run) = self.load_run().await? else {
            debug!("Nothing to abort");
            return Ok(());
        };

        let generator = self.generator();
        let statements = [
            SqlStatement::new(
                generator.restore_hidden(
                    &self.options.timeouts_table,
                    OwnerMarker::hidden_prefix_len(),
                ),
                vec![SqlParam::Text(OwnerMarker::hidden_prefix(&run.token))],
            ),
            SqlStatement::new(generator.delete_all(&self.options.batches_table), Vec::new()),
            SqlStatement::new(
                generator.delete_run(&self.options.runs_table),
                vec![SqlParam::from(run.token.as_str())],
            ),
        ];
        let affected = self
            .timed(self.executor.execute_in_transaction(&statements))
            .await?;

        info!(
            endpoint = %run.endpoint_name,
            restored = affected.first().copied().unwrap_or_default(),
            "Migration run aborted"
        );
        Ok(())
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, ConnectorError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}

/// Folds `(owner, destination, count, shortest, longest)` rows per endpoint.
/// Rows tagged as migrated are dropped; hidden rows count for their endpoint.
fn summarize_endpoints(rows: &[SqlRow]) -> Result<Vec<EndpointInfo>, SourceError> {
    let mut aggregator = EndpointAggregator::new();
    for row in rows {
        let owner = OwnerMarker::parse(&row.get_text(0)?);
        aggregator.record_owner(
            &owner,
            &row.get_text(1)?,
            row.get_i64(2)? as u64,
            row.get_time(3)?,
            row.get_time(4)?,
        );
    }
    Ok(aggregator.finish())
}

/// Run handle reading batch progress from the batch table.
pub struct SqlToolState {
    run: MigrationRun,
    executor: Arc<dyn SqlExecutor>,
    summary_sql: String,
    command_timeout: Duration,
}

#[async_trait]
impl ToolState for SqlToolState {
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
        let rows = bounded(
            self.command_timeout,
            self.executor.query(&self.summary_sql, &[]),
        )
        .await?;

        let mut batches = Vec::with_capacity(rows.len());
        for row in &rows {
            batches.push(BatchInfo {
                number: row.get_i64(0)? as u32,
                state: decode_batch_state(row.get_i64(1)?)?,
                number_of_timeouts: row.get_i64(2)? as usize,
                timeout_ids: Vec::new(),
            });
        }
        Ok(select_next_batch(batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::base::row::SqlValue;

    /// Executor whose calls never return.
    struct StalledExecutor;

    #[async_trait]
    impl SqlExecutor for StalledExecutor {
        async fn execute(&self, _sql: &str, _params: &[SqlParam]) -> Result<u64, ConnectorError> {
            std::future::pending().await
        }

        async fn query(
            &self,
            _sql: &str,
            _params: &[SqlParam],
        ) -> Result<Vec<SqlRow>, ConnectorError> {
            std::future::pending().await
        }

        async fn execute_in_transaction(
            &self,
            _statements: &[SqlStatement],
        ) -> Result<Vec<u64>, ConnectorError> {
            std::future::pending().await
        }
    }

    fn summary_row(owner: &str, count: i64, at: DateTime<Utc>) -> SqlRow {
        SqlRow::new(vec![
            SqlValue::Text(owner.into()),
            SqlValue::Text("Handler".into()),
            SqlValue::Int(count),
            SqlValue::Time(at),
            SqlValue::Time(at),
        ])
    }

    #[test]
    fn listing_drops_migrated_owners() {
        let now = Utc::now();
        let hidden = OwnerMarker::InProgress {
            token: RunToken::generate(),
            endpoint: "Sales".into(),
        };
        let rows = vec![
            summary_row(&format!("{MIGRATED_PREFIX}Billing"), 4, now),
            summary_row("Sales", 2, now),
            summary_row(&hidden.to_string(), 3, now),
        ];

        let endpoints = summarize_endpoints(&rows).unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].endpoint_name, "Sales");
        assert_eq!(endpoints[0].nr_of_timeouts, 5);
    }

    #[tokio::test]
    async fn next_batch_lookup_is_bounded_by_the_command_timeout() {
        let limit = Duration::from_millis(20);
        let state = SqlToolState {
            run: MigrationRun::start("Sales", Utc::now(), &RunParameters::new()),
            executor: Arc::new(StalledExecutor),
            summary_sql: "SELECT 1".into(),
            command_timeout: limit,
        };

        let err = state.try_get_next_batch().await.err().unwrap();
        assert!(matches!(err, SourceError::Timeout(after) if after == limit));
        assert!(err.is_transient());
    }

    #[test]
    fn hidden_owner_reads_back_as_its_endpoint() {
        let token = RunToken::generate();
        let owner = OwnerMarker::InProgress {
            token,
            endpoint: "Sales".into(),
        };
        let row = SqlRow::new(vec![
            SqlValue::Text("t-1".into()),
            SqlValue::Text("Sales.Handler".into()),
            SqlValue::Text(String::new()),
            SqlValue::Time(Utc::now()),
            SqlValue::Text(r#"{"NServiceBus.MessageId":"t-1"}"#.into()),
            SqlValue::Bytes(b"{}".to_vec()),
            SqlValue::Text(owner.to_string()),
        ]);

        let timeout = timeout_from_row(&row).unwrap();
        assert_eq!(timeout.owning_timeout_manager, "Sales");
        assert!(!timeout.has_saga());
        assert_eq!(timeout.headers.len(), 1);
    }

    #[test]
    fn run_rows_round_trip_through_codes() {
        let run = MigrationRun::start("Sales", Utc::now(), &RunParameters::new());
        let row = SqlRow::new(vec![
            SqlValue::Text(run.token.to_string()),
            SqlValue::Text(run.endpoint_name.clone()),
            SqlValue::Int(run.status.code()),
            SqlValue::Time(run.cutoff),
            SqlValue::Text("{}".into()),
            SqlValue::Int(0),
            SqlValue::Time(run.started_at),
            SqlValue::Null,
        ]);

        assert_eq!(SqlTimeoutsSource::run_from_row(&row).unwrap(), run);
    }

    #[test]
    fn malformed_run_token_is_a_serialization_error() {
        let row = SqlRow::new(vec![SqlValue::Text("not-a-token".into())]);
        assert!(matches!(
            SqlTimeoutsSource::run_from_row(&row),
            Err(SourceError::Serialization(_))
        ));
    }
}
