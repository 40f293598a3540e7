use crate::{
    error::ConnectorError,
    message::DelayedMessage,
    sql::base::{
        dialect::TimeoutDialect,
        executor::{SqlExecutor, SqlStatement},
        query::generator::QueryGenerator,
        row::{SqlParam, SqlRow},
    },
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use engine_core::{
    connectors::target::{EndpointTargetBatchMigrator, TimeoutsTarget},
    error::TargetError,
    partition::WriteChunker,
    settings::MigrationSettings,
};
use futures_util::{StreamExt, TryStreamExt, stream};
use model::{
    execution::check::MigrationCheckResult,
    records::{endpoint::EndpointInfo, timeout::TimeoutData},
};
use std::{future::Future, sync::Arc};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SqlTargetOptions {
    /// Appended to an endpoint name to form its delayed-messages table.
    pub delayed_table_suffix: String,
    /// Appended to an endpoint name to form its staging table.
    pub staging_table_suffix: String,
    pub promotions_table: String,
    pub max_delay: Duration,
}

impl Default for SqlTargetOptions {
    fn default() -> Self {
        Self {
            delayed_table_suffix: ".Delayed".into(),
            staging_table_suffix: "_TimeoutsMigration_Staging".into(),
            promotions_table: "TimeoutsMigration_Promotions".into(),
            max_delay: Duration::days(365 * 8),
        }
    }
}

impl SqlTargetOptions {
    pub fn delayed_table(&self, endpoint_name: &str) -> String {
        format!("{endpoint_name}{}", self.delayed_table_suffix)
    }

    pub fn staging_table(&self, endpoint_name: &str) -> String {
        format!("{endpoint_name}{}", self.staging_table_suffix)
    }
}

/// Native delayed delivery of a SQL transport: one delayed-messages table per
/// endpoint, one table per destination queue.
#[derive(Clone)]
pub struct SqlTimeoutsTarget {
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn TimeoutDialect>,
    options: SqlTargetOptions,
    settings: MigrationSettings,
}

impl SqlTimeoutsTarget {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        dialect: Arc<dyn TimeoutDialect>,
        options: SqlTargetOptions,
        settings: MigrationSettings,
    ) -> Self {
        SqlTimeoutsTarget {
            executor,
            dialect,
            options,
            settings,
        }
    }

    fn generator(&self) -> QueryGenerator<'_> {
        QueryGenerator::new(self.dialect.as_ref())
    }

    /// Creates the delayed-messages table of `endpoint_name`.
    pub async fn create_endpoint(&self, endpoint_name: &str) -> Result<(), ConnectorError> {
        let sql = self
            .generator()
            .create_message_table(&self.options.delayed_table(endpoint_name));
        self.executor.batch_execute(&[sql]).await
    }

    /// Creates a destination queue table.
    pub async fn declare_queue(&self, name: &str) -> Result<(), ConnectorError> {
        let sql = self.generator().create_message_table(name);
        self.executor.batch_execute(&[sql]).await
    }

    /// Delayed messages of `endpoint_name` in delivery order.
    pub async fn delayed_messages(
        &self,
        endpoint_name: &str,
    ) -> Result<Vec<DelayedMessage>, ConnectorError> {
        let sql = self
            .generator()
            .select_messages(&self.options.delayed_table(endpoint_name));
        let rows = self.executor.query(&sql, &[]).await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn table_exists(&self, table: &str) -> Result<bool, ConnectorError> {
        let rows = self
            .executor
            .query(&self.generator().table_exists(), &[SqlParam::from(table)])
            .await?;
        match rows.first() {
            Some(row) => Ok(row.get_i64(0)? > 0),
            None => Ok(false),
        }
    }

    async fn check(
        &self,
        endpoint: &EndpointInfo,
        result: &mut MigrationCheckResult,
    ) -> Result<(), ConnectorError> {
        let delayed = self.options.delayed_table(&endpoint.endpoint_name);
        if !self.table_exists(&delayed).await? {
            result.add_problem(format!(
                "Delayed delivery table '{delayed}' does not exist, the endpoint has not been started on the new transport"
            ));
        }

        for destination in &endpoint.destinations {
            if !self.table_exists(destination).await? {
                result.add_problem(format!("Destination queue '{destination}' does not exist"));
            }
        }

        let delay = endpoint.longest_timeout - Utc::now();
        if delay > self.options.max_delay {
            result.add_problem(format!(
                "Longest timeout is due at {}, beyond the maximum supported delay of {} days",
                endpoint.longest_timeout,
                self.options.max_delay.num_days()
            ));
        }
        Ok(())
    }
}

fn message_from_row(row: &SqlRow) -> Result<DelayedMessage, ConnectorError> {
    Ok(DelayedMessage {
        message_id: row.get_text(0)?,
        destination: row.get_text(1)?,
        headers: serde_json::from_str(&row.get_text(2)?)?,
        body: row.get_bytes(3)?,
        deliver_at: row.get_time(4)?,
    })
}

fn message_params(message: &DelayedMessage) -> Result<Vec<SqlParam>, ConnectorError> {
    Ok(vec![
        SqlParam::from(message.message_id.as_str()),
        SqlParam::from(message.destination.as_str()),
        SqlParam::Text(serde_json::to_string(&message.headers)?),
        SqlParam::Bytes(message.body.clone()),
        SqlParam::Time(message.deliver_at),
    ])
}

/// Bounds a storage call by `limit`.
async fn timed<T, F>(limit: std::time::Duration, fut: F) -> Result<T, TargetError>
where
    F: Future<Output = Result<T, ConnectorError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TargetError::Timeout(limit)),
    }
}

#[async_trait]
impl TimeoutsTarget for SqlTimeoutsTarget {
    async fn able_to_migrate(&self, endpoint: &EndpointInfo) -> MigrationCheckResult {
        let mut result = MigrationCheckResult::ok();
        if let Err(err) = self.check(endpoint, &mut result).await {
            result.add_problem(format!("Unable to inspect the target: {err}"));
        }
        result
    }

    async fn prepare_target_endpoint_batch_migrator(
        &self,
        endpoint_name: &str,
    ) -> Result<Box<dyn EndpointTargetBatchMigrator>, TargetError> {
        let staging = self.options.staging_table(endpoint_name);
        let generator = self.generator();
        timed(
            self.settings.command_timeout(),
            self.executor.batch_execute(&[
                generator.create_message_table(&staging),
                generator.create_promotions_table(&self.options.promotions_table),
            ]),
        )
        .await?;

        Ok(Box::new(SqlBatchMigrator {
            endpoint_name: endpoint_name.to_string(),
            executor: self.executor.clone(),
            dialect: self.dialect.clone(),
            staging,
            delayed: self.options.delayed_table(endpoint_name),
            promotions: self.options.promotions_table.clone(),
            chunker: self.settings.write_chunker(),
            max_concurrency: self.settings.max_concurrency(),
            command_timeout: self.settings.command_timeout(),
        }))
    }

    async fn abort(&self, endpoint_name: &str) -> Result<(), TargetError> {
        let generator = self.generator();
        let limit = self.settings.command_timeout();
        timed(
            limit,
            self.executor.batch_execute(&[
                generator.drop_table(&self.options.staging_table(endpoint_name)),
                generator.create_promotions_table(&self.options.promotions_table),
            ]),
        )
        .await?;
        timed(
            limit,
            self.executor.execute(
                &generator.delete_promotions(&self.options.promotions_table),
                &[SqlParam::from(endpoint_name)],
            ),
        )
        .await?;

        info!(endpoint = endpoint_name, "Dropped staging table");
        Ok(())
    }

    async fn complete(&self, endpoint_name: &str) -> Result<(), TargetError> {
        let staging = self.options.staging_table(endpoint_name);
        let limit = self.settings.command_timeout();

        if timed(limit, self.table_exists(&staging)).await? {
            let rows = timed(
                limit,
                self.executor
                    .query(&self.generator().count_rows(&staging), &[]),
            )
            .await?;
            let count = match rows.first() {
                Some(row) => row.get_i64(0).map_err(TargetError::from)? as usize,
                None => 0,
            };
            if count > 0 {
                return Err(TargetError::StagingNotEmpty {
                    endpoint: endpoint_name.to_string(),
                    count,
                });
            }
        }

        self.abort(endpoint_name).await
    }
}

/// Stages one endpoint's batches in a staging table and promotes them into
/// its delayed-messages table.
pub struct SqlBatchMigrator {
    endpoint_name: String,
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn TimeoutDialect>,
    staging: String,
    delayed: String,
    promotions: String,
    chunker: WriteChunker,
    max_concurrency: usize,
    command_timeout: std::time::Duration,
}

impl SqlBatchMigrator {
    fn generator(&self) -> QueryGenerator<'_> {
        QueryGenerator::new(self.dialect.as_ref())
    }

    fn batch_key(&self, batch_number: u32) -> Vec<SqlParam> {
        vec![
            SqlParam::from(self.endpoint_name.as_str()),
            SqlParam::from(batch_number),
        ]
    }

    async fn staged_count(&self) -> Result<usize, TargetError> {
        let sql = self.generator().count_rows(&self.staging);
        let rows = timed(self.command_timeout, self.executor.query(&sql, &[])).await?;
        match rows.first() {
            Some(row) => Ok(row.get_i64(0)? as usize),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl EndpointTargetBatchMigrator for SqlBatchMigrator {
    async fn stage_batch(
        &self,
        timeouts: &[TimeoutData],
        batch_number: u32,
    ) -> Result<usize, TargetError> {
        let generator = self.generator();
        let purge = [
            SqlStatement::new(
                generator.delete_promotion(&self.promotions),
                self.batch_key(batch_number),
            ),
            SqlStatement::new(generator.delete_all(&self.staging), Vec::new()),
        ];
        timed(
            self.command_timeout,
            self.executor.execute_in_transaction(&purge),
        )
        .await?;

        let mut inserts = Vec::new();
        for chunk in self.chunker.chunks(timeouts) {
            let mut params = Vec::with_capacity(chunk.len() * 5);
            for timeout in chunk {
                params.extend(message_params(&DelayedMessage::from(timeout))?);
            }
            inserts.push(SqlStatement::new(
                generator.insert_messages(&self.staging, chunk.len()),
                params,
            ));
        }

        stream::iter(inserts)
            .map(|statement| {
                let executor = self.executor.clone();
                let limit = self.command_timeout;
                async move { timed(limit, executor.execute(&statement.sql, &statement.params)).await }
            })
            .buffer_unordered(self.max_concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;

        let staged = self.staged_count().await?;
        debug!(
            endpoint = %self.endpoint_name,
            batch = batch_number,
            staged,
            "Staged batch"
        );
        Ok(staged)
    }

    async fn complete_batch(&self, batch_number: u32) -> Result<usize, TargetError> {
        let generator = self.generator();

        if self.staged_count().await? == 0 {
            let rows = timed(
                self.command_timeout,
                self.executor.query(
                    &generator.promoted_count(&self.promotions),
                    &self.batch_key(batch_number),
                ),
            )
            .await?;
            return match rows.first() {
                Some(row) => Ok(row.get_i64(0)? as usize),
                None => Ok(0),
            };
        }

        // The promotion record is written from the staged rows before they move,
        // so a repeated call after a commit reports the same count.
        let statements = [
            SqlStatement::new(
                generator.record_promotion(&self.promotions, &self.staging),
                self.batch_key(batch_number),
            ),
            SqlStatement::new(generator.promote(&self.delayed, &self.staging), Vec::new()),
            SqlStatement::new(generator.delete_all(&self.staging), Vec::new()),
        ];
        let affected = timed(
            self.command_timeout,
            self.executor.execute_in_transaction(&statements),
        )
        .await?;
        let promoted = affected.get(1).copied().unwrap_or_default() as usize;

        debug!(
            endpoint = %self.endpoint_name,
            batch = batch_number,
            promoted,
            "Promoted batch to delayed delivery"
        );
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::base::row::SqlValue;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[test]
    fn table_names_derive_from_the_endpoint() {
        let options = SqlTargetOptions::default();
        assert_eq!(options.delayed_table("Sales"), "Sales.Delayed");
        assert_eq!(
            options.staging_table("Sales"),
            "Sales_TimeoutsMigration_Staging"
        );
    }

    #[test]
    fn message_rows_follow_insert_order() {
        let message = DelayedMessage {
            message_id: "t-1".into(),
            destination: "Sales.Handler".into(),
            deliver_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            headers: BTreeMap::from([("SagaId".into(), "abc".into())]),
            body: b"body".to_vec(),
        };

        let params = message_params(&message).unwrap();
        let values = params
            .into_iter()
            .map(|p| match p {
                SqlParam::Text(s) => SqlValue::Text(s),
                SqlParam::Bytes(b) => SqlValue::Bytes(b),
                SqlParam::Time(t) => SqlValue::Time(t),
                other => panic!("unexpected parameter {other:?}"),
            })
            .collect();

        assert_eq!(message_from_row(&SqlRow::new(values)).unwrap(), message);
    }
}
