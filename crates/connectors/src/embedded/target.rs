use crate::{
    embedded::codec::{batch_key, decode, encode},
    error::ConnectorError,
    message::DelayedMessage,
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
use sled::{
    Transactional, Tree,
    transaction::{ConflictableTransactionResult, TransactionError},
};
use std::path::Path;
use tracing::{debug, info};

const QUEUES_TREE: &str = "queues";
const DELAYED_TREE: &str = "delayed";
const META_TREE: &str = "meta";
const VERSION_KEY: &[u8] = b"delay_infrastructure_version";

/// Version of the delayed-delivery layout this target writes.
pub const DELAY_INFRASTRUCTURE_VERSION: u32 = 2;

/// Longest delay the delivery infrastructure can represent (2^28 - 1 seconds).
pub const MAX_DELAY_SECONDS: i64 = 268_435_455;

#[derive(Debug, Clone)]
pub struct SledTargetOptions {
    pub max_delay: Duration,
}

impl Default for SledTargetOptions {
    fn default() -> Self {
        Self {
            max_delay: Duration::seconds(MAX_DELAY_SECONDS),
        }
    }
}

fn staging_tree_name(endpoint: &str) -> String {
    format!("staging/{endpoint}")
}

fn promoted_tree_name(endpoint: &str) -> String {
    format!("promoted/{endpoint}")
}

/// Native delayed-delivery store kept in an embedded `sled` database.
#[derive(Clone)]
pub struct SledTimeoutsTarget {
    db: sled::Db,
    queues: Tree,
    delayed: Tree,
    meta: Tree,
    options: SledTargetOptions,
    chunker: WriteChunker,
    max_concurrency: usize,
}

impl SledTimeoutsTarget {
    pub fn open(
        path: impl AsRef<Path>,
        options: SledTargetOptions,
        settings: &MigrationSettings,
    ) -> Result<Self, ConnectorError> {
        Self::from_db(sled::open(path)?, options, settings)
    }

    pub fn from_db(
        db: sled::Db,
        options: SledTargetOptions,
        settings: &MigrationSettings,
    ) -> Result<Self, ConnectorError> {
        let meta = db.open_tree(META_TREE)?;
        if meta.get(VERSION_KEY)?.is_none() {
            meta.insert(VERSION_KEY, &DELAY_INFRASTRUCTURE_VERSION.to_be_bytes()[..])?;
        }

        Ok(SledTimeoutsTarget {
            queues: db.open_tree(QUEUES_TREE)?,
            delayed: db.open_tree(DELAYED_TREE)?,
            meta,
            db,
            options,
            chunker: settings.write_chunker(),
            max_concurrency: settings.max_concurrency(),
        })
    }

    /// Declares a destination queue so timeouts may be delivered to it.
    pub fn declare_queue(&self, name: &str) -> Result<(), ConnectorError> {
        self.queues.insert(name.as_bytes(), Vec::<u8>::new())?;
        Ok(())
    }

    /// Overwrites the recorded delay infrastructure version.
    pub fn set_infrastructure_version(&self, version: u32) -> Result<(), ConnectorError> {
        self.meta.insert(VERSION_KEY, &version.to_be_bytes()[..])?;
        Ok(())
    }

    /// Delayed messages in delivery order.
    pub fn delayed_messages(&self) -> Result<Vec<DelayedMessage>, ConnectorError> {
        self.delayed
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    pub fn staged_count(&self, endpoint_name: &str) -> Result<usize, ConnectorError> {
        Ok(self.db.open_tree(staging_tree_name(endpoint_name))?.len())
    }

    fn infrastructure_version(&self) -> Result<Option<u32>, ConnectorError> {
        let Some(raw) = self.meta.get(VERSION_KEY)? else {
            return Ok(None);
        };
        let bytes = <[u8; 4]>::try_from(&raw[..]).map_err(|_| ConnectorError::UnexpectedValue {
            column: 0,
            expected: "u32 version",
        })?;
        Ok(Some(u32::from_be_bytes(bytes)))
    }

    fn check(
        &self,
        endpoint: &EndpointInfo,
        result: &mut MigrationCheckResult,
    ) -> Result<(), ConnectorError> {
        match self.infrastructure_version()? {
            Some(DELAY_INFRASTRUCTURE_VERSION) => {}
            Some(other) => result.add_problem(format!(
                "Delay infrastructure version {other} is not supported, expected {DELAY_INFRASTRUCTURE_VERSION}"
            )),
            None => result.add_problem("Delay infrastructure is not installed"),
        }

        for destination in &endpoint.destinations {
            if !self.queues.contains_key(destination.as_bytes())? {
                result.add_problem(format!("Destination queue '{destination}' does not exist"));
            }
        }

        let delay = endpoint.longest_timeout - Utc::now();
        if delay > self.options.max_delay {
            result.add_problem(format!(
                "Longest timeout is due at {}, beyond the maximum supported delay of {} seconds",
                endpoint.longest_timeout,
                self.options.max_delay.num_seconds()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TimeoutsTarget for SledTimeoutsTarget {
    async fn able_to_migrate(&self, endpoint: &EndpointInfo) -> MigrationCheckResult {
        let mut result = MigrationCheckResult::ok();
        if let Err(err) = self.check(endpoint, &mut result) {
            result.add_problem(format!("Unable to inspect the target: {err}"));
        }
        result
    }

    async fn prepare_target_endpoint_batch_migrator(
        &self,
        endpoint_name: &str,
    ) -> Result<Box<dyn EndpointTargetBatchMigrator>, TargetError> {
        let open = |name: String| self.db.open_tree(name).map_err(ConnectorError::from);
        Ok(Box::new(SledBatchMigrator {
            endpoint_name: endpoint_name.to_string(),
            staging: open(staging_tree_name(endpoint_name))?,
            promoted: open(promoted_tree_name(endpoint_name))?,
            delayed: self.delayed.clone(),
            chunker: self.chunker,
            max_concurrency: self.max_concurrency,
        }))
    }

    async fn abort(&self, endpoint_name: &str) -> Result<(), TargetError> {
        for name in [staging_tree_name(endpoint_name), promoted_tree_name(endpoint_name)] {
            self.db.drop_tree(name).map_err(ConnectorError::from)?;
        }
        info!(endpoint = endpoint_name, "Dropped staging area");
        Ok(())
    }

    async fn complete(&self, endpoint_name: &str) -> Result<(), TargetError> {
        let count = self.staged_count(endpoint_name)?;
        if count > 0 {
            return Err(TargetError::StagingNotEmpty {
                endpoint: endpoint_name.to_string(),
                count,
            });
        }
        self.abort(endpoint_name).await
    }
}

/// Stages one endpoint's batches and promotes them into the delayed tree.
///
/// Promotions are recorded per batch so that completing a batch twice reports
/// the original count instead of zero.
pub struct SledBatchMigrator {
    endpoint_name: String,
    staging: Tree,
    promoted: Tree,
    delayed: Tree,
    chunker: WriteChunker,
    max_concurrency: usize,
}

impl SledBatchMigrator {
    fn staging_writes(chunk: &[TimeoutData]) -> Result<sled::Batch, ConnectorError> {
        let mut writes = sled::Batch::default();
        for timeout in chunk {
            let message = DelayedMessage::from(timeout);
            writes.insert(message.message_id.as_bytes(), encode(&message)?);
        }
        Ok(writes)
    }
}

#[async_trait]
impl EndpointTargetBatchMigrator for SledBatchMigrator {
    async fn stage_batch(
        &self,
        timeouts: &[TimeoutData],
        batch_number: u32,
    ) -> Result<usize, TargetError> {
        self.staging.clear().map_err(ConnectorError::from)?;
        self.promoted
            .remove(batch_key(batch_number))
            .map_err(ConnectorError::from)?;

        let writes = self
            .chunker
            .chunks(timeouts)
            .into_iter()
            .map(Self::staging_writes)
            .collect::<Result<Vec<_>, _>>()?;

        stream::iter(writes)
            .map(|writes| {
                let staging = self.staging.clone();
                async move {
                    let applied = tokio::task::spawn_blocking(move || staging.apply_batch(writes))
                        .await
                        .map_err(|e| TargetError::Storage(e.to_string()))?;
                    applied.map_err(ConnectorError::from)?;
                    Ok::<_, TargetError>(())
                }
            })
            .buffer_unordered(self.max_concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;

        let staged = self.staging.len();
        debug!(
            endpoint = %self.endpoint_name,
            batch = batch_number,
            staged,
            "Staged batch"
        );
        Ok(staged)
    }

    async fn complete_batch(&self, batch_number: u32) -> Result<usize, TargetError> {
        let key = batch_key(batch_number);

        if self.staging.is_empty() {
            let recorded = self.promoted.get(key).map_err(ConnectorError::from)?;
            return match recorded {
                Some(raw) => Ok(decode::<u64>(&raw)? as usize),
                None => Ok(0),
            };
        }

        let mut entries = Vec::with_capacity(self.staging.len());
        for entry in self.staging.iter() {
            let (id, raw) = entry.map_err(ConnectorError::from)?;
            let message: DelayedMessage = decode(&raw)?;
            entries.push((id, message.delivery_key(), raw));
        }
        let count = entries.len();
        let count_bytes = encode(&(count as u64))?;

        let result = (&self.staging, &self.delayed, &self.promoted).transaction(
            |(staging, delayed, promoted)| -> ConflictableTransactionResult<(), TargetError> {
                for (id, delivery_key, raw) in &entries {
                    delayed.insert(delivery_key.as_slice(), raw.clone())?;
                    staging.remove(id.clone())?;
                }
                promoted.insert(&key[..], count_bytes.as_slice())?;
                Ok(())
            },
        );
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(ConnectorError::from(e).into()),
        }

        debug!(
            endpoint = %self.endpoint_name,
            batch = batch_number,
            promoted = count,
            "Promoted batch to delayed delivery"
        );
        Ok(count)
    }
}
