use crate::{
    error::MigrationError,
    execution::report::{
        EndpointFilter, EndpointPreview, EndpointReport, RunReport, SkippedEndpoint,
    },
};
use chrono::{DateTime, Utc};
use engine_core::{
    connectors::{
        source::TimeoutsSource,
        target::{EndpointTargetBatchMigrator, TimeoutsTarget},
    },
    error::{SourceError, TargetError},
    event_bus::bus::EventBus,
    metrics::Metrics,
    retry::RetryDisposition,
    settings::MigrationSettings,
    state::ToolState,
};
use model::{
    events::migration::MigrationEvent,
    execution::{run::RunParameters, status::MigrationStatus},
    records::{
        batch::{BatchInfo, BatchState},
        endpoint::EndpointInfo,
    },
};
use std::{fmt::Display, future::Future, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors an adapter can classify as safe to repeat.
trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        SourceError::is_transient(self)
    }
}

impl Transient for TargetError {
    fn is_transient(&self) -> bool {
        TargetError::is_transient(self)
    }
}

/// Drives migration runs using only the source and target contracts.
///
/// The runner keeps no state of its own: everything needed to resume lives in
/// the source store, so any invocation can pick up where an earlier one stopped.
#[derive(Clone)]
pub struct MigrationRunner {
    source: Arc<dyn TimeoutsSource>,
    target: Arc<dyn TimeoutsTarget>,
    settings: MigrationSettings,
    events: EventBus,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl MigrationRunner {
    pub fn new(
        source: Arc<dyn TimeoutsSource>,
        target: Arc<dyn TimeoutsTarget>,
        settings: MigrationSettings,
    ) -> Self {
        MigrationRunner {
            source,
            target,
            settings,
            events: EventBus::new(),
            metrics: Metrics::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Migrates every endpoint selected by `filter`, or resumes the run already
    /// in progress when it matches the request.
    pub async fn run(
        &self,
        cutoff: DateTime<Utc>,
        filter: &EndpointFilter,
        run_parameters: &RunParameters,
    ) -> Result<RunReport, MigrationError> {
        let mut report = RunReport::default();

        if let Some(state) = self.source.try_load_ongoing_migration().await? {
            let matches = filter.matches(state.endpoint_name())
                && state.cutoff().timestamp_micros() == cutoff.timestamp_micros()
                && state.run_parameters() == run_parameters;
            if !matches {
                return Err(MigrationError::ConflictingRun {
                    endpoint: state.endpoint_name().to_string(),
                    cutoff: state.cutoff(),
                });
            }

            info!(
                endpoint = state.endpoint_name(),
                status = %state.status(),
                "Resuming migration in progress"
            );
            let state = if state.status() == MigrationStatus::Preparing {
                self.prepare(state.cutoff(), state.endpoint_name(), run_parameters)
                    .await?
            } else {
                state
            };
            report.migrated.push(self.drive(state, true).await?);
        } else {
            let endpoints = self.source.list_endpoints(cutoff).await?;
            for endpoint in endpoints
                .into_iter()
                .filter(|e| filter.matches(&e.endpoint_name))
            {
                if self.cancel.is_cancelled() {
                    return Err(MigrationError::Cancelled);
                }

                let check = self.target.able_to_migrate(&endpoint).await;
                if !check.can_migrate() {
                    warn!(
                        endpoint = %endpoint.endpoint_name,
                        problems = ?check.problems,
                        "Endpoint is not ready for migration, skipping"
                    );
                    self.metrics.increment_endpoints_skipped();
                    self.events
                        .publish(MigrationEvent::EndpointSkipped {
                            endpoint: endpoint.endpoint_name.clone(),
                            problems: check.problems.clone(),
                            timestamp: Utc::now(),
                        })
                        .await;
                    report.skipped.push(SkippedEndpoint {
                        endpoint_name: endpoint.endpoint_name,
                        problems: check.problems,
                    });
                    continue;
                }

                let state = self
                    .prepare(cutoff, &endpoint.endpoint_name, run_parameters)
                    .await?;
                report.migrated.push(self.drive(state, false).await?);
            }
        }

        report.metrics = self.metrics.snapshot();
        Ok(report)
    }

    /// Aborts the run in progress on both sides. Returns the endpoint it
    /// belonged to, or `None` when nothing was in progress.
    pub async fn abort(&self) -> Result<Option<String>, MigrationError> {
        let Some(state) = self.source.try_load_ongoing_migration().await? else {
            info!("No migration in progress, nothing to abort");
            return Ok(None);
        };
        let endpoint = state.endpoint_name().to_string();

        // Target first: once the source forgets the run, nothing points at the
        // staging area any more.
        self.target.abort(&endpoint).await?;
        self.source.abort().await?;

        info!(endpoint = %endpoint, "Migration aborted");
        self.events
            .publish(MigrationEvent::RunAborted {
                endpoint: endpoint.clone(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(Some(endpoint))
    }

    pub async fn list_endpoints(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EndpointInfo>, MigrationError> {
        Ok(self.source.list_endpoints(cutoff).await?)
    }

    /// Readiness of every endpoint selected by `filter`, without changing anything.
    pub async fn preview(
        &self,
        cutoff: DateTime<Utc>,
        filter: &EndpointFilter,
    ) -> Result<Vec<EndpointPreview>, MigrationError> {
        let mut previews = Vec::new();
        for endpoint in self.source.list_endpoints(cutoff).await? {
            if !filter.matches(&endpoint.endpoint_name) {
                continue;
            }
            let check = self.target.able_to_migrate(&endpoint).await;
            previews.push(EndpointPreview {
                endpoint,
                problems: check.problems,
            });
        }
        Ok(previews)
    }

    async fn prepare(
        &self,
        cutoff: DateTime<Utc>,
        endpoint_name: &str,
        run_parameters: &RunParameters,
    ) -> Result<Box<dyn ToolState>, MigrationError> {
        info!(endpoint = endpoint_name, %cutoff, "Preparing migration");
        match self
            .source
            .prepare(cutoff, endpoint_name, run_parameters, &self.cancel)
            .await
        {
            Ok(state) => Ok(state),
            Err(SourceError::Cancelled) => Err(MigrationError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves every remaining batch of a prepared run, then completes both sides.
    async fn drive(
        &self,
        state: Box<dyn ToolState>,
        resumed: bool,
    ) -> Result<EndpointReport, MigrationError> {
        let started = Instant::now();
        let endpoint = state.endpoint_name().to_string();
        let number_of_batches = state.number_of_batches();

        self.events
            .publish(MigrationEvent::RunPrepared {
                endpoint: endpoint.clone(),
                number_of_batches,
                resumed,
                timestamp: Utc::now(),
            })
            .await;
        info!(endpoint = %endpoint, batches = number_of_batches, "Migrating batches");

        let migrator = self
            .target
            .prepare_target_endpoint_batch_migrator(&endpoint)
            .await?;

        let mut timeouts_migrated = 0;
        loop {
            if self.cancel.is_cancelled() {
                warn!(endpoint = %endpoint, "Cancellation requested, stopping before the next batch");
                return Err(MigrationError::Cancelled);
            }

            let next = self.retrying(|| state.try_get_next_batch()).await?;
            let Some(batch) = next else {
                break;
            };

            timeouts_migrated += self
                .migrate_batch(&endpoint, migrator.as_ref(), &batch, number_of_batches)
                .await?;
        }

        self.source.complete().await?;
        self.target.complete(&endpoint).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics.increment_endpoints_migrated();
        self.events
            .publish(MigrationEvent::RunCompleted {
                endpoint: endpoint.clone(),
                number_of_batches,
                duration_ms,
                timestamp: Utc::now(),
            })
            .await;
        info!(
            endpoint = %endpoint,
            batches = number_of_batches,
            timeouts = timeouts_migrated,
            duration_ms,
            "Migration completed"
        );

        Ok(EndpointReport {
            endpoint_name: endpoint,
            number_of_batches,
            timeouts_migrated,
            resumed,
            duration_ms,
        })
    }

    async fn migrate_batch(
        &self,
        endpoint: &str,
        migrator: &dyn EndpointTargetBatchMigrator,
        batch: &BatchInfo,
        number_of_batches: u32,
    ) -> Result<usize, MigrationError> {
        let number = batch.number;
        let expected = batch.number_of_timeouts;
        let source = self.source.as_ref();

        if batch.state == BatchState::Pending {
            let timeouts = self.retrying(|| source.read_batch(number)).await?;
            let timeouts = timeouts.as_slice();
            let staged = self
                .retrying(|| migrator.stage_batch(timeouts, number))
                .await?;
            if staged != expected {
                return Err(MigrationError::BatchCountMismatch {
                    endpoint: endpoint.to_string(),
                    batch_number: number,
                    step: "staged",
                    expected,
                    actual: staged,
                });
            }
            self.retrying(|| source.mark_batch_as_staged(number)).await?;

            self.metrics.increment_staged(staged as u64);
            self.events
                .publish(MigrationEvent::BatchStaged {
                    endpoint: endpoint.to_string(),
                    batch_number: number,
                    timeouts: staged,
                    timestamp: Utc::now(),
                })
                .await;
        }

        // A failed promotion is surfaced, not repeated: the caller resumes the run.
        let completed = migrator.complete_batch(number).await?;
        if completed != expected {
            return Err(MigrationError::BatchCountMismatch {
                endpoint: endpoint.to_string(),
                batch_number: number,
                step: "promoted",
                expected,
                actual: completed,
            });
        }
        self.retrying(|| source.mark_batch_as_completed(number))
            .await?;

        self.metrics.record_batch_completed(completed as u64);
        self.events
            .publish(MigrationEvent::BatchCompleted {
                endpoint: endpoint.to_string(),
                batch_number: number,
                number_of_batches,
                timeouts: completed,
                timestamp: Utc::now(),
            })
            .await;
        info!(
            endpoint,
            batch = number,
            of = number_of_batches,
            timeouts = completed,
            "Batch migrated"
        );
        Ok(completed)
    }

    /// Repeats an idempotent adapter call while it fails transiently.
    async fn retrying<F, Fut, T, E>(&self, op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
        MigrationError: From<E>,
    {
        self.settings
            .retry()
            .run_observed(
                op,
                |e: &E| {
                    if e.is_transient() {
                        RetryDisposition::Retry
                    } else {
                        RetryDisposition::Stop
                    }
                },
                |_| self.metrics.increment_retries(),
            )
            .await
            .map_err(|e| MigrationError::from(e.into_inner()))
    }
}
