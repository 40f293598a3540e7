use chrono::{DateTime, Duration, Utc};
use connectors::embedded::{
    source::SledTimeoutsSource,
    target::{SledTargetOptions, SledTimeoutsTarget},
};
use engine_core::{
    connectors::{
        source::TimeoutsSource,
        target::{EndpointTargetBatchMigrator, TimeoutsTarget},
    },
    settings::MigrationSettings,
};
use engine_runtime::execution::runner::MigrationRunner;
use model::records::timeout::TimeoutData;
use std::{collections::BTreeMap, sync::Arc};
use tempfile::TempDir;
use uuid::Uuid;

/// A legacy store and a native delayed store, each in its own sled directory.
pub struct SledPair {
    _dir: TempDir,
    pub settings: MigrationSettings,
    pub source: Arc<SledTimeoutsSource>,
    pub target: Arc<SledTimeoutsTarget>,
}

impl SledPair {
    pub fn runner(&self) -> MigrationRunner {
        let source: Arc<dyn TimeoutsSource> = self.source.clone();
        let target: Arc<dyn TimeoutsTarget> = self.target.clone();
        MigrationRunner::new(source, target, self.settings.clone())
    }

    /// Schedules `count` timeouts for `endpoint`, due daily from `first_due_in_days`.
    pub fn seed(&self, endpoint: &str, count: usize, first_due_in_days: i64) {
        for timeout in timeouts(endpoint, count, first_due_in_days) {
            self.source.insert_timeout(&timeout).expect("insert timeout");
        }
    }

    /// Declares the destination queue of every timeout `seed` creates for `endpoint`.
    pub fn declare_destination(&self, endpoint: &str) {
        self.target
            .declare_queue(&destination(endpoint))
            .expect("declare queue");
    }
}

pub fn sled_pair(batch_size: usize) -> SledPair {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut settings = MigrationSettings::default();
    settings.set_batch_size(batch_size);
    settings.set_page_size(4);
    settings.set_write_ceilings(2, 64 * 1024);

    let source =
        SledTimeoutsSource::open(dir.path().join("legacy"), settings.clone()).expect("open source");
    let target = SledTimeoutsTarget::open(
        dir.path().join("native"),
        SledTargetOptions::default(),
        &settings,
    )
    .expect("open target");

    SledPair {
        _dir: dir,
        settings,
        source: Arc::new(source),
        target: Arc::new(target),
    }
}

pub fn destination(endpoint: &str) -> String {
    format!("{endpoint}.Handler")
}

pub fn timeouts(endpoint: &str, count: usize, first_due_in_days: i64) -> Vec<TimeoutData> {
    (0..count)
        .map(|i| TimeoutData {
            id: format!("{endpoint}-{i:03}"),
            destination: destination(endpoint),
            saga_id: Uuid::new_v4(),
            time: Utc::now() + Duration::days(first_due_in_days + i as i64),
            headers: BTreeMap::from([
                ("NServiceBus.MessageId".to_string(), format!("{endpoint}-{i:03}")),
                ("NServiceBus.EnclosedMessageTypes".to_string(), "Sales.OrderTimeout".to_string()),
            ]),
            state: format!(r#"{{"order":{i}}}"#).into_bytes(),
            owning_timeout_manager: endpoint.to_string(),
        })
        .collect()
}

pub fn days_from_now(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

/// Drives batches `1..=last` of `endpoint` by hand, the way the runner does.
pub async fn migrate_batches_manually(pair: &SledPair, endpoint: &str, last: u32) {
    let migrator = pair
        .target
        .prepare_target_endpoint_batch_migrator(endpoint)
        .await
        .expect("prepare migrator");

    for number in 1..=last {
        let timeouts = pair.source.read_batch(number).await.expect("read batch");
        migrator
            .stage_batch(&timeouts, number)
            .await
            .expect("stage batch");
        pair.source
            .mark_batch_as_staged(number)
            .await
            .expect("mark staged");
        migrator.complete_batch(number).await.expect("complete batch");
        pair.source
            .mark_batch_as_completed(number)
            .await
            .expect("mark completed");
    }
}
