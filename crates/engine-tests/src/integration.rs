#[cfg(test)]
mod tests {
    use crate::utils::{days_from_now, destination, migrate_batches_manually, sled_pair};
    use connectors::embedded::source::TimeoutStatus;
    use engine_core::{
        connectors::{
            source::TimeoutsSource,
            target::{EndpointTargetBatchMigrator, TimeoutsTarget},
        },
        error::SourceError,
        state::ToolState,
    };
    use engine_runtime::execution::report::EndpointFilter;
    use model::{
        events::migration::MigrationEvent,
        execution::{run::RunParameters, status::MigrationStatus},
    };
    use std::collections::BTreeSet;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    // Scenario: 10 timeouts due now+7d..now+16d, cutoff yesterday, batch size 3.
    // Expected Outcome:
    // - 4 batches of 3, 3, 3 and 1 timeouts are migrated.
    // - The legacy store holds no live timeouts and no run afterwards.
    // - The native store delivers all 10 in due order.
    #[traced_test]
    #[tokio::test]
    async fn tc01_migrates_all_timeouts_in_batches() {
        let pair = sled_pair(3);
        pair.seed("Sales", 10, 7);
        pair.declare_destination("Sales");

        let runner = pair.runner();
        let (_subscription, mut events) = runner.events().subscribe::<MigrationEvent>(64).await;

        let report = runner
            .run(days_from_now(-1), &EndpointFilter::All, &RunParameters::new())
            .await
            .unwrap();

        assert_eq!(report.migrated.len(), 1);
        assert_eq!(report.migrated[0].number_of_batches, 4);
        assert_eq!(report.migrated[0].timeouts_migrated, 10);

        let mut sizes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MigrationEvent::BatchCompleted { timeouts, .. } = *event {
                sizes.push(timeouts);
            }
        }
        assert_eq!(sizes, vec![3, 3, 3, 1]);

        assert_eq!(pair.source.timeout_count(), 0);
        assert_eq!(pair.source.migrated_count(), 10);
        assert!(pair.source.try_load_ongoing_migration().await.unwrap().is_none());

        let history = pair.source.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MigrationStatus::Completed);

        let delayed = pair.target.delayed_messages().unwrap();
        assert_eq!(delayed.len(), 10);
        assert!(delayed.windows(2).all(|w| w[0].deliver_at <= w[1].deliver_at));
        assert_eq!(pair.target.staged_count("Sales").unwrap(), 0);
    }

    // Scenario: same 10 timeouts, cutoff now+10d, batch size 1.
    // Expected Outcome: only the 6 timeouts due at or after the cutoff move; 4 stay behind.
    #[traced_test]
    #[tokio::test]
    async fn tc02_cutoff_limits_selection() {
        let pair = sled_pair(1);
        pair.seed("Sales", 10, 7);
        pair.declare_destination("Sales");

        let report = pair
            .runner()
            .run(days_from_now(10), &EndpointFilter::All, &RunParameters::new())
            .await
            .unwrap();

        assert_eq!(report.migrated[0].number_of_batches, 6);
        assert_eq!(pair.source.timeout_count(), 4);
        assert_eq!(pair.target.delayed_messages().unwrap().len(), 6);
        assert_eq!(
            pair.source.status_of("Sales-000").unwrap(),
            Some(TimeoutStatus::Available)
        );
    }

    // Scenario: 2 of 4 batches completed, batch 3 staged, then the run is aborted.
    // Expected Outcome:
    // - Timeouts of the completed batches stay migrated.
    // - Every other timeout is available to the legacy scheduler again.
    // - The staging area is gone and no run remains.
    #[traced_test]
    #[tokio::test]
    async fn tc03_abort_keeps_completed_batches_only() {
        let pair = sled_pair(3);
        pair.seed("Sales", 10, 7);
        pair.declare_destination("Sales");
        let cutoff = days_from_now(-1);

        pair.source
            .prepare(cutoff, "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        migrate_batches_manually(&pair, "Sales", 2).await;

        let migrator = pair
            .target
            .prepare_target_endpoint_batch_migrator("Sales")
            .await
            .unwrap();
        let third = pair.source.read_batch(3).await.unwrap();
        migrator.stage_batch(&third, 3).await.unwrap();

        let aborted = pair.runner().abort().await.unwrap();
        assert_eq!(aborted.as_deref(), Some("Sales"));

        assert_eq!(pair.source.migrated_count(), 6);
        assert_eq!(pair.source.timeout_count(), 4);
        for i in 6..10 {
            assert_eq!(
                pair.source.status_of(&format!("Sales-{i:03}")).unwrap(),
                Some(TimeoutStatus::Available)
            );
        }
        assert_eq!(
            pair.source.status_of("Sales-000").unwrap(),
            Some(TimeoutStatus::Migrated)
        );
        assert_eq!(pair.target.staged_count("Sales").unwrap(), 0);
        assert_eq!(pair.target.delayed_messages().unwrap().len(), 6);
        assert!(!pair.source.check_if_a_migration_is_in_progress().await.unwrap());
    }

    // Scenario: the process stops after staging batch 1, before promoting it.
    // Expected Outcome: a second invocation resumes at the promotion step and
    // every timeout is delivered exactly once.
    #[traced_test]
    #[tokio::test]
    async fn tc04_resume_after_staging_does_not_duplicate() {
        let pair = sled_pair(4);
        pair.seed("Sales", 10, 7);
        pair.declare_destination("Sales");
        let cutoff = days_from_now(-1);
        let params = RunParameters::from([("operator".to_string(), "ops".to_string())]);

        pair.source
            .prepare(cutoff, "Sales", &params, &CancellationToken::new())
            .await
            .unwrap();
        let migrator = pair
            .target
            .prepare_target_endpoint_batch_migrator("Sales")
            .await
            .unwrap();
        let first = pair.source.read_batch(1).await.unwrap();
        migrator.stage_batch(&first, 1).await.unwrap();
        pair.source.mark_batch_as_staged(1).await.unwrap();

        let report = pair
            .runner()
            .run(cutoff, &EndpointFilter::only(["Sales"]), &params)
            .await
            .unwrap();

        assert!(report.migrated[0].resumed);
        assert_eq!(report.migrated[0].timeouts_migrated, 10);

        let delayed = pair.target.delayed_messages().unwrap();
        let ids: BTreeSet<_> = delayed.iter().map(|m| m.message_id.clone()).collect();
        assert_eq!(delayed.len(), 10);
        assert_eq!(ids.len(), 10);
    }

    // Scenario: a run is in progress and a different endpoint is requested.
    // Expected Outcome: the request is refused and the ongoing run is untouched.
    #[traced_test]
    #[tokio::test]
    async fn tc05_conflicting_request_is_refused() {
        let pair = sled_pair(3);
        pair.seed("Sales", 3, 7);
        pair.seed("Billing", 3, 7);
        pair.declare_destination("Sales");
        pair.declare_destination("Billing");
        let cutoff = days_from_now(-1);

        pair.source
            .prepare(cutoff, "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();

        let err = pair
            .runner()
            .run(cutoff, &EndpointFilter::only(["Billing"]), &RunParameters::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("'Sales'"));
        assert!(pair.source.check_if_a_migration_is_in_progress().await.unwrap());
        assert_eq!(
            pair.source.status_of("Billing-000").unwrap(),
            Some(TimeoutStatus::Available)
        );
    }

    // Scenario: the destination queue of an endpoint was never declared.
    // Expected Outcome: the endpoint is skipped with a problem list, nothing is hidden.
    #[traced_test]
    #[tokio::test]
    async fn tc06_endpoint_without_queue_is_skipped() {
        let pair = sled_pair(3);
        pair.seed("Sales", 3, 7);

        let report = pair
            .runner()
            .run(days_from_now(-1), &EndpointFilter::All, &RunParameters::new())
            .await
            .unwrap();

        assert!(report.migrated.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(
            report.skipped[0]
                .problems
                .iter()
                .any(|p| p.contains(&destination("Sales")))
        );
        assert!(!pair.source.check_if_a_migration_is_in_progress().await.unwrap());
        assert_eq!(
            pair.source.status_of("Sales-000").unwrap(),
            Some(TimeoutStatus::Available)
        );
    }

    // Scenario: preparation is cancelled before it finishes.
    // Expected Outcome: the run stays in progress and a later invocation with the
    // same request finishes preparing and migrates everything.
    #[traced_test]
    #[tokio::test]
    async fn tc07_cancelled_preparation_is_resumed() {
        let pair = sled_pair(3);
        pair.seed("Sales", 10, 7);
        pair.declare_destination("Sales");
        let cutoff = days_from_now(-1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pair
            .source
            .prepare(cutoff, "Sales", &RunParameters::new(), &cancel)
            .await;
        assert!(matches!(result, Err(SourceError::Cancelled)));

        let ongoing = pair.source.try_load_ongoing_migration().await.unwrap().unwrap();
        assert_eq!(ongoing.status(), MigrationStatus::Preparing);

        let report = pair
            .runner()
            .run(cutoff, &EndpointFilter::All, &RunParameters::new())
            .await
            .unwrap();

        assert_eq!(report.migrated[0].number_of_batches, 4);
        assert_eq!(pair.target.delayed_messages().unwrap().len(), 10);
    }

    // Scenario: two endpoints; the first invocation selects one of them.
    // Expected Outcome: endpoints are migrated one run at a time, listing tracks progress.
    #[traced_test]
    #[tokio::test]
    async fn tc08_endpoints_migrate_one_run_at_a_time() {
        let pair = sled_pair(2);
        pair.seed("Sales", 3, 7);
        pair.seed("Billing", 2, 7);
        pair.declare_destination("Sales");
        pair.declare_destination("Billing");
        let cutoff = days_from_now(-1);
        let runner = pair.runner();

        runner
            .run(cutoff, &EndpointFilter::only(["Sales"]), &RunParameters::new())
            .await
            .unwrap();

        let listed: Vec<_> = runner
            .list_endpoints(cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.endpoint_name)
            .collect();
        assert_eq!(listed, vec!["Billing".to_string()]);

        let report = runner
            .run(cutoff, &EndpointFilter::All, &RunParameters::new())
            .await
            .unwrap();
        assert_eq!(report.migrated[0].endpoint_name, "Billing");
        assert_eq!(pair.source.history().unwrap().len(), 2);
        assert_eq!(pair.target.delayed_messages().unwrap().len(), 5);
        assert_eq!(report.metrics.endpoints_migrated, 2);
    }

    // Scenario: 10 timeouts prepared into 4 batches, then aborted before any batch moves.
    // Expected Outcome:
    // - All 10 timeouts are listed and available again.
    // - No run remains and the native store received nothing.
    #[traced_test]
    #[tokio::test]
    async fn tc09_abort_before_any_batch_restores_everything() {
        let pair = sled_pair(3);
        pair.seed("Sales", 10, 7);
        pair.declare_destination("Sales");
        let cutoff = days_from_now(-1);

        let state = pair
            .source
            .prepare(cutoff, "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.number_of_batches(), 4);

        let runner = pair.runner();
        assert_eq!(runner.abort().await.unwrap().as_deref(), Some("Sales"));

        assert!(pair.source.try_load_ongoing_migration().await.unwrap().is_none());
        let listed = runner.list_endpoints(cutoff).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].nr_of_timeouts, 10);
        for i in 0..10 {
            assert_eq!(
                pair.source.status_of(&format!("Sales-{i:03}")).unwrap(),
                Some(TimeoutStatus::Available)
            );
        }
        assert_eq!(pair.source.migrated_count(), 0);
        assert!(pair.target.delayed_messages().unwrap().is_empty());
    }

    // Scenario: listing while a run is half done, then after it finishes.
    // Expected Outcome:
    // - Mid-run, hidden timeouts still count for their endpoint; migrated ones do not.
    // - Once everything moved, the endpoint disappears from the listing.
    #[traced_test]
    #[tokio::test]
    async fn tc10_listing_excludes_migrated_timeouts() {
        let pair = sled_pair(2);
        pair.seed("Sales", 4, 7);
        pair.seed("Billing", 1, 7);
        pair.declare_destination("Sales");
        let cutoff = days_from_now(-1);
        let runner = pair.runner();

        pair.source
            .prepare(cutoff, "Sales", &RunParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        migrate_batches_manually(&pair, "Sales", 1).await;

        let listed = runner.list_endpoints(cutoff).await.unwrap();
        let counts: Vec<_> = listed
            .iter()
            .map(|e| (e.endpoint_name.as_str(), e.nr_of_timeouts))
            .collect();
        assert_eq!(counts, vec![("Billing", 1), ("Sales", 2)]);

        runner
            .run(cutoff, &EndpointFilter::only(["Sales"]), &RunParameters::new())
            .await
            .unwrap();

        let listed: Vec<_> = runner
            .list_endpoints(cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.endpoint_name)
            .collect();
        assert_eq!(listed, vec!["Billing".to_string()]);
        assert_eq!(pair.source.migrated_count(), 4);
    }
}
