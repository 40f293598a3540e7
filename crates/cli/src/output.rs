use crate::error::CliError;
use engine_runtime::execution::report::{EndpointPreview, RunReport};
use model::{events::migration::MigrationEvent, records::endpoint::EndpointInfo};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_endpoints(endpoints: &[EndpointInfo]) {
    if endpoints.is_empty() {
        println!("No endpoints own timeouts at or after the cutoff.");
        return;
    }
    println!(
        "{:<32} {:>10} {:<26} {:<26}",
        "Endpoint", "Timeouts", "Shortest", "Longest"
    );
    for endpoint in endpoints {
        println!(
            "{:<32} {:>10} {:<26} {:<26}",
            endpoint.endpoint_name,
            endpoint.nr_of_timeouts,
            endpoint.shortest_timeout.to_rfc3339(),
            endpoint.longest_timeout.to_rfc3339()
        );
    }
}

pub fn print_previews(previews: &[EndpointPreview]) {
    for preview in previews {
        let name = &preview.endpoint.endpoint_name;
        if preview.can_migrate() {
            println!("{name}: ready ({} timeouts)", preview.endpoint.nr_of_timeouts);
        } else {
            println!("{name}: NOT ready");
            print_problems(&preview.problems);
        }
    }
}

pub fn print_report(report: &RunReport) {
    for endpoint in &report.migrated {
        println!(
            "{}: migrated {} timeouts in {} batches ({} ms){}",
            endpoint.endpoint_name,
            endpoint.timeouts_migrated,
            endpoint.number_of_batches,
            endpoint.duration_ms,
            if endpoint.resumed { ", resumed" } else { "" }
        );
    }
    for skipped in &report.skipped {
        println!("{}: skipped", skipped.endpoint_name);
        print_problems(&skipped.problems);
    }
    println!(
        "Batches completed: {}, retries: {}",
        report.metrics.batches_completed, report.metrics.retry_count
    );
}

fn print_problems(problems: &[String]) {
    for problem in problems {
        println!("  - {problem}");
    }
}

/// Prints progress lines until the event channel closes.
pub fn spawn_progress(mut events: mpsc::Receiver<Arc<MigrationEvent>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = progress_line(&event) {
                eprintln!("{line}");
            }
        }
    })
}

fn progress_line(event: &MigrationEvent) -> Option<String> {
    match event {
        MigrationEvent::RunPrepared {
            endpoint,
            number_of_batches,
            resumed,
            ..
        } => Some(format!(
            "[{endpoint}] {} migration of {number_of_batches} batches",
            if *resumed { "Resuming" } else { "Starting" }
        )),
        MigrationEvent::BatchCompleted {
            endpoint,
            batch_number,
            number_of_batches,
            timeouts,
            ..
        } => Some(format!(
            "[{endpoint}] batch {batch_number}/{number_of_batches}: {timeouts} timeouts"
        )),
        MigrationEvent::EndpointSkipped { endpoint, .. } => {
            Some(format!("[{endpoint}] skipped, target is not ready"))
        }
        MigrationEvent::RunAborted { endpoint, .. } => Some(format!("[{endpoint}] aborted")),
        MigrationEvent::BatchStaged { .. } | MigrationEvent::RunCompleted { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn batch_progress_shows_position() {
        let line = progress_line(&MigrationEvent::BatchCompleted {
            endpoint: "Sales".into(),
            batch_number: 2,
            number_of_batches: 4,
            timeouts: 3,
            timestamp: Utc::now(),
        });
        assert_eq!(line.as_deref(), Some("[Sales] batch 2/4: 3 timeouts"));
    }

    #[test]
    fn staging_is_not_reported() {
        let line = progress_line(&MigrationEvent::BatchStaged {
            endpoint: "Sales".into(),
            batch_number: 1,
            timeouts: 3,
            timestamp: Utc::now(),
        });
        assert!(line.is_none());
    }
}
