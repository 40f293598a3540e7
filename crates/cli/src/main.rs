use crate::{
    commands::{Commands, ConnectionArgs},
    env::{EnvManager, SOURCE_VAR, TARGET_VAR},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use connectors::adapter::BackendKind;
use engine_core::{
    connectors::{source::TimeoutsSource, target::TimeoutsTarget},
    settings::MigrationSettings,
};
use engine_runtime::{
    error::MigrationError,
    execution::{report::EndpointFilter, runner::MigrationRunner},
};
use model::{events::migration::MigrationEvent, execution::run::RunParameters};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "timeout-migrate",
    version = "0.1.0",
    about = "Moves scheduled timeouts from a legacy store into a native delayed-delivery store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match execute(cli.command, &shutdown).await {
        Ok(code) => code,
        Err(CliError::Runner(MigrationError::Cancelled)) => {
            warn!("Migration interrupted; run the same command again to resume");
            ExitCode::ShutdownRequested
        }
        Err(err) => {
            error!(%err, "Command failed");
            eprintln!("Error: {err}");
            if let CliError::Runner(err) = &err
                && err.is_resumable()
            {
                eprintln!("The migration was left in progress and can be resumed.");
            }
            ExitCode::GeneralError
        }
    };

    std::process::exit(code.as_i32());
}

async fn execute(command: Commands, shutdown: &ShutdownCoordinator) -> Result<ExitCode, CliError> {
    match command {
        Commands::ListEndpoints { conn, cutoff, json } => {
            let cutoff = parse_cutoff(&cutoff)?;
            let settings = MigrationSettings::default();
            let (source_conn, source_kind) = resolve_source(&conn)?;
            let source = source_kind.open_source(&source_conn, &settings).await?;

            let endpoints = source.list_endpoints(cutoff).await?;
            if json {
                output::print_json(&endpoints)?;
            } else {
                output::print_endpoints(&endpoints);
            }
            Ok(ExitCode::Success)
        }
        Commands::Preview {
            conn,
            cutoff,
            endpoints,
            json,
        } => {
            let cutoff = parse_cutoff(&cutoff)?;
            let runner = open_runner(&conn, MigrationSettings::default(), shutdown).await?;

            let previews = runner.preview(cutoff, &endpoint_filter(endpoints)).await?;
            if json {
                output::print_json(&previews)?;
            } else {
                output::print_previews(&previews);
            }

            if previews.iter().all(|p| p.can_migrate()) {
                Ok(ExitCode::Success)
            } else {
                Ok(ExitCode::ProblemsFound)
            }
        }
        Commands::Migrate {
            conn,
            cutoff,
            endpoints,
            batch_size,
            max_concurrency,
            params,
            json,
        } => {
            let cutoff = parse_cutoff(&cutoff)?;
            let run_parameters = parse_parameters(&params)?;

            let mut settings = MigrationSettings::default();
            if let Some(size) = batch_size {
                settings.set_batch_size(size);
            }
            if let Some(limit) = max_concurrency {
                settings.set_max_concurrency(limit);
            }

            let runner = open_runner(&conn, settings, shutdown).await?;
            let (subscription, events) = runner.events().subscribe::<MigrationEvent>(256).await;
            let progress = output::spawn_progress(events);

            let result = runner
                .run(cutoff, &endpoint_filter(endpoints), &run_parameters)
                .await;

            runner.events().unsubscribe(subscription).await;
            if let Err(err) = progress.await {
                warn!(%err, "Progress printer stopped unexpectedly");
            }

            let report = result?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_report(&report);
            }

            if report.is_clean() {
                Ok(ExitCode::Success)
            } else {
                Ok(ExitCode::ProblemsFound)
            }
        }
        Commands::Abort { conn } => {
            let runner = open_runner(&conn, MigrationSettings::default(), shutdown).await?;
            match runner.abort().await? {
                Some(endpoint) => println!("Aborted the migration of endpoint '{endpoint}'."),
                None => println!("No migration in progress."),
            }
            Ok(ExitCode::Success)
        }
    }
}

fn environment(conn: &ConnectionArgs) -> Result<EnvManager, CliError> {
    let mut env = EnvManager::from_process();
    if let Some(path) = &conn.env_file {
        env.load_from_file(path)?;
    }
    Ok(env)
}

fn backend(explicit: Option<&str>, conn_str: &str) -> Result<BackendKind, CliError> {
    match explicit {
        Some(kind) => Ok(kind.parse()?),
        None => Ok(BackendKind::detect(conn_str)),
    }
}

fn resolve_source(conn: &ConnectionArgs) -> Result<(String, BackendKind), CliError> {
    let env = environment(conn)?;
    let source = env.connection(conn.source.clone(), "source", SOURCE_VAR)?;
    let kind = backend(conn.source_kind.as_deref(), &source)?;
    Ok((source, kind))
}

async fn open_runner(
    conn: &ConnectionArgs,
    settings: MigrationSettings,
    shutdown: &ShutdownCoordinator,
) -> Result<MigrationRunner, CliError> {
    let env = environment(conn)?;
    let source_conn = env.connection(conn.source.clone(), "source", SOURCE_VAR)?;
    let target_conn = env.connection(conn.target.clone(), "target", TARGET_VAR)?;
    let source_kind = backend(conn.source_kind.as_deref(), &source_conn)?;
    let target_kind = backend(conn.target_kind.as_deref(), &target_conn)?;

    info!(source = %source_kind, target = %target_kind, "Opening stores");
    let source: Arc<dyn TimeoutsSource> = source_kind.open_source(&source_conn, &settings).await?;
    let target: Arc<dyn TimeoutsTarget> = target_kind.open_target(&target_conn, &settings).await?;

    Ok(MigrationRunner::new(source, target, settings).with_cancellation(shutdown.cancel_token()))
}

fn endpoint_filter(endpoints: Vec<String>) -> EndpointFilter {
    if endpoints.is_empty() {
        EndpointFilter::All
    } else {
        EndpointFilter::only(endpoints)
    }
}

fn parse_cutoff(value: &str) -> Result<DateTime<Utc>, CliError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| CliError::InvalidCutoff(value.to_string()))
}

fn parse_parameters(params: &[String]) -> Result<RunParameters, CliError> {
    params
        .iter()
        .map(|param| match param.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(CliError::InvalidParameter(param.clone())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_accepts_timestamps_and_dates() {
        assert_eq!(
            parse_cutoff("2026-03-01T12:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap()
        );
        assert_eq!(
            parse_cutoff("2026-03-01").unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(matches!(
            parse_cutoff("next tuesday"),
            Err(CliError::InvalidCutoff(_))
        ));
    }

    #[test]
    fn run_parameters_are_key_value_pairs() {
        let params =
            parse_parameters(&["operator=ops".to_string(), "ticket = OPS-12".to_string()]).unwrap();
        assert_eq!(params.get("operator").map(String::as_str), Some("ops"));
        assert_eq!(params.get("ticket").map(String::as_str), Some("OPS-12"));

        assert!(parse_parameters(&["no-separator".to_string()]).is_err());
    }

    #[test]
    fn explicit_backend_overrides_detection() {
        assert_eq!(
            backend(None, "postgres://u:p@localhost/db").unwrap(),
            BackendKind::Postgres
        );
        assert_eq!(
            backend(Some("mysql"), "postgres://u:p@localhost/db").unwrap(),
            BackendKind::MySql
        );
        assert!(backend(Some("oracle"), "x").is_err());
    }

    #[test]
    fn empty_endpoint_list_selects_all() {
        assert_eq!(endpoint_filter(Vec::new()), EndpointFilter::All);
        assert!(endpoint_filter(vec!["Sales".into()]).matches("Sales"));
        assert!(!endpoint_filter(vec!["Sales".into()]).matches("Billing"));
    }
}
