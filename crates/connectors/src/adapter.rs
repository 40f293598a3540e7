use crate::{
    embedded::{
        source::SledTimeoutsSource,
        target::{SledTargetOptions, SledTimeoutsTarget},
    },
    error::ConnectorError,
    sql::{
        base::{
            dialect::{MySql, Postgres, TimeoutDialect},
            executor::SqlExecutor,
            source::{SqlSourceOptions, SqlTimeoutsSource},
            target::{SqlTargetOptions, SqlTimeoutsTarget},
        },
        mysql::adapter::MySqlExecutor,
        postgres::adapter::PgExecutor,
    },
};
use engine_core::{
    connectors::{source::TimeoutsSource, target::TimeoutsTarget},
    settings::MigrationSettings,
};
use std::{fmt, str::FromStr, sync::Arc};

/// Storage technology behind a source or target connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sled,
    Postgres,
    MySql,
}

impl FromStr for BackendKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sled" | "embedded" => Ok(BackendKind::Sled),
            "pg" | "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            "mysql" | "mariadb" => Ok(BackendKind::MySql),
            other => Err(ConnectorError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sled => write!(f, "sled"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::MySql => write!(f, "mysql"),
        }
    }
}

impl BackendKind {
    /// Guesses the backend from a connection string's scheme. Anything without a
    /// recognised scheme is taken to be a sled directory.
    pub fn detect(conn_str: &str) -> BackendKind {
        match conn_str.split_once("://") {
            Some((scheme, _)) => scheme.parse().unwrap_or(BackendKind::Sled),
            None => BackendKind::Sled,
        }
    }

    async fn sql_executor(
        &self,
        conn_str: &str,
    ) -> Result<(Arc<dyn SqlExecutor>, Arc<dyn TimeoutDialect>), ConnectorError> {
        let executor: Arc<dyn SqlExecutor>;
        let dialect: Arc<dyn TimeoutDialect>;
        match self {
            BackendKind::Postgres => {
                executor = Arc::new(PgExecutor::connect(conn_str).await?);
                dialect = Arc::new(Postgres);
            }
            BackendKind::MySql => {
                executor = Arc::new(MySqlExecutor::connect(conn_str)?);
                dialect = Arc::new(MySql);
            }
            BackendKind::Sled => {
                return Err(ConnectorError::UnsupportedBackend(
                    "sled is not a SQL backend".into(),
                ));
            }
        }
        Ok((executor, dialect))
    }

    pub async fn open_source(
        &self,
        conn_str: &str,
        settings: &MigrationSettings,
    ) -> Result<Arc<dyn TimeoutsSource>, ConnectorError> {
        match self {
            BackendKind::Sled => Ok(Arc::new(SledTimeoutsSource::open(
                sled_path(conn_str),
                settings.clone(),
            )?)),
            BackendKind::Postgres | BackendKind::MySql => {
                let (executor, dialect) = self.sql_executor(conn_str).await?;
                let source = SqlTimeoutsSource::new(
                    executor,
                    dialect,
                    SqlSourceOptions::default(),
                    settings.clone(),
                )
                .await?;
                Ok(Arc::new(source))
            }
        }
    }

    pub async fn open_target(
        &self,
        conn_str: &str,
        settings: &MigrationSettings,
    ) -> Result<Arc<dyn TimeoutsTarget>, ConnectorError> {
        match self {
            BackendKind::Sled => Ok(Arc::new(SledTimeoutsTarget::open(
                sled_path(conn_str),
                SledTargetOptions::default(),
                settings,
            )?)),
            BackendKind::Postgres | BackendKind::MySql => {
                let (executor, dialect) = self.sql_executor(conn_str).await?;
                Ok(Arc::new(SqlTimeoutsTarget::new(
                    executor,
                    dialect,
                    SqlTargetOptions::default(),
                    settings.clone(),
                )))
            }
        }
    }
}

fn sled_path(conn_str: &str) -> &str {
    conn_str
        .strip_prefix("sled://")
        .or_else(|| conn_str.strip_prefix("embedded://"))
        .unwrap_or(conn_str)
}
