use engine_core::error::{SourceError, TargetError};
use thiserror::Error;

/// Errors coming from the storage drivers behind the reference backends.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Embedded store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Binary encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid connection string: {0}")]
    InvalidUrl(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Unsupported column type: {0}")]
    UnsupportedColumnType(String),

    /// A column held a value of an unexpected shape.
    #[error("Column {column}: expected {expected}")]
    UnexpectedValue { column: usize, expected: &'static str },
}

impl ConnectorError {
    fn is_encoding(&self) -> bool {
        matches!(
            self,
            ConnectorError::Codec(_)
                | ConnectorError::Json(_)
                | ConnectorError::UnexpectedValue { .. }
                | ConnectorError::UnsupportedColumnType(_)
        )
    }

    /// SQLSTATE reported by the database server, if any.
    fn sqlstate(&self) -> Option<&str> {
        match self {
            ConnectorError::Postgres(e) => e.code().map(|state| state.code()),
            ConnectorError::MySql(mysql_async::Error::Server(e)) => Some(e.state.as_str()),
            _ => None,
        }
    }

    /// Whether the server refused the statement rather than failing to run it.
    pub fn is_permanent(&self) -> bool {
        self.sqlstate().is_some_and(sqlstate_is_permanent)
    }
}

/// Class 23 (integrity constraint violation) and class 42 (syntax error or
/// access rule violation, which covers missing tables and columns). MySQL
/// reports the same classes, e.g. `23000` for duplicate keys and `42S02` for
/// unknown tables.
fn sqlstate_is_permanent(state: &str) -> bool {
    matches!(state.get(..2), Some("23" | "42"))
}

impl From<ConnectorError> for SourceError {
    fn from(err: ConnectorError) -> Self {
        match err {
            err if err.is_encoding() => SourceError::Serialization(err.to_string()),
            err if err.is_permanent() => SourceError::Rejected(err.to_string()),
            err => SourceError::Storage(err.to_string()),
        }
    }
}

impl From<ConnectorError> for TargetError {
    fn from(err: ConnectorError) -> Self {
        match err {
            err if err.is_encoding() => TargetError::Serialization(err.to_string()),
            err if err.is_permanent() => TargetError::Rejected(err.to_string()),
            err => TargetError::Storage(err.to_string()),
        }
    }
}
