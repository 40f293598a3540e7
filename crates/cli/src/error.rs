use connectors::error::ConnectorError;
use engine_core::error::SourceError;
use engine_runtime::error::MigrationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing {role} connection string; pass --{role} or set {var}")]
    MissingConnection { role: &'static str, var: &'static str },

    #[error("Invalid cutoff '{0}': expected an RFC 3339 timestamp or a YYYY-MM-DD date")]
    InvalidCutoff(String),

    #[error("Invalid run parameter '{0}': expected KEY=VALUE")]
    InvalidParameter(String),

    #[error("Failed to open storage: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Failed to read the legacy store: {0}")]
    Source(#[from] SourceError),

    #[error("Migration failed: {0}")]
    Runner(#[from] MigrationError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),
}
