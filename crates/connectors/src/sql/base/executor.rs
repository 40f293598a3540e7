use crate::{
    error::ConnectorError,
    sql::base::row::{SqlParam, SqlRow},
};
use async_trait::async_trait;

/// A statement together with the parameters bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Minimal driver surface the SQL backends are written against.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, ConnectorError>;

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqlRow>, ConnectorError>;

    /// Runs `statements` in order inside a single transaction and returns the
    /// affected-row count of each. Nothing is committed if any statement fails.
    async fn execute_in_transaction(
        &self,
        statements: &[SqlStatement],
    ) -> Result<Vec<u64>, ConnectorError>;

    /// Runs plain DDL without parameters.
    async fn batch_execute(&self, sql: &[String]) -> Result<(), ConnectorError> {
        for statement in sql {
            self.execute(statement, &[]).await?;
        }
        Ok(())
    }
}
