use crate::{
    error::ConnectorError,
    sql::{
        base::{
            executor::{SqlExecutor, SqlStatement},
            row::{SqlParam, SqlRow, SqlValue},
        },
        postgres::{params::PgParamStore, utils::connect_client},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::{Client, Row, types::Type};
use tracing::debug;

/// [`SqlExecutor`] over a single `tokio-postgres` client.
///
/// Plain statements share the client; transactions take it exclusively.
#[derive(Clone)]
pub struct PgExecutor {
    client: Arc<RwLock<Client>>,
}

impl PgExecutor {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let client = connect_client(url).await?;
        Ok(PgExecutor {
            client: Arc::new(RwLock::new(client)),
        })
    }

    fn convert_row(row: &Row) -> Result<SqlRow, ConnectorError> {
        (0..row.len())
            .map(|idx| Self::convert_value(row, idx))
            .collect::<Result<Vec<_>, _>>()
            .map(SqlRow::new)
    }

    fn convert_value(row: &Row, idx: usize) -> Result<SqlValue, ConnectorError> {
        let ty = row.columns()[idx].type_();

        let value = if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(SqlValue::Time)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(|v| SqlValue::Time(v.and_utc()))
        } else {
            return Err(ConnectorError::UnsupportedColumnType(ty.name().to_string()));
        };

        Ok(value.unwrap_or(SqlValue::Null))
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, ConnectorError> {
        let store = PgParamStore::from_params(params);
        let client = self.client.read().await;
        debug!(sql, "Executing statement");
        Ok(client.execute(sql, &store.as_refs()).await?)
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqlRow>, ConnectorError> {
        let store = PgParamStore::from_params(params);
        let client = self.client.read().await;
        let rows = client.query(sql, &store.as_refs()).await?;
        rows.iter().map(Self::convert_row).collect()
    }

    async fn execute_in_transaction(
        &self,
        statements: &[SqlStatement],
    ) -> Result<Vec<u64>, ConnectorError> {
        let mut client = self.client.write().await;
        let tx = client.transaction().await?;

        let mut affected = Vec::with_capacity(statements.len());
        for statement in statements {
            let store = PgParamStore::from_params(&statement.params);
            affected.push(tx.execute(statement.sql.as_str(), &store.as_refs()).await?);
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn batch_execute(&self, sql: &[String]) -> Result<(), ConnectorError> {
        let client = self.client.read().await;
        client.batch_execute(&sql.join(";\n")).await?;
        Ok(())
    }
}
