use crate::{
    error::ConnectorError,
    sql::{
        base::{
            executor::{SqlExecutor, SqlStatement},
            row::{SqlParam, SqlRow, SqlValue},
        },
        mysql::params::MySqlParamStore,
    },
};
use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::{Opts, Pool, Row, TxOpts, Value as MySqlValue, prelude::Queryable};
use tracing::debug;

/// [`SqlExecutor`] over a `mysql_async` connection pool.
#[derive(Clone)]
pub struct MySqlExecutor {
    pool: Pool,
}

impl MySqlExecutor {
    pub fn connect(url: &str) -> Result<Self, ConnectorError> {
        let opts = Opts::from_url(url).map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
        Ok(MySqlExecutor {
            pool: Pool::new(opts),
        })
    }

    pub async fn disconnect(self) -> Result<(), ConnectorError> {
        self.pool.disconnect().await?;
        Ok(())
    }

    fn convert_row(mut row: Row) -> Result<SqlRow, ConnectorError> {
        (0..row.len())
            .map(|idx| {
                let value = row.take::<MySqlValue, _>(idx).unwrap_or(MySqlValue::NULL);
                Self::convert_value(idx, value)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SqlRow::new)
    }

    fn convert_value(column: usize, value: MySqlValue) -> Result<SqlValue, ConnectorError> {
        match value {
            MySqlValue::NULL => Ok(SqlValue::Null),
            MySqlValue::Bytes(b) => Ok(SqlValue::Bytes(b)),
            MySqlValue::Int(i) => Ok(SqlValue::Int(i)),
            MySqlValue::UInt(u) => i64::try_from(u)
                .map(SqlValue::Int)
                .map_err(|_| ConnectorError::UnexpectedValue {
                    column,
                    expected: "signed 64-bit integer",
                }),
            MySqlValue::Date(y, m, d, h, mi, s, us) => {
                NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                    .and_then(|date| date.and_hms_micro_opt(h as u32, mi as u32, s as u32, us))
                    .map(|naive| SqlValue::Time(naive.and_utc()))
                    .ok_or(ConnectorError::UnexpectedValue {
                        column,
                        expected: "valid datetime",
                    })
            }
            other => Err(ConnectorError::UnsupportedColumnType(format!("{other:?}"))),
        }
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, ConnectorError> {
        let store = MySqlParamStore::from_params(params);
        let mut conn = self.pool.get_conn().await?;
        debug!(sql, "Executing statement");
        conn.exec_drop(sql, store.params()).await?;
        Ok(conn.affected_rows())
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqlRow>, ConnectorError> {
        let store = MySqlParamStore::from_params(params);
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn.exec(sql, store.params()).await?;
        rows.into_iter().map(Self::convert_row).collect()
    }

    async fn execute_in_transaction(
        &self,
        statements: &[SqlStatement],
    ) -> Result<Vec<u64>, ConnectorError> {
        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        let mut affected = Vec::with_capacity(statements.len());
        for statement in statements {
            let store = MySqlParamStore::from_params(&statement.params);
            tx.exec_drop(statement.sql.as_str(), store.params()).await?;
            affected.push(tx.affected_rows());
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn batch_execute(&self, sql: &[String]) -> Result<(), ConnectorError> {
        let mut conn = self.pool.get_conn().await?;
        for statement in sql {
            conn.query_drop(statement.as_str()).await?;
        }
        Ok(())
    }
}
