use crate::error::ConnectorError;
use chrono::{DateTime, Utc};

/// A bound statement parameter, independent of the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Time(DateTime<Utc>),
    /// A nullable timestamp; typed so drivers can bind `NULL` to a timestamp column.
    OptTime(Option<DateTime<Utc>>),
    Bytes(Vec<u8>),
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<u32> for SqlParam {
    fn from(value: u32) -> Self {
        SqlParam::Int(value as i64)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(value: DateTime<Utc>) -> Self {
        SqlParam::Time(value)
    }
}

/// A column value read back from either driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
}

/// One result row with positional, type-tolerant accessors.
///
/// MySQL returns most values as raw bytes in the text protocol, so the text
/// and integer getters accept either representation.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, column: usize) -> &SqlValue {
        self.values.get(column).unwrap_or(&SqlValue::Null)
    }

    fn unexpected(column: usize, expected: &'static str) -> ConnectorError {
        ConnectorError::UnexpectedValue { column, expected }
    }

    pub fn get_opt_text(&self, column: usize) -> Result<Option<String>, ConnectorError> {
        match self.value(column) {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            SqlValue::Bytes(b) => String::from_utf8(b.clone())
                .map(Some)
                .map_err(|_| Self::unexpected(column, "utf-8 text")),
            SqlValue::Int(i) => Ok(Some(i.to_string())),
            SqlValue::Time(_) => Err(Self::unexpected(column, "text")),
        }
    }

    pub fn get_text(&self, column: usize) -> Result<String, ConnectorError> {
        self.get_opt_text(column)?
            .ok_or_else(|| Self::unexpected(column, "non-null text"))
    }

    pub fn get_i64(&self, column: usize) -> Result<i64, ConnectorError> {
        match self.value(column) {
            SqlValue::Int(i) => Ok(*i),
            SqlValue::Text(_) | SqlValue::Bytes(_) => self
                .get_text(column)?
                .trim()
                .parse()
                .map_err(|_| Self::unexpected(column, "integer")),
            _ => Err(Self::unexpected(column, "integer")),
        }
    }

    pub fn get_opt_time(&self, column: usize) -> Result<Option<DateTime<Utc>>, ConnectorError> {
        match self.value(column) {
            SqlValue::Null => Ok(None),
            SqlValue::Time(t) => Ok(Some(*t)),
            _ => Err(Self::unexpected(column, "timestamp")),
        }
    }

    pub fn get_time(&self, column: usize) -> Result<DateTime<Utc>, ConnectorError> {
        self.get_opt_time(column)?
            .ok_or_else(|| Self::unexpected(column, "non-null timestamp"))
    }

    /// Binary column; `NULL` reads as empty.
    pub fn get_bytes(&self, column: usize) -> Result<Vec<u8>, ConnectorError> {
        match self.value(column) {
            SqlValue::Null => Ok(Vec::new()),
            SqlValue::Bytes(b) => Ok(b.clone()),
            SqlValue::Text(s) => Ok(s.clone().into_bytes()),
            _ => Err(Self::unexpected(column, "bytes")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_integers_accept_raw_bytes() {
        let row = SqlRow::new(vec![
            SqlValue::Bytes(b"Sales".to_vec()),
            SqlValue::Bytes(b"42".to_vec()),
            SqlValue::Null,
        ]);

        assert_eq!(row.get_text(0).unwrap(), "Sales");
        assert_eq!(row.get_i64(1).unwrap(), 42);
        assert_eq!(row.get_opt_text(2).unwrap(), None);
        assert!(row.get_bytes(2).unwrap().is_empty());
    }

    #[test]
    fn missing_columns_read_as_null() {
        let row = SqlRow::new(Vec::new());
        assert!(row.is_empty());
        assert_eq!(row.get_opt_time(3).unwrap(), None);
        assert!(row.get_time(3).is_err());
    }

    #[test]
    fn type_mismatch_is_reported_with_column() {
        let row = SqlRow::new(vec![SqlValue::Time(Utc::now())]);
        match row.get_i64(0) {
            Err(ConnectorError::UnexpectedValue { column, .. }) => assert_eq!(column, 0),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
