use crate::sql::base::row::SqlParam;
use chrono::{DateTime, Datelike, Timelike, Utc};
use mysql_async::Value as MySqlValue;
use mysql_common::params::Params;

pub struct MySqlParam(MySqlValue);

impl MySqlParam {
    pub fn from_param(param: &SqlParam) -> Self {
        match param {
            SqlParam::Text(s) => MySqlParam(MySqlValue::Bytes(s.clone().into_bytes())),
            SqlParam::Int(i) => MySqlParam(MySqlValue::Int(*i)),
            SqlParam::Time(ts) => MySqlParam(date_value(ts)),
            SqlParam::OptTime(Some(ts)) => MySqlParam(date_value(ts)),
            SqlParam::OptTime(None) => MySqlParam(MySqlValue::NULL),
            SqlParam::Bytes(b) => MySqlParam(MySqlValue::Bytes(b.clone())),
        }
    }
}

/// Timestamps are written in UTC with microsecond precision.
fn date_value(ts: &DateTime<Utc>) -> MySqlValue {
    let naive = ts.naive_utc();
    MySqlValue::Date(
        naive.year() as u16,
        naive.month() as u8,
        naive.day() as u8,
        naive.hour() as u8,
        naive.minute() as u8,
        naive.second() as u8,
        ts.timestamp_subsec_micros(),
    )
}

pub struct MySqlParamStore {
    pub params: Vec<MySqlParam>,
}

impl MySqlParamStore {
    pub fn from_params(params: &[SqlParam]) -> Self {
        let params = params.iter().map(MySqlParam::from_param).collect();
        MySqlParamStore { params }
    }

    pub fn params(&self) -> Params {
        if self.params.is_empty() {
            return Params::Empty;
        }
        let mysql_values: Vec<MySqlValue> = self.params.iter().map(|p| p.0.clone()).collect();
        Params::Positional(mysql_values)
    }
}
