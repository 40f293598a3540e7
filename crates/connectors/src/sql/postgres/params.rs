use crate::sql::base::row::SqlParam;
use tokio_postgres::types::ToSql;

pub struct PgParam(Box<dyn ToSql + Sync + Send>);

impl PgParam {
    pub fn from_param(param: &SqlParam) -> Self {
        match param {
            SqlParam::Text(v) => PgParam(Box::new(v.clone())),
            SqlParam::Int(v) => PgParam(Box::new(*v)),
            SqlParam::Time(v) => PgParam(Box::new(*v)),
            SqlParam::OptTime(v) => PgParam(Box::new(*v)),
            SqlParam::Bytes(v) => PgParam(Box::new(v.clone())),
        }
    }
}

impl AsRef<dyn ToSql + Sync> for PgParam {
    fn as_ref(&self) -> &(dyn ToSql + Sync + 'static) {
        &*self.0
    }
}

pub struct PgParamStore {
    pub params: Vec<PgParam>,
}

impl PgParamStore {
    pub fn from_params(params: &[SqlParam]) -> Self {
        Self {
            params: params.iter().map(PgParam::from_param).collect(),
        }
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| param.as_ref())
            .collect::<Vec<_>>()
    }
}
