pub mod dialect;
pub mod executor;
pub mod query;
pub mod row;
pub mod source;
pub mod target;
