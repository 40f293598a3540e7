pub mod adapter;
pub mod embedded;
pub mod error;
pub mod message;
pub mod sql;
