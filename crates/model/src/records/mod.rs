pub mod batch;
pub mod endpoint;
pub mod timeout;
