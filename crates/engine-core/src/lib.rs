pub mod connectors;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod partition;
pub mod retry;
pub mod settings;
pub mod state;
