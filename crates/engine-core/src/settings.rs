use crate::{partition::WriteChunker, retry::RetryPolicy};
use std::time::Duration;

/// Tunables shared by the runner and the storage adapters.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    batch_size: usize,
    page_size: usize,
    max_write_operations: usize,
    max_write_payload_bytes: usize,
    max_concurrency: usize,
    command_timeout: Duration,
    retry: RetryPolicy,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        MigrationSettings {
            batch_size: 1024,
            page_size: 1000,
            max_write_operations: 100,
            max_write_payload_bytes: 4 * 1024 * 1024,
            max_concurrency: 4,
            command_timeout: Duration::from_secs(20 * 60),
            retry: RetryPolicy::for_database(),
        }
    }
}

impl MigrationSettings {
    pub fn set_batch_size(&mut self, size: usize) {
        self.batch_size = size.max(1);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_page_size(&mut self, size: usize) {
        self.page_size = size.max(1);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn set_write_ceilings(&mut self, max_operations: usize, max_payload_bytes: usize) {
        self.max_write_operations = max_operations;
        self.max_write_payload_bytes = max_payload_bytes;
    }

    pub fn write_chunker(&self) -> WriteChunker {
        WriteChunker::new(self.max_write_operations, self.max_write_payload_bytes)
    }

    pub fn set_max_concurrency(&mut self, limit: usize) {
        self.max_concurrency = limit.max(1);
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = timeout;
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_clamped_to_one() {
        let mut settings = MigrationSettings::default();
        settings.set_batch_size(0);
        settings.set_page_size(0);
        settings.set_max_concurrency(0);

        assert_eq!(settings.batch_size(), 1);
        assert_eq!(settings.page_size(), 1);
        assert_eq!(settings.max_concurrency(), 1);
    }
}
