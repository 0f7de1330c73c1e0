//! Connector configuration.
//!
//! ```
//! use std::time::Duration;
//! use micro_connector::ConnectorConfig;
//!
//! let config = ConnectorConfig::builder()
//!     .max_total_connections(256)
//!     .pipelining_connections(true)
//!     .max_io_idle_time(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//!
//! assert!(config.persisting_connections());
//! assert_eq!(config.max_total_connections(), Some(256));
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::codec::DEFAULT_MAX_LINE_LENGTH;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    max_total_connections: Option<usize>,
    max_connections_per_host: Option<usize>,
    persisting_connections: bool,
    pipelining_connections: bool,
    worker_threads: bool,
    min_threads: usize,
    max_threads: usize,
    inbound_buffer_size: usize,
    outbound_buffer_size: usize,
    tracing: bool,
    max_io_idle_time: Option<Duration>,
    controller_sleep_time: Duration,
    max_header_count: usize,
    max_line_length: usize,
    pool_size: usize,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("min_threads {min} is greater than max_threads {max}")]
    ThreadRange { min: usize, max: usize },
}

impl ConnectorConfig {
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder { config: Self::default() }
    }

    /// Upper bound of open connections, `None` when unlimited.
    pub fn max_total_connections(&self) -> Option<usize> {
        self.max_total_connections
    }

    /// Upper bound of client connections to the same address, `None` when unlimited.
    pub fn max_connections_per_host(&self) -> Option<usize> {
        self.max_connections_per_host
    }

    pub fn persisting_connections(&self) -> bool {
        self.persisting_connections
    }

    pub fn pipelining_connections(&self) -> bool {
        self.pipelining_connections
    }

    /// Whether handlers run on worker threads, otherwise on the controller thread.
    pub fn worker_threads(&self) -> bool {
        self.worker_threads
    }

    pub fn min_threads(&self) -> usize {
        self.min_threads
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn inbound_buffer_size(&self) -> usize {
        self.inbound_buffer_size
    }

    pub fn outbound_buffer_size(&self) -> usize {
        self.outbound_buffer_size
    }

    /// Echo every exchanged byte to the standard output.
    pub fn tracing(&self) -> bool {
        self.tracing
    }

    pub fn max_io_idle_time(&self) -> Option<Duration> {
        self.max_io_idle_time
    }

    /// How long the controller blocks on the selector when nothing happens.
    pub fn controller_sleep_time(&self) -> Duration {
        self.controller_sleep_time
    }

    pub fn max_header_count(&self) -> usize {
        self.max_header_count
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Number of recycled connections kept for reuse.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_total_connections: None,
            max_connections_per_host: None,
            persisting_connections: true,
            pipelining_connections: false,
            worker_threads: true,
            min_threads: 1,
            max_threads: 10,
            inbound_buffer_size: 8 * 1024,
            outbound_buffer_size: 8 * 1024,
            tracing: false,
            max_io_idle_time: None,
            controller_sleep_time: Duration::from_millis(100),
            max_header_count: 100,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            pool_size: 16,
        }
    }
}

#[derive(Debug)]
pub struct ConnectorConfigBuilder {
    config: ConnectorConfig,
}

impl ConnectorConfigBuilder {
    pub fn max_total_connections(mut self, max: usize) -> Self {
        self.config.max_total_connections = Some(max);
        self
    }

    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.config.max_connections_per_host = Some(max);
        self
    }

    pub fn persisting_connections(mut self, persisting: bool) -> Self {
        self.config.persisting_connections = persisting;
        self
    }

    pub fn pipelining_connections(mut self, pipelining: bool) -> Self {
        self.config.pipelining_connections = pipelining;
        self
    }

    pub fn worker_threads(mut self, worker_threads: bool) -> Self {
        self.config.worker_threads = worker_threads;
        self
    }

    pub fn min_threads(mut self, min: usize) -> Self {
        self.config.min_threads = min;
        self
    }

    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    pub fn inbound_buffer_size(mut self, size: usize) -> Self {
        self.config.inbound_buffer_size = size;
        self
    }

    pub fn outbound_buffer_size(mut self, size: usize) -> Self {
        self.config.outbound_buffer_size = size;
        self
    }

    pub fn tracing(mut self, tracing: bool) -> Self {
        self.config.tracing = tracing;
        self
    }

    pub fn max_io_idle_time(mut self, idle: Duration) -> Self {
        self.config.max_io_idle_time = Some(idle);
        self
    }

    pub fn controller_sleep_time(mut self, sleep: Duration) -> Self {
        self.config.controller_sleep_time = sleep;
        self
    }

    pub fn max_header_count(mut self, max: usize) -> Self {
        self.config.max_header_count = max;
        self
    }

    pub fn max_line_length(mut self, max: usize) -> Self {
        self.config.max_line_length = max;
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    pub fn build(self) -> Result<ConnectorConfig, ConfigError> {
        let config = self.config;
        for (name, value) in [
            ("inbound_buffer_size", config.inbound_buffer_size),
            ("outbound_buffer_size", config.outbound_buffer_size),
            ("max_threads", config.max_threads),
            ("max_line_length", config.max_line_length),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }

        if config.min_threads > config.max_threads {
            return Err(ConfigError::ThreadRange { min: config.min_threads, max: config.max_threads });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.max_total_connections(), None);
        assert_eq!(config.max_connections_per_host(), None);
        assert!(config.persisting_connections());
        assert!(!config.pipelining_connections());
        assert!(config.worker_threads());
        assert_eq!((config.min_threads(), config.max_threads()), (1, 10));
        assert_eq!(config.controller_sleep_time(), Duration::from_millis(100));
        assert!(!config.tracing());
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            ConnectorConfig::builder().inbound_buffer_size(0).build(),
            Err(ConfigError::Zero { name: "inbound_buffer_size" })
        ));
        assert!(matches!(
            ConnectorConfig::builder().min_threads(4).max_threads(2).build(),
            Err(ConfigError::ThreadRange { min: 4, max: 2 })
        ));
    }
}
