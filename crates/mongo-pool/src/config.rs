//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Minimum staleness the server accepts for secondary reads.
const MIN_MAX_STALENESS: Duration = Duration::from_secs(90);

/// Configuration for connecting to and pooling a MongoDB deployment.
///
/// Validated once when the pool is built; the pool keeps its own immutable
/// copy, so settings cannot change underneath a running pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connection string, e.g. `mongodb://localhost:27017`.
    pub address: String,

    /// Maximum number of accounted connections (default: 100).
    ///
    /// A value of `0` is normalized to `1` during validation.
    pub max_pool_size: u32,

    /// Database every pooled handle is bound to.
    pub database: String,

    /// Connection establishment timeout (default: 60s).
    pub connect_timeout: Duration,

    /// Maximum tolerated replication lag for secondary reads (default: 500s).
    pub max_staleness: Duration,

    /// How long an acquisition waits for an idle handle before giving up
    /// or overflowing, per [`capacity`](Self::capacity) (default: 30s).
    pub acquire_timeout: Duration,

    /// Whether the pool may open overflow connections past capacity.
    pub capacity: CapacityMode,

    /// How shutdown reacts to a disconnection failure while draining.
    pub shutdown: ShutdownPolicy,

    /// Buffer size of the asynchronous error channel (default: 32).
    pub error_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            address: "mongodb://localhost:27017".to_string(),
            max_pool_size: 100,
            database: String::new(),
            connect_timeout: Duration::from_secs(60),
            max_staleness: Duration::from_secs(500),
            acquire_timeout: Duration::from_secs(30),
            capacity: CapacityMode::Soft,
            shutdown: ShutdownPolicy::DrainAll,
            error_buffer: 32,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the maximum number of accounted connections.
    #[must_use]
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum tolerated replication lag for secondary reads.
    #[must_use]
    pub fn max_staleness(mut self, staleness: Duration) -> Self {
        self.max_staleness = staleness;
        self
    }

    /// Set the acquisition wait budget.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the capacity mode.
    #[must_use]
    pub fn capacity(mut self, capacity: CapacityMode) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the shutdown drain policy.
    #[must_use]
    pub fn shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Set the error channel buffer size.
    #[must_use]
    pub fn error_buffer(mut self, capacity: usize) -> Self {
        self.error_buffer = capacity;
        self
    }

    /// Check the configuration for values the pool cannot operate with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.address.is_empty() {
            return Err(PoolError::Config("address must not be empty".to_string()));
        }
        if !self.address.starts_with("mongodb://") && !self.address.starts_with("mongodb+srv://") {
            return Err(PoolError::Config(format!(
                "address must use a mongodb:// or mongodb+srv:// scheme, got {}",
                self.address
            )));
        }
        if self.max_staleness < MIN_MAX_STALENESS {
            return Err(PoolError::Config(format!(
                "max_staleness must be at least {}s, got {}s",
                MIN_MAX_STALENESS.as_secs(),
                self.max_staleness.as_secs()
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Config(
                "acquire_timeout must be non-zero".to_string(),
            ));
        }
        if self.error_buffer == 0 {
            return Err(PoolError::Config(
                "error_buffer must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply the documented corrections for values that are tolerated but
    /// unusable as-is.
    pub(crate) fn normalized(mut self) -> Self {
        if self.max_pool_size == 0 {
            tracing::warn!("max_pool_size of 0 normalized to 1");
            self.max_pool_size = 1;
        }
        self
    }
}

/// Behavior when the pool is exhausted and no idle handle turns healthy
/// within the acquisition wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityMode {
    /// Open an overflow connection that is not counted against capacity.
    ///
    /// Overflow handles are tracked in the pool metrics and are discarded
    /// on release if the store is full.
    Soft,
    /// Fail the acquisition instead of exceeding capacity.
    Hard,
}

/// Behavior when disconnecting an idle handle fails during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownPolicy {
    /// Keep draining and report every failure in the aggregate error.
    DrainAll,
    /// Stop at the first failure, leaving the remaining handles connected.
    FailFast,
}
