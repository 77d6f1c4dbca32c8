//! Pool error types.

use thiserror::Error;

/// Errors produced by the connection pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Session creation, network connect, or liveness probe failure.
    #[error("connection failed: {0}")]
    Connection(#[from] mongodb::error::Error),

    /// Pool exhausted with no healthy handle and no permitted fallback.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// The guard no longer holds a connection to act on.
    #[error("no connection held by this handle")]
    InvalidHandle,

    /// Operation attempted on a pool that has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// One or more idle handles failed to disconnect during shutdown.
    #[error("shutdown failed to disconnect {} handle(s)", errors.len())]
    Disconnect {
        /// Every disconnection error encountered while draining.
        errors: Vec<PoolError>,
    },
}
