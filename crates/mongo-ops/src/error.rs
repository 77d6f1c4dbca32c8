//! Operation error types.

use mongo_pool::PoolError;
use thiserror::Error;

/// Errors produced while running a database operation through the pool.
#[derive(Debug, Error)]
pub enum OpsError {
    /// The pool could not supply a connection.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// The underlying client rejected the operation; forwarded unchanged.
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}
