//! # mongo-pool
//!
//! Bounded, health-checked connection pool for MongoDB.
//!
//! Handles are opened lazily up to a configured capacity, probed with a
//! `ping` round trip before reuse, and returned to a fixed-capacity store
//! whose bound holds by construction. Failures that happen off the
//! synchronous return path are forwarded to a non-blocking error channel
//! whose subscriber is handed out at construction.
//!
//! ## Features
//!
//! - Lazy connection creation up to `max_pool_size`, with an explicit
//!   choice between hard capacity and metered overflow
//! - Liveness probes on both acquisition and release
//! - Non-blocking release: a full store discards the surplus handle
//!   instead of parking a task
//! - Shutdown draining with a drain-all or fail-fast policy and an
//!   aggregate of every disconnection failure
//! - Fire-and-forget task dispatch with guaranteed release
//! - Secondary reads with a bounded staleness window
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_pool::{MongoPool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .address("mongodb://localhost:27017")
//!     .database("orders")
//!     .max_pool_size(20);
//!
//! let (pool, mut errors) = MongoPool::new(config)?;
//!
//! let mut conn = pool.acquire().await?;
//! let names = conn.database().list_collection_names().await?;
//! pool.release(&mut conn).await?;
//!
//! // Fire-and-forget work; failures surface on the error channel.
//! let done = pool.spawn_with(|conn, _reporter| async move {
//!     conn.collection("audit").insert_one(bson::doc! { "ok": 1 }).await?;
//!     Ok(())
//! });
//! done.await?;
//!
//! pool.close_all().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod pool;
pub mod report;
pub mod runner;

// Configuration
pub use config::{CapacityMode, PoolConfig, ShutdownPolicy};

// Connection establishment
pub use connector::{Connector, MongoConn, MongoConnector};

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{MongoPool, Pool, PoolMetrics, PoolStatus, PooledConn};

// Error channel
pub use report::{ErrorReporter, ErrorStream};
