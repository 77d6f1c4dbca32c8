//! # mongo-ops
//!
//! Thin CRUD surface over the [`mongo_pool`] connection pool.
//!
//! Each operation takes a connection from the pool, delegates one call to
//! the official client, returns the connection, and forwards the client's
//! result or error unchanged. Query semantics, transactions, and
//! serialization all belong to the client; the only logic here is the
//! acquire/release bracket.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bson::doc;
//! use mongo_ops::{find_one, insert_one};
//! use mongo_pool::{MongoPool, PoolConfig};
//!
//! let (pool, _errors) = MongoPool::new(PoolConfig::new().database("orders"))?;
//!
//! let id = insert_one(&pool, "orders", doc! { "sku": "A-1", "qty": 3 }, None).await?;
//! let order = find_one(&pool, "orders", doc! { "_id": id }, None).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod collections;
pub mod documents;
pub mod error;

pub use collections::{create_collection, create_index, create_indexes, drop_collection};
pub use documents::{
    aggregate, delete_many, delete_one, find_many, find_one, find_one_and_replace,
    find_one_and_update, insert_many, insert_one, update_many, update_one,
};
pub use error::OpsError;

use mongo_pool::{MongoConn, MongoPool, PooledConn};

/// Return a connection to the pool, logging instead of failing the
/// operation whose result is already decided.
pub(crate) async fn release_quietly(pool: &MongoPool, conn: &mut PooledConn<MongoConn>) {
    if let Err(error) = pool.release(conn).await {
        tracing::warn!(id = conn.id(), error = %error, "failed to return connection to pool");
    }
}
