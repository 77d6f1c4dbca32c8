//! Collection and index management.

use std::time::Duration;

use mongo_pool::MongoPool;
use mongodb::IndexModel;
use mongodb::options::{CreateCollectionOptions, CreateIndexOptions};

use crate::error::OpsError;
use crate::release_quietly;

/// Server-side time budget applied to index builds unless the caller
/// supplies their own.
const INDEX_BUILD_BUDGET: Duration = Duration::from_secs(5);

/// Create a collection in the pool's database.
pub async fn create_collection(
    pool: &MongoPool,
    name: &str,
    options: impl Into<Option<CreateCollectionOptions>>,
) -> Result<(), OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .database()
        .create_collection(name)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Drop a collection from the pool's database.
pub async fn drop_collection(pool: &MongoPool, name: &str) -> Result<(), OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn.collection(name).drop().await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Create one index, returning its name.
pub async fn create_index(
    pool: &MongoPool,
    collection: &str,
    index: IndexModel,
    options: impl Into<Option<CreateIndexOptions>>,
) -> Result<String, OpsError> {
    let options = budgeted(options.into());
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .create_index(index)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?.index_name)
}

/// Create several indexes, returning their names.
pub async fn create_indexes(
    pool: &MongoPool,
    collection: &str,
    indexes: Vec<IndexModel>,
    options: impl Into<Option<CreateIndexOptions>>,
) -> Result<Vec<String>, OpsError> {
    let options = budgeted(options.into());
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .create_indexes(indexes)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?.index_names)
}

/// Apply the default index build budget when the caller set none.
fn budgeted(options: Option<CreateIndexOptions>) -> CreateIndexOptions {
    let mut options = options.unwrap_or_default();
    if options.max_time.is_none() {
        options.max_time = Some(INDEX_BUILD_BUDGET);
    }
    options
}
