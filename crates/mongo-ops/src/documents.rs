//! Document CRUD operations.
//!
//! Every function here follows the same bracket: take a connection from
//! the pool, delegate exactly one call to the client, return the
//! connection, and forward the client's result or error unchanged.

use bson::{Bson, Document};
use futures_util::TryStreamExt;
use mongo_pool::MongoPool;
use mongodb::options::{
    AggregateOptions, DeleteOptions, FindOneAndReplaceOptions, FindOneAndUpdateOptions,
    FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions, UpdateOptions,
};
use mongodb::results::UpdateResult;

use crate::error::OpsError;
use crate::release_quietly;

/// Insert one document, returning its inserted id.
pub async fn insert_one(
    pool: &MongoPool,
    collection: &str,
    document: Document,
    options: impl Into<Option<InsertOneOptions>>,
) -> Result<Bson, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .insert_one(document)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?.inserted_id)
}

/// Insert several documents, returning their ids in insert order.
pub async fn insert_many(
    pool: &MongoPool,
    collection: &str,
    documents: Vec<Document>,
    options: impl Into<Option<InsertManyOptions>>,
) -> Result<Vec<Bson>, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .insert_many(documents)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(ordered_ids(result?.inserted_ids))
}

/// Find the first document matching the filter.
pub async fn find_one(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    options: impl Into<Option<FindOneOptions>>,
) -> Result<Option<Document>, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .find_one(filter)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Find every document matching the filter.
pub async fn find_many(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    options: impl Into<Option<FindOptions>>,
) -> Result<Vec<Document>, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = match conn
        .collection(collection)
        .find(filter)
        .with_options(options)
        .await
    {
        Ok(cursor) => cursor.try_collect::<Vec<Document>>().await,
        Err(error) => Err(error),
    };
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Run an aggregation pipeline and collect its results.
pub async fn aggregate(
    pool: &MongoPool,
    collection: &str,
    pipeline: Vec<Document>,
    options: impl Into<Option<AggregateOptions>>,
) -> Result<Vec<Document>, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = match conn
        .collection(collection)
        .aggregate(pipeline)
        .with_options(options)
        .await
    {
        Ok(cursor) => cursor.try_collect::<Vec<Document>>().await,
        Err(error) => Err(error),
    };
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Replace the first matching document, returning the affected document.
pub async fn find_one_and_replace(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    replacement: Document,
    options: impl Into<Option<FindOneAndReplaceOptions>>,
) -> Result<Option<Document>, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .find_one_and_replace(filter, replacement)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Update the first matching document, returning the affected document.
pub async fn find_one_and_update(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    update: Document,
    options: impl Into<Option<FindOneAndUpdateOptions>>,
) -> Result<Option<Document>, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .find_one_and_update(filter, update)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Update the first matching document.
pub async fn update_one(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    update: Document,
    options: impl Into<Option<UpdateOptions>>,
) -> Result<UpdateResult, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .update_one(filter, update)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Update every matching document.
pub async fn update_many(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    update: Document,
    options: impl Into<Option<UpdateOptions>>,
) -> Result<UpdateResult, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .update_many(filter, update)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?)
}

/// Delete the first matching document, returning the deleted count.
pub async fn delete_one(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    options: impl Into<Option<DeleteOptions>>,
) -> Result<u64, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .delete_one(filter)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?.deleted_count)
}

/// Delete every matching document, returning the deleted count.
pub async fn delete_many(
    pool: &MongoPool,
    collection: &str,
    filter: Document,
    options: impl Into<Option<DeleteOptions>>,
) -> Result<u64, OpsError> {
    let mut conn = pool.acquire().await?;
    let result = conn
        .collection(collection)
        .delete_many(filter)
        .with_options(options)
        .await;
    release_quietly(pool, &mut conn).await;
    Ok(result?.deleted_count)
}

/// Order a batch-insert id map by insert index.
fn ordered_ids(ids: std::collections::HashMap<usize, Bson>) -> Vec<Bson> {
    let mut ids: Vec<(usize, Bson)> = ids.into_iter().collect();
    ids.sort_unstable_by_key(|(index, _)| *index);
    ids.into_iter().map(|(_, id)| id).collect()
}
