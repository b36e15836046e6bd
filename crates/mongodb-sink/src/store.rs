//! The document store seam and its MongoDB implementation.

use std::sync::Arc;

use anyhow::Context;
use mongodb::{bson::Document, Database};
use tokio::sync::OnceCell;

use crate::connect::{connect, MongoConnectionOpts};
use crate::error::ConnectionError;
use crate::key::UpsertOperation;

/// Capability the committer needs from the target store.
///
/// Implementations must be safe to share between concurrent commits of
/// different streams.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Makes sure a connection is open, opening one if needed.
    async fn ensure_connected(&self) -> Result<(), ConnectionError>;

    /// Updates the document matching `operation.filter` with `$set`, inserting
    /// it when nothing matches.
    async fn upsert(&self, collection: &str, operation: &UpsertOperation) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn ensure_connected(&self) -> Result<(), ConnectionError> {
        (**self).ensure_connected().await
    }

    async fn upsert(&self, collection: &str, operation: &UpsertOperation) -> anyhow::Result<()> {
        (**self).upsert(collection, operation).await
    }
}

/// MongoDB-backed store.
///
/// The database handle is opened on first use and then held for the process
/// lifetime. The driver pools connections internally and its handles are
/// thread-safe, so one `MongoStore` serves every stream.
pub struct MongoStore {
    opts: MongoConnectionOpts,
    database: OnceCell<Database>,
}

impl MongoStore {
    pub fn new(opts: MongoConnectionOpts) -> Self {
        Self {
            opts,
            database: OnceCell::new(),
        }
    }

    /// Returns the open database handle, connecting on first call.
    ///
    /// A failed attempt leaves the cell empty, so the next batch retries.
    pub async fn database(&self) -> Result<&Database, ConnectionError> {
        self.database
            .get_or_try_init(|| connect(&self.opts))
            .await
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    async fn ensure_connected(&self) -> Result<(), ConnectionError> {
        self.database().await.map(|_| ())
    }

    async fn upsert(&self, collection: &str, operation: &UpsertOperation) -> anyhow::Result<()> {
        let database = self.database().await?;
        let result = database
            .collection::<Document>(collection)
            .update_one(operation.filter.clone(), operation.update())
            .upsert(true)
            .await
            .with_context(|| format!("update_one on '{collection}' failed"))?;

        tracing::trace!(
            "Upserted into {}: matched={} modified={} upserted_id={:?}",
            collection,
            result.matched_count,
            result.modified_count,
            result.upserted_id
        );
        Ok(())
    }
}
