//! In-memory document store for tests.
//!
//! Reproduces the parts of MongoDB's `update_one(filter, {"$set": ..},
//! upsert: true)` that the committer relies on: equality filters, field
//! overwrite, insert with a generated `_id`, and the immutable `_id` rule.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use bson::{oid::ObjectId, Bson, Document};

use crate::error::ConnectionError;
use crate::key::{UpsertOperation, NATIVE_ID_FIELD};
use crate::store::DocumentStore;

/// An upsert as received by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpsert {
    pub collection: String,
    pub operation: UpsertOperation,
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Vec<Document>>,
    operations: Vec<RecordedUpsert>,
    fail_connect: bool,
    fail_writes_after: Option<usize>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `ensure_connected` call fails.
    pub fn with_failing_connection(self) -> Self {
        self.lock().fail_connect = true;
        self
    }

    /// Upserts fail once `successes` of them have been applied.
    pub fn with_failing_writes_after(self, successes: usize) -> Self {
        self.lock().fail_writes_after = Some(successes);
        self
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_connect = false;
        state.fail_writes_after = None;
    }

    /// Documents of a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.lock().collections.keys().cloned().collect()
    }

    /// Every upsert applied so far, in order.
    pub fn operations(&self) -> Vec<RecordedUpsert> {
        self.lock().operations.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn filter_matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, value)| document.get(field) == Some(value))
}

fn apply_set(document: &mut Document, payload: &Document) -> anyhow::Result<()> {
    let current = document.get(NATIVE_ID_FIELD);
    if let (Some(current), Some(new)) = (current, payload.get(NATIVE_ID_FIELD)) {
        if current != new {
            anyhow::bail!(
                "Performing an update on the path '_id' would modify the immutable field '_id'"
            );
        }
    }
    for (field, value) in payload {
        document.insert(field.clone(), value.clone());
    }
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryStore {
    async fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.lock().fail_connect {
            return Err(ConnectionError {
                database: "in-memory".to_string(),
                source: anyhow::anyhow!("server selection timed out"),
            });
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, operation: &UpsertOperation) -> anyhow::Result<()> {
        let mut state = self.lock();
        if let Some(limit) = state.fail_writes_after {
            if state.operations.len() >= limit {
                anyhow::bail!("connection reset while writing to '{collection}'");
            }
        }

        let documents = state.collections.entry(collection.to_string()).or_default();
        match documents
            .iter_mut()
            .find(|document| filter_matches(document, &operation.filter))
        {
            Some(existing) => apply_set(existing, &operation.payload)?,
            None => {
                let mut inserted = Document::new();
                if !operation.filter.contains_key(NATIVE_ID_FIELD)
                    && !operation.payload.contains_key(NATIVE_ID_FIELD)
                {
                    inserted.insert(NATIVE_ID_FIELD, Bson::ObjectId(ObjectId::new()));
                }
                for (field, value) in &operation.filter {
                    inserted.insert(field.clone(), value.clone());
                }
                apply_set(&mut inserted, &operation.payload)?;
                documents.push(inserted);
            }
        }

        state.operations.push(RecordedUpsert {
            collection: collection.to_string(),
            operation: operation.clone(),
        });
        Ok(())
    }
}
