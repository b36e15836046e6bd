//! Batch commit orchestration.

use serde::Deserialize;

use crate::collection::{check_collection_name, resolve_collection};
use crate::error::{CommitError, Result};
use crate::key::{normalize, UpsertOperation};
use crate::store::DocumentStore;
use crate::Batch;

/// What to do with a record whose key cannot be normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRecordPolicy {
    /// Reject the whole batch before anything is written.
    #[default]
    Fail,
    /// Log the record, count it as skipped and commit the rest.
    Skip,
}

impl std::fmt::Display for InvalidRecordPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub collection: String,
    pub committed: usize,
    pub skipped: usize,
}

/// Applies batches to a [`DocumentStore`], one upsert per record.
///
/// Every upsert is `filter + $set + upsert`, so committing the same batch
/// again converges to the same documents. There is no retry loop here: a
/// failed batch is returned to the caller intact.
pub struct BatchCommitter<S> {
    store: S,
    policy: InvalidRecordPolicy,
}

impl<S: DocumentStore> BatchCommitter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: InvalidRecordPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: InvalidRecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> InvalidRecordPolicy {
        self.policy
    }

    /// Commits `batch` and clears its records.
    ///
    /// All records are normalized before the first write, so a malformed
    /// record under [`InvalidRecordPolicy::Fail`] or an unreachable store
    /// leaves the collection untouched. Upserts are issued in arrival order;
    /// later records with the same key win.
    pub async fn commit(&self, batch: &mut Batch) -> Result<CommitReport> {
        let primary_key = batch
            .primary_key()
            .ok_or_else(|| CommitError::NoPrimaryKey {
                stream: batch.stream.clone(),
            })?
            .to_string();
        let collection = resolve_collection(&batch.stream);
        check_collection_name(&collection).map_err(|reason| CommitError::InvalidCollection {
            stream: batch.stream.clone(),
            collection: collection.clone(),
            reason: reason.to_string(),
        })?;

        self.store
            .ensure_connected()
            .await
            .map_err(|source| CommitError::Connection {
                collection: collection.clone(),
                source,
            })?;

        let operations = self.prepare(batch, &primary_key)?;
        let skipped = batch.len() - operations.len();

        for (index, operation) in &operations {
            self.store
                .upsert(&collection, operation)
                .await
                .map_err(|source| CommitError::Write {
                    collection: collection.clone(),
                    index: *index,
                    source,
                })?;
        }

        tracing::info!("Uploaded {} records into {}", operations.len(), collection);
        if skipped > 0 {
            tracing::warn!("Skipped {} invalid records for {}", skipped, collection);
        }

        batch.clear();

        Ok(CommitReport {
            collection,
            committed: operations.len(),
            skipped,
        })
    }

    fn prepare(
        &self,
        batch: &Batch,
        primary_key: &str,
    ) -> Result<Vec<(usize, UpsertOperation)>> {
        let mut operations = Vec::with_capacity(batch.len());
        for (index, record) in batch.records.iter().enumerate() {
            match normalize(record, primary_key) {
                Ok(operation) => operations.push((index, operation)),
                Err(source) => match self.policy {
                    InvalidRecordPolicy::Fail => {
                        return Err(CommitError::InvalidRecord {
                            stream: batch.stream.clone(),
                            index,
                            source,
                        });
                    }
                    InvalidRecordPolicy::Skip => {
                        tracing::warn!(
                            "Skipping record {} of stream '{}': {}",
                            index,
                            batch.stream,
                            source
                        );
                    }
                },
            }
        }
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;
    use crate::{KeyError, Record};
    use bson::{doc, oid::ObjectId, Bson};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn batch(stream: &str, key: &str, records: Vec<serde_json::Value>) -> Batch {
        Batch::new(stream, vec![key.to_string()])
            .with_records(records.into_iter().map(record).collect())
    }

    #[tokio::test]
    async fn test_commit_native_id() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut users = batch(
            "users",
            "_id",
            vec![json!({"_id": "5f9a1b2c3d4e5f6a7b8c9d0e", "name": "Ann"})],
        );

        let report = committer.commit(&mut users).await.unwrap();

        assert_eq!(report.collection, "users");
        assert_eq!(report.committed, 1);
        assert!(users.is_empty());

        let oid = ObjectId::parse_str("5f9a1b2c3d4e5f6a7b8c9d0e").unwrap();
        let docs = committer.store().documents("users");
        assert_eq!(docs, vec![doc! { "_id": oid, "name": "Ann" }]);

        let sent = committer.store().operations();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].operation.filter, doc! { "_id": oid });
        assert!(!sent[0].operation.payload.contains_key("_id"));
    }

    #[tokio::test]
    async fn test_last_write_wins_within_batch() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut orders = batch(
            "orders/2024",
            "order_id",
            vec![
                json!({"order_id": "A1", "total": 10}),
                json!({"order_id": "A1", "total": 15}),
            ],
        );

        let report = committer.commit(&mut orders).await.unwrap();

        assert_eq!(report.collection, "orders%2F2024");
        assert!(!report.collection.contains('/'));
        assert_eq!(report.committed, 2);

        let docs = committer.store().documents("orders%2F2024");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("order_id").unwrap(), "A1");
        assert_eq!(docs[0].get_i32("total").unwrap(), 15);
        assert!(matches!(docs[0].get("_id"), Some(Bson::ObjectId(_))));
    }

    #[tokio::test]
    async fn test_commit_twice_is_idempotent() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let original = batch(
            "products",
            "sku",
            vec![
                json!({"sku": "p-1", "price": 3}),
                json!({"sku": "p-2", "price": 4, "tags": ["new"]}),
                json!({"sku": "p-1", "price": 5}),
            ],
        );

        committer.commit(&mut original.clone()).await.unwrap();
        let once = committer.store().documents("products");

        committer.commit(&mut original.clone()).await.unwrap();
        let twice = committer.store().documents("products");

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[tokio::test]
    async fn test_untouched_documents_survive() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        committer
            .commit(&mut batch("items", "id", vec![json!({"id": 1, "v": "a"})]))
            .await
            .unwrap();
        committer
            .commit(&mut batch("items", "id", vec![json!({"id": 2, "v": "b"})]))
            .await
            .unwrap();

        let docs = committer.store().documents("items");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get_str("v").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_missing_key_fails_batch_without_writes() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut users = batch(
            "users",
            "id",
            vec![json!({"id": 1, "name": "Ann"}), json!({"name": "Bob"})],
        );

        let err = committer.commit(&mut users).await.unwrap_err();

        match err {
            CommitError::InvalidRecord { index, source, .. } => {
                assert_eq!(index, 1);
                assert!(matches!(source, KeyError::MissingKey { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(users.len(), 2, "failed batch must not be cleared");
        assert!(committer.store().documents("users").is_empty());
        assert!(committer.store().operations().is_empty());
    }

    #[tokio::test]
    async fn test_skip_policy_commits_valid_records() {
        let committer =
            BatchCommitter::new(InMemoryStore::new()).with_policy(InvalidRecordPolicy::Skip);
        let mut users = batch(
            "users",
            "_id",
            vec![
                json!({"_id": "5f9a1b2c3d4e5f6a7b8c9d0e", "name": "Ann"}),
                json!({"_id": "bad", "name": "Bob"}),
                json!({"name": "Cid"}),
            ],
        );

        let report = committer.commit(&mut users).await.unwrap();

        assert_eq!(report.committed, 1);
        assert_eq!(report.skipped, 2);
        assert!(users.is_empty());
        assert_eq!(committer.store().documents("users").len(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_batch() {
        let committer = BatchCommitter::new(InMemoryStore::new().with_failing_connection());
        let mut users = batch("users", "id", vec![json!({"id": 1})]);

        let err = committer.commit(&mut users).await.unwrap_err();

        assert!(matches!(err, CommitError::Connection { ref collection, .. } if collection == "users"));
        assert_eq!(users.len(), 1);
        assert!(committer.store().operations().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_batch_for_retry() {
        let committer = BatchCommitter::new(InMemoryStore::new().with_failing_writes_after(1));
        let original = batch(
            "events",
            "id",
            vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})],
        );
        let mut first_try = original.clone();

        let err = committer.commit(&mut first_try).await.unwrap_err();
        assert!(matches!(err, CommitError::Write { index: 1, .. }));
        assert_eq!(first_try, original);
        // A prefix was applied before the failure.
        assert_eq!(committer.store().documents("events").len(), 1);

        committer.store().clear_failures();
        let report = committer.commit(&mut first_try).await.unwrap();
        assert_eq!(report.committed, 3);
        assert_eq!(committer.store().documents("events").len(), 3);
    }

    #[tokio::test]
    async fn test_no_primary_key() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut events = Batch::new("events", vec![]).with_records(vec![record(json!({"a": 1}))]);

        let err = committer.commit(&mut events).await.unwrap_err();
        assert!(matches!(err, CommitError::NoPrimaryKey { ref stream } if stream == "events"));
    }

    #[tokio::test]
    async fn test_empty_batch_commits_nothing() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut empty = Batch::new("users", vec!["id".to_string()]);

        let report = committer.commit(&mut empty).await.unwrap();
        assert_eq!(report.committed, 0);
        assert!(committer.store().operations().is_empty());
    }

    #[tokio::test]
    async fn test_keys_beyond_i64_are_not_merged() {
        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut big = batch(
            "big",
            "id",
            vec![
                json!({"id": 18446744073709551615u64, "v": "first"}),
                json!({"id": 18446744073709551614u64, "v": "second"}),
            ],
        );

        let err = committer.commit(&mut big).await.unwrap_err();
        match err {
            CommitError::InvalidRecord { index, source, .. } => {
                assert_eq!(index, 0);
                assert!(matches!(source, KeyError::InvalidKeyFormat { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(committer.store().documents("big").is_empty());
    }

    #[tokio::test]
    async fn test_keys_beyond_i64_are_skipped_under_skip_policy() {
        let committer =
            BatchCommitter::new(InMemoryStore::new()).with_policy(InvalidRecordPolicy::Skip);
        let mut big = batch(
            "big",
            "id",
            vec![
                json!({"id": 18446744073709551615u64, "v": "first"}),
                json!({"id": 18446744073709551614u64, "v": "second"}),
                json!({"id": 7, "v": "third"}),
            ],
        );

        let report = committer.commit(&mut big).await.unwrap();

        assert_eq!(report.committed, 1);
        assert_eq!(report.skipped, 2);
        let docs = committer.store().documents("big");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("v").unwrap(), "third");
    }

    #[tokio::test]
    async fn test_reserved_collection_is_rejected_before_connecting() {
        for name in ["", "system.users"] {
            let committer = BatchCommitter::new(InMemoryStore::new().with_failing_connection());
            let mut reserved = batch(name, "id", vec![json!({"id": 1})]);

            let err = committer.commit(&mut reserved).await.unwrap_err();

            assert!(
                matches!(err, CommitError::InvalidCollection { ref stream, .. } if stream == name),
                "unexpected error: {err:?}"
            );
            assert_eq!(reserved.len(), 1);
            assert!(committer.store().operations().is_empty());
        }
    }

    #[tokio::test]
    async fn test_upload_line_is_logged() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let committer = BatchCommitter::new(InMemoryStore::new());
        let mut orders = batch(
            "orders/2024",
            "order_id",
            vec![json!({"order_id": "A1"}), json!({"order_id": "A2"})],
        );
        committer.commit(&mut orders).await.unwrap();

        assert!(logs
            .contents()
            .contains("Uploaded 2 records into orders%2F2024"));
    }

    #[tokio::test]
    async fn test_upload_line_counts_only_committed_records() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let committer =
            BatchCommitter::new(InMemoryStore::new()).with_policy(InvalidRecordPolicy::Skip);
        let mut users = batch(
            "users",
            "id",
            vec![json!({"id": 1}), json!({"name": "no key"}), json!({"id": 3})],
        );
        committer.commit(&mut users).await.unwrap();

        let contents = logs.contents();
        assert!(contents.contains("Uploaded 2 records into users"));
        assert!(contents.contains("Skipped 1 invalid records for users"));
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(InvalidRecordPolicy::default().to_string(), "fail");
        assert_eq!(InvalidRecordPolicy::Skip.to_string(), "skip");
    }

    /// Collects formatted log output of the current thread.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(tracing::Level::INFO)
                .with_writer(move || writer.clone())
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
