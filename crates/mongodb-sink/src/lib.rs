//! Batching and upsert delivery engine for MongoDB.
//!
//! This crate takes bounded batches of JSON records tagged with a stream name
//! and persists them into MongoDB with idempotent upserts:
//!
//! - [`collection`] maps a stream name to a legal collection name
//! - [`key`] turns a record into an upsert filter and `$set` payload,
//!   special-casing the native `_id` field
//! - [`connect`] opens a bounded-timeout connection to the target database
//! - [`commit`] applies one batch against a [`DocumentStore`]
//!
//! The store is a trait so the same commit path runs against the real
//! driver ([`MongoStore`]) and the in-memory store in [`testing`].

pub mod batch;
pub mod collection;
pub mod commit;
pub mod connect;
pub mod error;
pub mod key;
pub mod store;
pub mod testing;
mod value;

pub use bson;
pub use batch::{Batch, Record, DEFAULT_MAX_BATCH_SIZE};
pub use collection::{check_collection_name, resolve_collection};
pub use commit::{BatchCommitter, CommitReport, InvalidRecordPolicy};
pub use connect::{connect, MongoConnectionOpts, DEFAULT_CONNECT_TIMEOUT};
pub use error::{CommitError, ConnectionError, KeyError};
pub use key::{normalize, UpsertOperation, NATIVE_ID_FIELD};
pub use store::{DocumentStore, MongoStore};
