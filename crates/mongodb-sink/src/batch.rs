//! Record and batch types handed to the committer.

/// One logical document: field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Maximum number of records in a batch unless configured otherwise.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Ordered records for a single stream.
///
/// Only the first entry of `key_properties` is used as the upsert key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub stream: String,
    pub key_properties: Vec<String>,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(stream: impl Into<String>, key_properties: Vec<String>) -> Self {
        Self {
            stream: stream.into(),
            key_properties,
            records: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    /// The field used as the upsert key, if the stream declared one.
    pub fn primary_key(&self) -> Option<&str> {
        self.key_properties.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Drops every record. Called once a batch has been committed.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
