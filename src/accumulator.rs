//! Per-stream record buffering.

use std::collections::BTreeMap;

use mongodb_sink::{Batch, Record};

/// Buffers records per stream and hands out batches of at most
/// `max_batch_size` records.
#[derive(Debug)]
pub struct BatchAccumulator {
    max_batch_size: usize,
    pending: BTreeMap<String, Batch>,
}

impl BatchAccumulator {
    /// A `max_batch_size` of zero is treated as one.
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            pending: BTreeMap::new(),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Adds a record and returns the stream's batch once it is full.
    pub fn push(
        &mut self,
        stream: &str,
        key_properties: &[String],
        record: Record,
    ) -> Option<Batch> {
        let batch = self
            .pending
            .entry(stream.to_string())
            .or_insert_with(|| Batch::new(stream, key_properties.to_vec()));
        batch.push(record);

        if batch.len() >= self.max_batch_size {
            self.pending.remove(stream)
        } else {
            None
        }
    }

    /// Removes the stream's partial batch, if it holds any records.
    pub fn drain_stream(&mut self, stream: &str) -> Option<Batch> {
        self.pending.remove(stream).filter(|batch| !batch.is_empty())
    }

    /// Removes every partial batch, ordered by stream name.
    pub fn drain_all(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|batch| !batch.is_empty())
            .collect()
    }

    /// Number of records waiting across all streams.
    pub fn pending_records(&self) -> usize {
        self.pending.values().map(Batch::len).sum()
    }
}
