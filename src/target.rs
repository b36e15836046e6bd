//! Drives the Singer message loop: buffers records, commits batches and
//! emits state once everything before it has been written.

use std::collections::HashMap;

use anyhow::Context;
use mongodb_sink::{Batch, BatchCommitter, DocumentStore};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::accumulator::BatchAccumulator;
use crate::singer::{Message, MessageReader};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records_received: usize,
    pub records_committed: usize,
    pub records_skipped: usize,
    pub batches_committed: usize,
    pub states_emitted: usize,
}

pub struct Target<S, W> {
    committer: BatchCommitter<S>,
    accumulator: BatchAccumulator,
    key_properties: HashMap<String, Vec<String>>,
    state_out: W,
    summary: RunSummary,
}

impl<S: DocumentStore, W: AsyncWrite + Unpin> Target<S, W> {
    pub fn new(committer: BatchCommitter<S>, max_batch_size: usize, state_out: W) -> Self {
        Self {
            committer,
            accumulator: BatchAccumulator::new(max_batch_size),
            key_properties: HashMap::new(),
            state_out,
            summary: RunSummary::default(),
        }
    }

    pub fn committer(&self) -> &BatchCommitter<S> {
        &self.committer
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub async fn process(&mut self, message: Message) -> anyhow::Result<()> {
        match message {
            Message::Schema {
                stream,
                key_properties,
                ..
            } => {
                if self.key_properties.get(&stream) != Some(&key_properties) {
                    // Records buffered under the old key must go out with it.
                    if let Some(batch) = self.accumulator.drain_stream(&stream) {
                        self.commit(batch).await?;
                    }
                }
                tracing::debug!("Stream '{}' keyed by {:?}", stream, key_properties);
                self.key_properties.insert(stream, key_properties);
            }
            Message::Record { stream, record } => {
                let key_properties = self.key_properties.get(&stream).ok_or_else(|| {
                    anyhow::anyhow!("Received RECORD for stream '{stream}' before its SCHEMA")
                })?;
                self.summary.records_received += 1;
                if let Some(batch) = self.accumulator.push(&stream, key_properties, record) {
                    self.commit(batch).await?;
                }
            }
            Message::State { value } => {
                self.flush().await?;
                self.emit_state(&value).await?;
            }
            Message::ActivateVersion { stream, version } => {
                tracing::debug!(
                    "Ignoring ACTIVATE_VERSION {} for stream '{}'",
                    version,
                    stream
                );
            }
        }
        Ok(())
    }

    /// Commits every partial batch.
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        for batch in self.accumulator.drain_all() {
            self.commit(batch).await?;
        }
        Ok(())
    }

    /// Flushes what is left at end of input.
    pub async fn finish(mut self) -> anyhow::Result<(RunSummary, W)> {
        self.flush().await?;
        self.state_out.flush().await?;
        Ok((self.summary, self.state_out))
    }

    async fn commit(&mut self, mut batch: Batch) -> anyhow::Result<()> {
        let report = self
            .committer
            .commit(&mut batch)
            .await
            .with_context(|| format!("Failed to commit batch for stream '{}'", batch.stream))?;
        self.summary.batches_committed += 1;
        self.summary.records_committed += report.committed;
        self.summary.records_skipped += report.skipped;
        Ok(())
    }

    async fn emit_state(&mut self, value: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        self.state_out
            .write_all(line.as_bytes())
            .await
            .context("Failed to write state")?;
        self.state_out.flush().await?;
        self.summary.states_emitted += 1;
        tracing::debug!("Emitted state {}", value);
        Ok(())
    }
}

/// Reads every message from `input`, writing to `committer`'s store and
/// state lines to `state_out`.
pub async fn run<S, R, W>(
    committer: BatchCommitter<S>,
    max_batch_size: usize,
    input: R,
    state_out: W,
) -> anyhow::Result<RunSummary>
where
    S: DocumentStore,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = MessageReader::new(input);
    let mut target = Target::new(committer, max_batch_size, state_out);

    while let Some(message) = reader.next_message().await? {
        target.process(message).await?;
    }

    let (summary, _) = target.finish().await?;
    tracing::info!(
        "Target finished: {} records received, {} committed, {} skipped in {} batches",
        summary.records_received,
        summary.records_committed,
        summary.records_skipped,
        summary.batches_committed
    );
    Ok(summary)
}
