//! Singer message parsing.
//!
//! Input is one JSON message per line. Only the messages a target acts on
//! are modelled; extra fields such as `time_extracted` are ignored.

use anyhow::Context;
use mongodb_sink::Record;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        #[serde(default)]
        schema: Value,
        #[serde(default)]
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Record,
    },
    State {
        value: Value,
    },
    ActivateVersion {
        stream: String,
        version: i64,
    },
}

pub fn parse_message(line: &str) -> serde_json::Result<Message> {
    serde_json::from_str(line)
}

/// Reads Singer messages line by line, skipping blank lines.
pub struct MessageReader<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Returns the next message, or `None` at end of input.
    pub async fn next_message(&mut self) -> anyhow::Result<Option<Message>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("Failed to read input")?
        {
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let message = parse_message(&line)
                .with_context(|| format!("Invalid Singer message on line {}", self.line_number))?;
            return Ok(Some(message));
        }
        Ok(None)
    }
}
