//! Dead letters: events the loop gave up on, kept for later inspection.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tweetgraph_common::TweetGraphError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub run_id: String,
    pub post_id: Option<String>,
    /// Error category, see [`TweetGraphError::kind`].
    pub kind: String,
    pub error: String,
    /// Store attempts made; zero when the payload never reached the store.
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
    pub payload: Value,
}

impl DeadLetter {
    pub fn new(
        run_id: &str,
        post_id: Option<String>,
        error: &TweetGraphError,
        attempts: u32,
        payload: Value,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            post_id,
            kind: error.kind().to_string(),
            error: error.to_string(),
            attempts,
            recorded_at: Utc::now(),
            payload,
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send {
    async fn record(&mut self, letter: DeadLetter) -> std::io::Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlDeadLetters {
    file: File,
}

impl JsonlDeadLetters {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TweetGraphError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| {
                TweetGraphError::StartupFailure(format!(
                    "cannot open dead-letter file {}: {e}",
                    path.display()
                ))
            })?;
        Ok(Self { file })
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetters {
    async fn record(&mut self, letter: DeadLetter) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(&letter)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await
    }
}

/// Collects letters in memory. Clones share the same list.
#[derive(Clone, Default)]
pub struct MemoryDeadLetters {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn record(&mut self, letter: DeadLetter) -> std::io::Result<()> {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(letter);
        Ok(())
    }
}
