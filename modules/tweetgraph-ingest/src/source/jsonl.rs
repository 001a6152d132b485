//! JSONL post source.
//!
//! Replays captured stream payloads (one JSON object per line) from a file
//! or stdin. Lines that are not UTF-8 JSON are logged and skipped. The
//! configured keyword/location filter is applied here, since a capture
//! holds everything the transport delivered.

use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tracing::{debug, warn};
use tweetgraph_common::{StreamFilter, TweetGraphError};

use super::{accepts, PostSource};

type LineReader = Split<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Counters for a JSONL replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonlStats {
    pub total_lines: u64,
    pub json_errors: u64,
    pub filtered: u64,
    pub delivered: u64,
}

pub struct JsonlSource {
    lines: LineReader,
    filter: StreamFilter,
    stats: JsonlStats,
}

impl JsonlSource {
    /// Open `input`, where `-` means stdin.
    pub async fn open(input: &str, filter: StreamFilter) -> Result<Self, TweetGraphError> {
        if input == "-" {
            return Ok(Self::from_reader(tokio::io::stdin(), filter));
        }
        let file = File::open(input).await.map_err(|e| {
            TweetGraphError::StartupFailure(format!("cannot open input {input}: {e}"))
        })?;
        Ok(Self::from_reader(file, filter))
    }

    pub fn from_reader<R>(reader: R, filter: StreamFilter) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: BufReader::new(boxed).split(b'\n'),
            filter,
            stats: JsonlStats::default(),
        }
    }

    pub fn stats(&self) -> JsonlStats {
        self.stats
    }
}

#[async_trait::async_trait]
impl PostSource for JsonlSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn next_post(&mut self) -> Result<Option<Value>, TweetGraphError> {
        loop {
            let raw = match self.lines.next_segment().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(stats = ?self.stats, "JSONL input exhausted");
                    return Ok(None);
                }
                Err(e) => {
                    return Err(TweetGraphError::StreamTerminated(format!(
                        "read failed after line {}: {e}",
                        self.stats.total_lines
                    )));
                }
            };
            self.stats.total_lines += 1;

            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    warn!("Line {}: not valid UTF-8: {}", self.stats.total_lines, e);
                    self.stats.json_errors += 1;
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let post: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Line {}: JSON parse error: {}", self.stats.total_lines, e);
                    self.stats.json_errors += 1;
                    continue;
                }
            };

            if !accepts(&self.filter, &post) {
                self.stats.filtered += 1;
                continue;
            }

            self.stats.delivered += 1;
            return Ok(Some(post));
        }
    }
}
