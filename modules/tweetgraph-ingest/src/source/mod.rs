//! Post sources.
//!
//! The live streaming transport is an external collaborator; the ingestion
//! loop only sees this pull-based seam. Each call yields the next raw post
//! payload, `Ok(None)` at end of stream, or `StreamTerminated` when the
//! transport gives up.
//!
//! # Available Sources
//!
//! - [`JsonlSource`] - Replays captured stream payloads, one JSON object per line
//! - [`VecSource`] - In-memory payloads for tests and dry runs

mod jsonl;
mod memory;

pub use jsonl::{JsonlSource, JsonlStats};
pub use memory::VecSource;

use async_trait::async_trait;
use serde_json::Value;
use tweetgraph_common::{StreamFilter, TweetGraphError};

/// A lazy, unbounded sequence of raw post payloads.
#[async_trait]
pub trait PostSource: Send {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Wait for the next payload. Must be cancel-safe: the ingestion loop
    /// drops the pending call on shutdown.
    async fn next_post(&mut self) -> Result<Option<Value>, TweetGraphError>;
}

/// Whether `post` passes `filter`. Keyword and location filters are OR-ed,
/// as the streaming API does; an empty filter accepts everything.
pub fn accepts(filter: &StreamFilter, post: &Value) -> bool {
    if filter.is_empty() {
        return true;
    }

    let by_keyword = !filter.track.is_empty() && {
        let text = post_text(post).to_lowercase();
        filter
            .track
            .iter()
            .any(|k| text.contains(&k.to_lowercase()))
    };

    let by_location = filter.locations.is_some_and(|bbox| {
        point(post).is_some_and(|(lng, lat)| bbox.contains(lng, lat))
    });

    by_keyword || by_location
}

fn post_text(post: &Value) -> &str {
    post.pointer("/extended_tweet/full_text")
        .or_else(|| post.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// GeoJSON `[lng, lat]` from the post's `coordinates` block.
fn point(post: &Value) -> Option<(f64, f64)> {
    let coords = post.pointer("/coordinates/coordinates")?.as_array()?;
    match coords.as_slice() {
        [lng, lat] => Some((lng.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}
