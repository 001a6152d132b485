use std::collections::VecDeque;

use serde_json::Value;
use tweetgraph_common::TweetGraphError;

use super::PostSource;

#[derive(Debug, Clone, Default)]
enum Tail {
    #[default]
    End,
    Fail(String),
    Hang,
}

/// Yields a fixed list of payloads, then ends, fails, or blocks forever.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    posts: VecDeque<Value>,
    tail: Tail,
}

impl VecSource {
    pub fn new(posts: impl IntoIterator<Item = Value>) -> Self {
        Self {
            posts: posts.into_iter().collect(),
            tail: Tail::End,
        }
    }

    /// After the payloads run out, terminate with a stream error.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.tail = Tail::Fail(reason.into());
        self
    }

    /// After the payloads run out, wait forever like an idle live stream.
    pub fn then_hang(mut self) -> Self {
        self.tail = Tail::Hang;
        self
    }

    pub fn remaining(&self) -> usize {
        self.posts.len()
    }
}

#[async_trait::async_trait]
impl PostSource for VecSource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn next_post(&mut self) -> Result<Option<Value>, TweetGraphError> {
        if let Some(post) = self.posts.pop_front() {
            return Ok(Some(post));
        }
        match &self.tail {
            Tail::End => Ok(None),
            Tail::Fail(reason) => Err(TweetGraphError::StreamTerminated(reason.clone())),
            Tail::Hang => std::future::pending().await,
        }
    }
}
