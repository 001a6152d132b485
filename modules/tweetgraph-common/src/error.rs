use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TweetGraphError {
    #[error("Malformed payload: {reason}")]
    MalformedPayload {
        /// Post id, when the payload carried one.
        post_id: Option<String>,
        reason: String,
    },

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Permanent store error: {0}")]
    PermanentStore(String),

    #[error("Startup failure: {0}")]
    StartupFailure(String),

    #[error("Stream terminated: {0}")]
    StreamTerminated(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TweetGraphError {
    pub fn malformed(post_id: Option<&str>, reason: impl Into<String>) -> Self {
        TweetGraphError::MalformedPayload {
            post_id: post_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Stable tag used in logs and dead letters.
    pub fn kind(&self) -> &'static str {
        match self {
            TweetGraphError::MalformedPayload { .. } => "malformed_payload",
            TweetGraphError::TransientStore(_) => "transient_store_error",
            TweetGraphError::PermanentStore(_) => "permanent_store_error",
            TweetGraphError::StartupFailure(_) => "startup_failure",
            TweetGraphError::StreamTerminated(_) => "stream_terminated",
            TweetGraphError::Config(_) => "config",
        }
    }

    /// Only transient store failures are worth retrying: compiled batches are
    /// idempotent, everything else fails the same way twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TweetGraphError::TransientStore(_))
    }
}
