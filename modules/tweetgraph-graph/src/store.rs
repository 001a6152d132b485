//! Store seam: the transactional session interface the engine writes through.
//!
//! Implemented by `GraphClient` (Neo4j over bolt) and `MemoryGraph` (tests).
//! Implementations classify their own failures into
//! `TransientStore` / `PermanentStore`.

use std::sync::Arc;

use async_trait::async_trait;
use tweetgraph_common::{NodeLabel, TweetGraphError};

use crate::compiler::UpsertOp;

/// Session factory over a graph store with MERGE semantics.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Open a transaction on a fresh session.
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, TweetGraphError>;

    /// Ensure a uniqueness constraint on `label.id`. Succeeds if it already exists.
    async fn ensure_unique(&self, label: NodeLabel) -> Result<(), TweetGraphError>;
}

/// One open transaction. Nothing is visible to other sessions until `commit`.
#[async_trait]
pub trait GraphTxn: Send {
    async fn run(&mut self, op: &UpsertOp) -> Result<(), TweetGraphError>;

    async fn commit(&mut self) -> Result<(), TweetGraphError>;

    async fn rollback(&mut self) -> Result<(), TweetGraphError>;
}

#[async_trait]
impl<S: GraphStore + ?Sized> GraphStore for Arc<S> {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, TweetGraphError> {
        (**self).begin().await
    }

    async fn ensure_unique(&self, label: NodeLabel) -> Result<(), TweetGraphError> {
        (**self).ensure_unique(label).await
    }
}

/// Neo4j status code families and transport wording that mean "try again".
const TRANSIENT_MARKERS: &[&str] = &[
    "io error",
    "connection",
    "broken pipe",
    "reset by peer",
    "timed out",
    "timeout",
    "deadlock",
    "unavailable",
];

/// Transient-family codes neo4rs treats as client errors; never retried.
const NON_RETRYABLE_TRANSIENT: &[&str] = &[
    "neo.transienterror.transaction.terminated",
    "neo.transienterror.transaction.lockclientstopped",
];

/// Classify a store failure message as transient or permanent.
///
/// Neo4j status codes decide first (`Neo.TransientError.*` retries except
/// the terminated/stopped codes, `Neo.ClientError.*` / `Neo.DatabaseError.*`
/// do not); otherwise transport wording marks it transient. Anything
/// unrecognised is permanent.
pub fn classify_store_error(message: &str) -> TweetGraphError {
    let lower = message.to_lowercase();

    if NON_RETRYABLE_TRANSIENT.iter().any(|code| lower.contains(code)) {
        return TweetGraphError::PermanentStore(message.to_string());
    }
    if lower.contains("neo.transienterror") {
        return TweetGraphError::TransientStore(message.to_string());
    }
    if lower.contains("neo.clienterror") || lower.contains("neo.databaseerror") {
        return TweetGraphError::PermanentStore(message.to_string());
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return TweetGraphError::TransientStore(message.to_string());
    }
    TweetGraphError::PermanentStore(message.to_string())
}
