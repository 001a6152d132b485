//! Transaction runner. Executes one compiled batch as a single all-or-nothing
//! unit against a store session.

use std::time::Duration;

use tracing::{debug, warn};
use tweetgraph_common::TweetGraphError;

use crate::compiler::UpsertBatch;
use crate::store::{GraphStore, GraphTxn};

/// What a committed batch touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnOutcome {
    pub nodes: usize,
    pub edges: usize,
}

/// Runs compiled batches. Holds no connection state; the store handle is
/// passed per call.
#[derive(Debug, Clone, Default)]
pub struct TransactionRunner {
    timeout: Option<Duration>,
}

impl TransactionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each transaction; expiry counts as a transient failure.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute `batch` in one transaction. Any failure rolls the whole batch back.
    pub async fn execute<S>(&self, store: &S, batch: &UpsertBatch) -> Result<TxnOutcome, TweetGraphError>
    where
        S: GraphStore + ?Sized,
    {
        batch.validate()?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute_once(store, batch))
                .await
                .map_err(|_| {
                    TweetGraphError::TransientStore(format!(
                        "transaction for post {} exceeded {limit:?}",
                        batch.post_id()
                    ))
                })?,
            None => self.execute_once(store, batch).await,
        }
    }

    async fn execute_once<S>(&self, store: &S, batch: &UpsertBatch) -> Result<TxnOutcome, TweetGraphError>
    where
        S: GraphStore + ?Sized,
    {
        let mut txn = store.begin().await?;

        for op in batch.ops() {
            if let Err(e) = txn.run(op).await {
                rollback_quietly(&mut *txn, batch.post_id()).await;
                return Err(e);
            }
        }

        txn.commit().await?;

        debug!(
            post_id = batch.post_id(),
            nodes = batch.node_count(),
            edges = batch.edge_count(),
            "Batch committed"
        );

        Ok(TxnOutcome {
            nodes: batch.node_count(),
            edges: batch.edge_count(),
        })
    }
}

/// The original failure is what the caller needs; a rollback error is only logged.
async fn rollback_quietly(txn: &mut dyn GraphTxn, post_id: &str) {
    if let Err(e) = txn.rollback().await {
        warn!(post_id, error = %e, "Rollback failed");
    }
}
