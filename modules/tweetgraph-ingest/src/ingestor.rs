//! Ingestion loop.
//!
//! Pulls posts from a [`PostSource`], maps and compiles each into one batch,
//! and applies it through the [`TransactionRunner`]. One event is in flight
//! at a time. Bad events are skipped and reported; the loop only stops on
//! the event limit, end of stream, shutdown, or a stream error.
//!
//! ```text
//! STARTING ──constraints ok──▶ RUNNING ──limit / EOS / shutdown / stream error──▶ STOPPING ──▶ STOPPED
//!     └──store unreachable──▶ FAILED ──▶ STOPPED
//! ```

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tweetgraph_common::{map_post, Config, TweetGraphError};
use tweetgraph_graph::{compile, ensure_constraints, GraphStore, TransactionRunner};
use uuid::Uuid;

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::source::PostSource;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Stop after this many received events.
    pub max_events: Option<u64>,
    /// Pause before the single retry of a transient failure.
    pub retry_delay: Duration,
    pub txn_timeout: Option<Duration>,
    /// Log progress every N received events; 0 disables.
    pub progress_interval: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_events: None,
            retry_delay: Duration::from_millis(500),
            txn_timeout: None,
            progress_interval: 100,
        }
    }
}

impl From<&Config> for IngestConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_events: config.max_events,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            txn_timeout: config.txn_timeout_secs.map(Duration::from_secs),
            progress_interval: config.progress_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Stopping,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    MaxEvents,
    EndOfStream,
    Shutdown,
    StreamError(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub applied: u64,
    pub malformed: u64,
    pub permanent_failures: u64,
    /// Events whose retry also failed transiently.
    pub transient_failures: u64,
    pub retries: u64,
    /// Every event not applied, whatever the cause.
    pub dropped: u64,
    pub nodes_touched: u64,
    pub edges_touched: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub stats: IngestStats,
    /// Every state the loop passed through, in order.
    pub states: Vec<LoopState>,
}

pub struct Ingestor<G, P> {
    store: G,
    source: P,
    config: IngestConfig,
    runner: TransactionRunner,
    shutdown: Option<watch::Receiver<bool>>,
    dead_letters: Option<Box<dyn DeadLetterSink>>,
    run_id: String,
    stats: IngestStats,
    states: Vec<LoopState>,
}

impl<G: GraphStore, P: PostSource> Ingestor<G, P> {
    pub fn new(store: G, source: P, config: IngestConfig) -> Self {
        let runner = TransactionRunner::new().with_timeout(config.txn_timeout);
        Self {
            store,
            source,
            config,
            runner,
            shutdown: None,
            dead_letters: None,
            run_id: Uuid::new_v4().to_string(),
            stats: IngestStats::default(),
            states: vec![LoopState::Starting],
        }
    }

    /// Stop once `true` is sent. The event in flight is finished first.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_dead_letters(mut self, sink: impl DeadLetterSink + 'static) -> Self {
        self.dead_letters = Some(Box::new(sink));
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> LoopState {
        self.states.last().copied().unwrap_or(LoopState::Starting)
    }

    fn transition(&mut self, next: LoopState) {
        debug!(run_id = %self.run_id, from = ?self.state(), to = ?next, "State transition");
        self.states.push(next);
    }

    /// Run to completion. Errors only when startup fails; every later
    /// failure is per-event and ends up in the report.
    pub async fn run(mut self) -> Result<RunReport, TweetGraphError> {
        info!(run_id = %self.run_id, source = self.source.name(), "Ingestion starting");

        if let Err(e) = ensure_constraints(&self.store).await {
            error!(run_id = %self.run_id, error = %e, "Startup failed");
            self.transition(LoopState::Failed);
            self.transition(LoopState::Stopped);
            return Err(e);
        }
        self.transition(LoopState::Running);

        let stop_reason = self.event_loop().await;

        self.transition(LoopState::Stopping);
        info!(
            run_id = %self.run_id,
            reason = ?stop_reason,
            received = self.stats.received,
            applied = self.stats.applied,
            dropped = self.stats.dropped,
            retries = self.stats.retries,
            nodes = self.stats.nodes_touched,
            edges = self.stats.edges_touched,
            "Ingestion stopped"
        );
        self.transition(LoopState::Stopped);

        Ok(RunReport {
            run_id: self.run_id,
            stop_reason,
            stats: self.stats,
            states: self.states,
        })
    }

    async fn event_loop(&mut self) -> StopReason {
        loop {
            if self
                .config
                .max_events
                .is_some_and(|max| self.stats.received >= max)
            {
                return StopReason::MaxEvents;
            }
            if self.shutdown_requested() {
                return StopReason::Shutdown;
            }

            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return StopReason::Shutdown,
                next = self.source.next_post() => next,
            };

            let payload = match next {
                Ok(Some(payload)) => payload,
                Ok(None) => return StopReason::EndOfStream,
                Err(e) => {
                    warn!(run_id = %self.run_id, error = %e, "Post stream ended with an error");
                    return StopReason::StreamError(e.to_string());
                }
            };

            self.stats.received += 1;
            self.process(payload).await;

            let interval = self.config.progress_interval;
            if interval > 0 && self.stats.received % interval == 0 {
                info!(
                    run_id = %self.run_id,
                    received = self.stats.received,
                    applied = self.stats.applied,
                    dropped = self.stats.dropped,
                    "Ingestion progress"
                );
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Map, compile and apply one event, retrying a transient failure once.
    async fn process(&mut self, payload: Value) {
        let delta = match map_post(&payload) {
            Ok(delta) => delta,
            Err(e) => {
                let post_id = match &e {
                    TweetGraphError::MalformedPayload { post_id, .. } => post_id.clone(),
                    _ => None,
                };
                warn!(run_id = %self.run_id, post_id = ?post_id, error = %e, "Skipping malformed post");
                self.stats.malformed += 1;
                self.drop_event(post_id, &e, 0, payload).await;
                return;
            }
        };

        let batch = compile(&delta);
        let mut attempts = 1;
        let mut result = self.runner.execute(&self.store, &batch).await;

        if let Err(e) = &result {
            if e.is_retryable() {
                warn!(
                    run_id = %self.run_id,
                    post_id = batch.post_id(),
                    error = %e,
                    delay_ms = self.config.retry_delay.as_millis() as u64,
                    "Transient store failure, retrying once"
                );
                self.stats.retries += 1;
                tokio::time::sleep(self.config.retry_delay).await;
                attempts += 1;
                result = self.runner.execute(&self.store, &batch).await;
            }
        }

        match result {
            Ok(outcome) => {
                self.stats.applied += 1;
                self.stats.nodes_touched += outcome.nodes as u64;
                self.stats.edges_touched += outcome.edges as u64;
                debug!(
                    run_id = %self.run_id,
                    post_id = batch.post_id(),
                    kind = delta.kind.as_str(),
                    nodes = outcome.nodes,
                    edges = outcome.edges,
                    attempts,
                    "Post applied"
                );
            }
            Err(e) => {
                if e.is_retryable() {
                    self.stats.transient_failures += 1;
                } else {
                    self.stats.permanent_failures += 1;
                }
                warn!(
                    run_id = %self.run_id,
                    post_id = batch.post_id(),
                    attempts,
                    kind = e.kind(),
                    error = %e,
                    "Dropping post"
                );
                self.drop_event(Some(batch.post_id().to_string()), &e, attempts, payload)
                    .await;
            }
        }
    }

    async fn drop_event(
        &mut self,
        post_id: Option<String>,
        error: &TweetGraphError,
        attempts: u32,
        payload: Value,
    ) {
        self.stats.dropped += 1;
        let Some(sink) = self.dead_letters.as_mut() else {
            return;
        };
        let letter = DeadLetter::new(&self.run_id, post_id, error, attempts, payload);
        if let Err(e) = sink.record(letter).await {
            error!(run_id = %self.run_id, error = %e, "Failed to record dead letter");
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves without a receiver
/// or after the sender is dropped.
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown.as_mut() else {
        return std::future::pending().await;
    };
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_values() {
        let config = Config::from_lookup(|key| match key {
            "NEO4J_URI" => Some("bolt://localhost:7687".into()),
            "NEO4J_USER" => Some("neo4j".into()),
            "NEO4J_PASSWORD" => Some("secret".into()),
            "INGEST_MAX_EVENTS" => Some("10".into()),
            "INGEST_TXN_TIMEOUT_SECS" => Some("5".into()),
            _ => None,
        })
        .unwrap();

        let ingest = IngestConfig::from(&config);
        assert_eq!(ingest.max_events, Some(10));
        assert_eq!(ingest.retry_delay, Duration::from_millis(500));
        assert_eq!(ingest.txn_timeout, Some(Duration::from_secs(5)));
        assert_eq!(ingest.progress_interval, 100);
    }

    #[tokio::test]
    async fn shutdown_wait_ignores_dropped_sender() {
        let (tx, rx) = watch::channel(false);
        let mut shutdown = Some(rx);
        drop(tx);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), wait_for_shutdown(&mut shutdown)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_on_signal() {
        let (tx, rx) = watch::channel(false);
        let mut shutdown = Some(rx);
        tx.send(true).unwrap();
        wait_for_shutdown(&mut shutdown).await;
    }
}
