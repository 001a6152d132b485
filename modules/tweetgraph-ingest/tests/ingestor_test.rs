//! Ingestion loop tests.
//!
//! Drive the loop against the in-memory graph store: termination reasons,
//! retry and skip paths, dead letters and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{watch, Notify};
use tweetgraph_common::{EdgeUpsert, NodeKey, NodeLabel, TweetGraphError};
use tweetgraph_graph::{Fault, GraphStore, GraphTxn, MemoryGraph, UpsertOp};
use tweetgraph_ingest::{
    IngestConfig, Ingestor, LoopState, MemoryDeadLetters, StopReason, VecSource,
};

fn fast_config() -> IngestConfig {
    IngestConfig {
        retry_delay: Duration::from_millis(1),
        ..IngestConfig::default()
    }
}

fn post(id: &str, user: &str) -> Value {
    json!({
        "id": id,
        "text": format!("post {id}"),
        "user": {"id": user, "screen_name": format!("user_{user}")}
    })
}

#[tokio::test]
async fn drains_source_and_builds_graph() {
    let graph = MemoryGraph::new();
    let source = VecSource::new([
        post("1", "u1"),
        json!({
            "id": "2", "text": "@user_u1 hello",
            "user": {"id": "u2", "screen_name": "user_u2"},
            "in_reply_to_status_id": "1", "in_reply_to_user_id": "u1"
        }),
    ]);

    let report = Ingestor::new(graph.clone(), source, fast_config())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.stats.received, 2);
    assert_eq!(report.stats.applied, 2);
    assert_eq!(report.stats.dropped, 0);
    assert_eq!(
        report.states,
        vec![
            LoopState::Starting,
            LoopState::Running,
            LoopState::Stopping,
            LoopState::Stopped
        ]
    );
    assert_eq!(graph.constraints(), vec![NodeLabel::Tweet, NodeLabel::User]);
    assert!(graph.has_edge(&EdgeUpsert::replied_to("2", "1")));
    assert_eq!(graph.commits(), 2);
}

#[tokio::test]
async fn stops_at_max_events() {
    let graph = MemoryGraph::new();
    let source = VecSource::new((1..=5).map(|i| post(&i.to_string(), "u1")));
    let config = IngestConfig {
        max_events: Some(3),
        ..fast_config()
    };

    let report = Ingestor::new(graph.clone(), source, config).run().await.unwrap();

    assert_eq!(report.stop_reason, StopReason::MaxEvents);
    assert_eq!(report.stats.received, 3);
    assert!(graph.node(&NodeKey::tweet("3")).is_some());
    assert!(graph.node(&NodeKey::tweet("4")).is_none());
}

#[tokio::test]
async fn max_events_of_zero_processes_nothing() {
    let graph = MemoryGraph::new();
    let config = IngestConfig {
        max_events: Some(0),
        ..fast_config()
    };

    let report = Ingestor::new(graph.clone(), VecSource::new([post("1", "u1")]), config)
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::MaxEvents);
    assert_eq!(report.stats.received, 0);
    assert_eq!(graph.node_count(), 0);
}

#[tokio::test]
async fn malformed_event_is_skipped_and_reported() {
    let graph = MemoryGraph::new();
    let dead = MemoryDeadLetters::new();
    let source = VecSource::new([
        json!({"id": "9", "text": "no author"}),
        json!("not even an object"),
        post("10", "u1"),
    ]);

    let report = Ingestor::new(graph.clone(), source, fast_config())
        .with_dead_letters(dead.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.received, 3);
    assert_eq!(report.stats.malformed, 2);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.stats.dropped, 2);
    assert_eq!(graph.node(&NodeKey::tweet("9")), None);
    assert!(graph.node(&NodeKey::tweet("10")).is_some());

    let letters = dead.letters();
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0].post_id.as_deref(), Some("9"));
    assert_eq!(letters[0].kind, "malformed_payload");
    assert_eq!(letters[0].attempts, 0);
    assert_eq!(letters[0].run_id, report.run_id);
    assert_eq!(letters[1].post_id, None);
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let graph = MemoryGraph::new();
    graph.inject_fault(Fault::Transient);

    let report = Ingestor::new(graph.clone(), VecSource::new([post("1", "u1")]), fast_config())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.retries, 1);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.stats.dropped, 0);
    assert_eq!(graph.rollbacks(), 1);
    assert_eq!(graph.commits(), 1);
    assert!(graph.has_edge(&EdgeUpsert::posted("u1", "1")));
}

#[tokio::test]
async fn second_transient_failure_drops_event() {
    let graph = MemoryGraph::new();
    let dead = MemoryDeadLetters::new();
    graph.inject_fault(Fault::Transient);
    graph.inject_fault(Fault::Transient);

    let report = Ingestor::new(
        graph.clone(),
        VecSource::new([post("1", "u1"), post("2", "u2")]),
        fast_config(),
    )
    .with_dead_letters(dead.clone())
    .run()
    .await
    .unwrap();

    assert_eq!(report.stats.retries, 1);
    assert_eq!(report.stats.transient_failures, 1);
    assert_eq!(report.stats.dropped, 1);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(graph.node(&NodeKey::tweet("1")), None);
    assert!(graph.node(&NodeKey::tweet("2")).is_some());

    let letters = dead.letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].kind, "transient_store_error");
    assert_eq!(letters[0].attempts, 2);
    assert_eq!(letters[0].payload, post("1", "u1"));
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let graph = MemoryGraph::new();
    let dead = MemoryDeadLetters::new();
    // Fails the edge after both nodes were merged; nothing may persist.
    graph.inject_fault_after(2, Fault::Permanent);

    let report = Ingestor::new(graph.clone(), VecSource::new([post("1", "u1")]), fast_config())
        .with_dead_letters(dead.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.retries, 0);
    assert_eq!(report.stats.permanent_failures, 1);
    assert_eq!(report.stats.dropped, 1);
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.commits(), 0);
    assert_eq!(dead.letters()[0].attempts, 1);
    assert_eq!(dead.letters()[0].post_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn stream_error_stops_gracefully() {
    let graph = MemoryGraph::new();
    let source = VecSource::new([post("1", "u1")]).then_fail("rate limited");

    let report = Ingestor::new(graph.clone(), source, fast_config())
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.stop_reason,
        StopReason::StreamError(
            TweetGraphError::StreamTerminated("rate limited".into()).to_string()
        )
    );
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.states.last(), Some(&LoopState::Stopped));
}

#[tokio::test]
async fn shutdown_interrupts_idle_stream() {
    let graph = MemoryGraph::new();
    let (tx, rx) = watch::channel(false);
    let source = VecSource::new([post("1", "u1"), post("2", "u1")]).then_hang();

    let ingestor = Ingestor::new(graph.clone(), source, fast_config()).with_shutdown(rx);
    let signal = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    };

    let (report, ()) = tokio::join!(ingestor.run(), signal);
    let report = report.unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.stats.received, 2);
    assert_eq!(report.stats.applied, 2);
}

/// Delays every commit and announces when one has started.
#[derive(Clone)]
struct SlowCommitGraph {
    inner: MemoryGraph,
    delay: Duration,
    committing: Arc<Notify>,
}

struct SlowCommitTxn {
    inner: Box<dyn GraphTxn>,
    delay: Duration,
    committing: Arc<Notify>,
}

#[async_trait]
impl GraphStore for SlowCommitGraph {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, TweetGraphError> {
        Ok(Box::new(SlowCommitTxn {
            inner: self.inner.begin().await?,
            delay: self.delay,
            committing: self.committing.clone(),
        }))
    }

    async fn ensure_unique(&self, label: NodeLabel) -> Result<(), TweetGraphError> {
        self.inner.ensure_unique(label).await
    }
}

#[async_trait]
impl GraphTxn for SlowCommitTxn {
    async fn run(&mut self, op: &UpsertOp) -> Result<(), TweetGraphError> {
        self.inner.run(op).await
    }

    async fn commit(&mut self) -> Result<(), TweetGraphError> {
        self.committing.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), TweetGraphError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn shutdown_lets_in_flight_transaction_commit() {
    let graph = MemoryGraph::new();
    let committing = Arc::new(Notify::new());
    let store = SlowCommitGraph {
        inner: graph.clone(),
        delay: Duration::from_millis(100),
        committing: committing.clone(),
    };
    let (tx, rx) = watch::channel(false);
    let source = VecSource::new([post("1", "u1"), post("2", "u1")]).then_hang();

    let ingestor = Ingestor::new(store, source, fast_config()).with_shutdown(rx);
    let signal = async {
        committing.notified().await;
        tx.send(true).unwrap();
    };

    let (report, ()) = tokio::join!(ingestor.run(), signal);
    let report = report.unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.stats.received, 1);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.stats.dropped, 0);
    assert!(graph.node(&NodeKey::tweet("1")).is_some());
    assert!(graph.has_edge(&EdgeUpsert::posted("u1", "1")));
    assert!(graph.node(&NodeKey::tweet("2")).is_none());
    assert_eq!(graph.commits(), 1);
    assert_eq!(graph.rollbacks(), 0);
}

#[tokio::test]
async fn shutdown_before_start_processes_nothing() {
    let graph = MemoryGraph::new();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = Ingestor::new(graph.clone(), VecSource::new([post("1", "u1")]), fast_config())
        .with_shutdown(rx)
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.stats.received, 0);
}

#[tokio::test]
async fn unreachable_store_fails_startup() {
    let graph = MemoryGraph::new();
    graph.set_unreachable(true);

    let err = Ingestor::new(graph.clone(), VecSource::new([post("1", "u1")]), fast_config())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "startup_failure");
    assert_eq!(graph.ops_run(), 0);
}

#[tokio::test]
async fn replayed_stream_leaves_graph_unchanged() {
    let graph = MemoryGraph::new();
    let events = vec![
        post("1", "u1"),
        json!({
            "id": "3", "text": "RT",
            "user": {"id": "u3", "screen_name": "c"},
            "retweeted_status": post("1", "u1")
        }),
    ];

    Ingestor::new(graph.clone(), VecSource::new(events.clone()), fast_config())
        .run()
        .await
        .unwrap();
    let first = graph.snapshot();

    Ingestor::new(graph.clone(), VecSource::new(events), fast_config())
        .run()
        .await
        .unwrap();

    assert_eq!(graph.snapshot(), first);
}
