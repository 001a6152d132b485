//! Merge engine against a real Neo4j.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p tweetgraph-graph --features test-utils --test neo4j_merge_test

#![cfg(feature = "test-utils")]

use serde_json::{json, Value};
use tweetgraph_common::map_post;
use tweetgraph_graph::{compile, ensure_constraints, query, GraphClient, TransactionRunner};

async fn setup() -> (impl std::any::Any, GraphClient) {
    let (container, client) = tweetgraph_graph::testutil::neo4j_container().await;
    ensure_constraints(&client).await.expect("constraints");
    (container, client)
}

async fn apply(client: &GraphClient, payload: &Value) {
    let batch = compile(&map_post(payload).expect("map"));
    TransactionRunner::new()
        .execute(client, &batch)
        .await
        .expect("execute");
}

async fn count(client: &GraphClient, cypher: &str) -> i64 {
    let mut stream = client.inner().execute(query(cypher)).await.expect("query failed");
    let row = stream.next().await.expect("stream failed").expect("no row");
    row.get::<i64>("n").expect("n")
}

async fn read_str(client: &GraphClient, label: &str, id: &str, prop: &str) -> Option<String> {
    let cypher = format!("MATCH (n:{label} {{id: $id}}) RETURN n.{prop} AS val");
    let mut stream = client
        .inner()
        .execute(query(&cypher).param("id", id))
        .await
        .expect("query failed");
    let row = stream.next().await.expect("stream failed")?;
    row.get::<Option<String>>("val").ok().flatten()
}

fn scenario_one() -> Value {
    json!({
        "id": "1", "text": "hi",
        "user": {"id": "u1", "screen_name": "a"},
        "entities": {"mentions": []}
    })
}

#[tokio::test]
async fn scenarios_build_the_expected_graph() {
    let (_container, client) = setup().await;

    apply(&client, &scenario_one()).await;
    apply(
        &client,
        &json!({
            "id": "2", "text": "@a hello",
            "user": {"id": "u2", "screen_name": "b"},
            "in_reply_to_status_id": "1", "in_reply_to_user_id": "u1"
        }),
    )
    .await;
    apply(
        &client,
        &json!({
            "id": "3", "text": "RT @a: hi",
            "user": {"id": "u3", "screen_name": "c"},
            "retweeted_status": scenario_one()
        }),
    )
    .await;

    assert_eq!(count(&client, "MATCH (t:Tweet) RETURN count(t) AS n").await, 3);
    assert_eq!(count(&client, "MATCH (u:User) RETURN count(u) AS n").await, 3);
    assert_eq!(
        count(&client, "MATCH (:User {id: 'u1'})-[r:POSTED]->(:Tweet {id: '1'}) RETURN count(r) AS n").await,
        1
    );
    assert_eq!(
        count(&client, "MATCH (:Tweet {id: '2'})-[r:REPLIED_TO]->(:Tweet {id: '1'}) RETURN count(r) AS n").await,
        1
    );
    assert_eq!(
        count(&client, "MATCH (:Tweet {id: '3'})-[r:RETWEETED]->(:Tweet {id: '1'}) RETURN count(r) AS n").await,
        1
    );
    assert_eq!(read_str(&client, "Tweet", "1", "text").await.as_deref(), Some("hi"));
    assert_eq!(read_str(&client, "User", "u1", "username").await.as_deref(), Some("a"));
}

#[tokio::test]
async fn replaying_an_event_changes_nothing() {
    let (_container, client) = setup().await;

    apply(&client, &scenario_one()).await;
    apply(&client, &scenario_one()).await;

    assert_eq!(count(&client, "MATCH (n) RETURN count(n) AS n").await, 2);
    assert_eq!(count(&client, "MATCH ()-[r]->() RETURN count(r) AS n").await, 1);
}

#[tokio::test]
async fn mention_stub_does_not_erase_profile() {
    let (_container, client) = setup().await;

    apply(
        &client,
        &json!({
            "id": "10", "user": {"id": "u2", "name": "Bee", "screen_name": "b", "location": "Here"}
        }),
    )
    .await;
    apply(
        &client,
        &json!({
            "id": "11", "user": {"id": "u1"},
            "entities": {"mentions": [{"id": "u2", "screen_name": "b"}]}
        }),
    )
    .await;

    assert_eq!(read_str(&client, "User", "u2", "location").await.as_deref(), Some("Here"));
    assert_eq!(read_str(&client, "User", "u2", "name").await.as_deref(), Some("Bee"));
}

#[tokio::test]
async fn constraints_survive_a_second_startup() {
    let (_container, client) = setup().await;
    ensure_constraints(&client).await.expect("second run");
}
