use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query, Txn};
use tweetgraph_common::{NodeLabel, PropertyValue, TweetGraphError};

use crate::compiler::UpsertOp;
use crate::migrate::{run_ignoring_exists, unique_constraint};
use crate::store::{classify_store_error, GraphStore, GraphTxn};

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

fn store_error(e: neo4rs::Error) -> TweetGraphError {
    classify_store_error(&e.to_string())
}

/// Build the neo4rs query for one compiled operation.
pub fn to_query(op: &UpsertOp) -> Query {
    let stmt = op.cypher();
    stmt.params
        .into_iter()
        .fold(query(&stmt.text), |q, (key, value)| match value {
            PropertyValue::Text(s) => q.param(&key, s),
            PropertyValue::Int(n) => q.param(&key, n),
        })
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, TweetGraphError> {
        let txn = self.graph.start_txn().await.map_err(store_error)?;
        Ok(Box::new(Neo4jTxn { txn: Some(txn) }))
    }

    async fn ensure_unique(&self, label: NodeLabel) -> Result<(), TweetGraphError> {
        run_ignoring_exists(&self.graph, &unique_constraint(label))
            .await
            .map_err(store_error)
    }
}

/// Bolt transaction. `None` once committed or rolled back.
struct Neo4jTxn {
    txn: Option<Txn>,
}

impl Neo4jTxn {
    fn closed() -> TweetGraphError {
        TweetGraphError::PermanentStore("transaction already closed".to_string())
    }
}

#[async_trait]
impl GraphTxn for Neo4jTxn {
    async fn run(&mut self, op: &UpsertOp) -> Result<(), TweetGraphError> {
        let txn = self.txn.as_mut().ok_or_else(Self::closed)?;
        txn.run(to_query(op)).await.map_err(store_error)
    }

    async fn commit(&mut self) -> Result<(), TweetGraphError> {
        let txn = self.txn.take().ok_or_else(Self::closed)?;
        txn.commit().await.map_err(store_error)
    }

    async fn rollback(&mut self) -> Result<(), TweetGraphError> {
        let txn = self.txn.take().ok_or_else(Self::closed)?;
        txn.rollback().await.map_err(store_error)
    }
}
