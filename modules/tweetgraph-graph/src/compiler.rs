//! Upsert compiler. Turns a normalized `GraphDelta` into an ordered batch of
//! idempotent MERGE operations.
//!
//! Ordering: every node upsert precedes every edge upsert, so an aborted
//! batch can never leave an edge without its endpoints. Nodes seen more than
//! once in a delta collapse into a single upsert; duplicate edges collapse too.

use std::collections::{HashMap, HashSet};

use tweetgraph_common::{EdgeUpsert, GraphDelta, NodeKey, Properties, PropertyValue, TweetGraphError};

/// One idempotent store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOp {
    /// Merge by identity key; set only the supplied attributes.
    MergeNode { key: NodeKey, props: Properties },
    /// Merge by (type, from, to); never creates a parallel edge.
    MergeEdge(EdgeUpsert),
}

/// Parameterised Cypher for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CypherStatement {
    pub text: String,
    pub params: Vec<(String, PropertyValue)>,
}

impl UpsertOp {
    pub fn is_node(&self) -> bool {
        matches!(self, UpsertOp::MergeNode { .. })
    }

    /// Render as a parameterised Cypher statement. Property names are the
    /// fixed attribute names of `TweetNode` / `UserNode`.
    pub fn cypher(&self) -> CypherStatement {
        match self {
            UpsertOp::MergeNode { key, props } => {
                let mut text = format!("MERGE (n:{} {{id: $id}})", key.label);
                let mut params = vec![("id".to_string(), PropertyValue::Text(key.id.clone()))];

                if !props.is_empty() {
                    let assignments: Vec<String> = props
                        .keys()
                        .map(|k| format!("n.{k} = ${k}"))
                        .collect();
                    text.push_str(" SET ");
                    text.push_str(&assignments.join(", "));
                    params.extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
                }

                CypherStatement { text, params }
            }
            UpsertOp::MergeEdge(edge) => CypherStatement {
                text: format!(
                    "MATCH (a:{} {{id: $from}}) MATCH (b:{} {{id: $to}}) MERGE (a)-[:{}]->(b)",
                    edge.from.label,
                    edge.to.label,
                    edge.kind.rel_type()
                ),
                params: vec![
                    ("from".to_string(), PropertyValue::Text(edge.from.id.clone())),
                    ("to".to_string(), PropertyValue::Text(edge.to.id.clone())),
                ],
            },
        }
    }
}

/// Ordered operations for one event, executed as one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertBatch {
    post_id: String,
    ops: Vec<UpsertOp>,
}

impl UpsertBatch {
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn ops(&self) -> &[UpsertOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_node()).count()
    }

    pub fn edge_count(&self) -> usize {
        self.ops.len() - self.node_count()
    }

    /// Check that every edge's endpoints are upserted earlier in the batch.
    pub fn validate(&self) -> Result<(), TweetGraphError> {
        let mut seen: HashSet<&NodeKey> = HashSet::new();
        for op in &self.ops {
            match op {
                UpsertOp::MergeNode { key, .. } => {
                    seen.insert(key);
                }
                UpsertOp::MergeEdge(edge) => {
                    for endpoint in [&edge.from, &edge.to] {
                        if !seen.contains(endpoint) {
                            return Err(TweetGraphError::PermanentStore(format!(
                                "post {}: {} edge references {endpoint} before its upsert",
                                self.post_id, edge.kind
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Nodes in first-seen order, coalescing repeats.
#[derive(Default)]
struct NodeSet {
    order: Vec<NodeKey>,
    props: HashMap<NodeKey, Properties>,
}

impl NodeSet {
    /// First non-null value per attribute wins.
    fn add(&mut self, key: NodeKey, props: Properties) {
        match self.props.get_mut(&key) {
            Some(existing) => {
                for (k, v) in props {
                    existing.entry(k).or_insert(v);
                }
            }
            None => {
                self.order.push(key.clone());
                self.props.insert(key, props);
            }
        }
    }

    fn into_ops(mut self) -> impl Iterator<Item = UpsertOp> {
        let order = std::mem::take(&mut self.order);
        order.into_iter().map(move |key| {
            let props = self.props.remove(&key).unwrap_or_default();
            UpsertOp::MergeNode { key, props }
        })
    }
}

/// Compile a delta into an ordered, duplicate-free batch.
pub fn compile(delta: &GraphDelta) -> UpsertBatch {
    let mut nodes = NodeSet::default();
    for tweet in &delta.tweets {
        nodes.add(tweet.key(), tweet.properties());
    }
    for user in &delta.users {
        nodes.add(user.key(), user.properties());
    }

    let mut edges: Vec<EdgeUpsert> = Vec::with_capacity(delta.edges.len());
    let mut seen_edges: HashSet<&EdgeUpsert> = HashSet::new();
    for edge in &delta.edges {
        if !seen_edges.insert(edge) {
            continue;
        }
        // An endpoint the delta never described still gets an identity-only
        // upsert so the edge cannot dangle.
        nodes.add(edge.from.clone(), Properties::new());
        nodes.add(edge.to.clone(), Properties::new());
        edges.push(edge.clone());
    }

    let ops = nodes
        .into_ops()
        .chain(edges.into_iter().map(UpsertOp::MergeEdge))
        .collect();

    UpsertBatch {
        post_id: delta.post_id.clone(),
        ops,
    }
}
