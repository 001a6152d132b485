//! In-process graph store with MERGE semantics. No database required.
//!
//! Transactions buffer their operations and apply them on commit, so a
//! rolled-back or failed batch leaves no trace. Faults can be injected to
//! exercise retry and skip paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tweetgraph_common::{EdgeUpsert, NodeKey, NodeLabel, Properties, TweetGraphError};

use crate::compiler::UpsertOp;
use crate::store::{GraphStore, GraphTxn};

/// A failure to return from the next `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Permanent,
}

/// Point-in-time copy of the whole graph, comparable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<NodeKey, Properties>,
    pub edges: BTreeSet<EdgeUpsert>,
}

#[derive(Default)]
struct MemoryState {
    graph: GraphSnapshot,
    constraints: BTreeSet<NodeLabel>,
    /// (runs to let through first, fault)
    faults: VecDeque<(usize, Fault)>,
    unreachable: bool,
    ops_run: usize,
    commits: usize,
    rollbacks: usize,
}

/// Shared handle; clones see the same graph.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `begin` and `ensure_unique` fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Queue a fault for the next `run` call on any transaction.
    pub fn inject_fault(&self, fault: Fault) {
        self.inject_fault_after(0, fault);
    }

    /// Queue a fault that fires after `skip` more successful `run` calls.
    pub fn inject_fault_after(&self, skip: usize, fault: Fault) {
        self.lock().faults.push_back((skip, fault));
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.lock().graph.clone()
    }

    pub fn node(&self, key: &NodeKey) -> Option<Properties> {
        self.lock().graph.nodes.get(key).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.lock().graph.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().graph.edges.len()
    }

    pub fn has_edge(&self, edge: &EdgeUpsert) -> bool {
        self.lock().graph.edges.contains(edge)
    }

    pub fn constraints(&self) -> Vec<NodeLabel> {
        self.lock().constraints.iter().copied().collect()
    }

    /// Operations accepted by `run`, committed or not.
    pub fn ops_run(&self) -> usize {
        self.lock().ops_run
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }
}

fn unreachable_error() -> TweetGraphError {
    TweetGraphError::TransientStore("connection refused".to_string())
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, TweetGraphError> {
        if self.lock().unreachable {
            return Err(unreachable_error());
        }
        Ok(Box::new(MemoryTxn {
            store: self.clone(),
            pending: Vec::new(),
            open: true,
        }))
    }

    async fn ensure_unique(&self, label: NodeLabel) -> Result<(), TweetGraphError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(unreachable_error());
        }
        state.constraints.insert(label);
        Ok(())
    }
}

fn next_fault(faults: &mut VecDeque<(usize, Fault)>) -> Option<Fault> {
    let (skip, _) = faults.front_mut()?;
    if *skip > 0 {
        *skip -= 1;
        return None;
    }
    faults.pop_front().map(|(_, fault)| fault)
}

struct MemoryTxn {
    store: MemoryGraph,
    pending: Vec<UpsertOp>,
    open: bool,
}

impl MemoryTxn {
    fn ensure_open(&self) -> Result<(), TweetGraphError> {
        if self.open {
            Ok(())
        } else {
            Err(TweetGraphError::PermanentStore("transaction already closed".to_string()))
        }
    }

    /// MATCH semantics: the endpoint must be committed or merged earlier in
    /// this transaction.
    fn endpoint_exists(&self, state: &MemoryState, key: &NodeKey) -> bool {
        state.graph.nodes.contains_key(key)
            || self
                .pending
                .iter()
                .any(|op| matches!(op, UpsertOp::MergeNode { key: k, .. } if k == key))
    }
}

#[async_trait]
impl GraphTxn for MemoryTxn {
    async fn run(&mut self, op: &UpsertOp) -> Result<(), TweetGraphError> {
        self.ensure_open()?;
        let mut state = self.store.lock();

        if let Some(fault) = next_fault(&mut state.faults) {
            return Err(match fault {
                Fault::Transient => TweetGraphError::TransientStore(
                    "Neo.TransientError.Transaction.DeadlockDetected (injected)".to_string(),
                ),
                Fault::Permanent => TweetGraphError::PermanentStore(
                    "Neo.ClientError.Schema.ConstraintValidationFailed (injected)".to_string(),
                ),
            });
        }

        if let UpsertOp::MergeEdge(edge) = op {
            for endpoint in [&edge.from, &edge.to] {
                if !self.endpoint_exists(&state, endpoint) {
                    return Err(TweetGraphError::PermanentStore(format!(
                        "{} edge endpoint {endpoint} does not exist",
                        edge.kind
                    )));
                }
            }
        }

        state.ops_run += 1;
        drop(state);
        self.pending.push(op.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TweetGraphError> {
        self.ensure_open()?;
        self.open = false;

        let mut state = self.store.lock();
        for op in self.pending.drain(..) {
            match op {
                UpsertOp::MergeNode { key, props } => {
                    // Only supplied attributes are written; stored ones survive.
                    state.graph.nodes.entry(key).or_default().extend(props);
                }
                UpsertOp::MergeEdge(edge) => {
                    state.graph.edges.insert(edge);
                }
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TweetGraphError> {
        self.ensure_open()?;
        self.open = false;
        self.pending.clear();
        self.store.lock().rollbacks += 1;
        Ok(())
    }
}
