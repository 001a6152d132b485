pub mod client;
pub mod compiler;
pub mod memory;
pub mod migrate;
pub mod runner;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use compiler::{compile, CypherStatement, UpsertBatch, UpsertOp};
pub use memory::{Fault, GraphSnapshot, MemoryGraph};
pub use migrate::ensure_constraints;
pub use runner::{TransactionRunner, TxnOutcome};
pub use store::{classify_store_error, GraphStore, GraphTxn};

pub use neo4rs::query;
