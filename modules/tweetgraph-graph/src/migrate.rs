use neo4rs::query;
use tracing::{info, warn};
use tweetgraph_common::{NodeLabel, TweetGraphError};

use crate::store::GraphStore;

/// Ensure the identity constraints exist before any event is accepted.
/// Idempotent; any store failure is a startup failure.
pub async fn ensure_constraints<S>(store: &S) -> Result<(), TweetGraphError>
where
    S: GraphStore + ?Sized,
{
    info!("Ensuring uniqueness constraints...");

    for label in [NodeLabel::Tweet, NodeLabel::User] {
        store.ensure_unique(label).await.map_err(|e| {
            TweetGraphError::StartupFailure(format!("{label}.id uniqueness constraint: {e}"))
        })?;
        info!(label = label.as_str(), "Uniqueness constraint ensured");
    }

    info!("Schema constraints ready");
    Ok(())
}

pub(crate) fn unique_constraint(label: NodeLabel) -> String {
    format!(
        "CREATE CONSTRAINT {}_id_unique IF NOT EXISTS FOR (n:{label}) REQUIRE n.id IS UNIQUE",
        label.as_str().to_lowercase()
    )
}

fn is_already_exists(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("already exists") || msg.contains("equivalent")
}

/// Run a Cypher statement, ignoring errors that indicate the constraint/index already exists.
pub(crate) async fn run_ignoring_exists(
    g: &neo4rs::Graph,
    cypher: &str,
) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) if is_already_exists(&e.to_string()) => {
            warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
            Ok(())
        }
        Err(e) => Err(e),
    }
}
