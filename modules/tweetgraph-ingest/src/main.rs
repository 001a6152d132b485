use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tweetgraph_common::{Config, TweetGraphError};
use tweetgraph_graph::GraphClient;
use tweetgraph_ingest::{IngestConfig, Ingestor, JsonlDeadLetters, JsonlSource};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tweetgraph=info".parse()?))
        .init();

    info!("Tweetgraph ingest starting...");

    let config = Config::from_env()?;
    config.log_redacted();

    let client = GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
        .await
        .map_err(|e| {
            TweetGraphError::StartupFailure(format!("cannot reach Neo4j at {}: {e}", config.neo4j_uri))
        })?;

    let source = JsonlSource::open(&config.input, config.stream_filter.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, finishing the event in flight");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });

    let mut ingestor =
        Ingestor::new(client, source, IngestConfig::from(&config)).with_shutdown(shutdown_rx);
    if let Some(path) = &config.dead_letter_path {
        ingestor = ingestor.with_dead_letters(JsonlDeadLetters::open(path).await?);
    }

    let report = ingestor.run().await?;

    info!(
        run_id = report.run_id.as_str(),
        reason = ?report.stop_reason,
        stats = ?report.stats,
        "Tweetgraph ingest finished"
    );

    Ok(())
}
