//! Proposal server binary
//!
//! Run with: cargo run -p proposal-rag --bin proposal-rag-server

use proposal_rag::{config::RagConfig, server::ProposalServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proposal_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RagConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Classifier model: {}", config.llm.generate_model);
    tracing::info!("  - Embedding backend: {:?} ({} dims)", config.embeddings.backend, config.embeddings.dimensions);
    tracing::info!("  - Batch size: {}, workers: {}", config.batch.batch_size, config.batch.workers());
    tracing::info!("  - Upload dir: {}", config.storage.upload_dir.display());

    let server = ProposalServer::new(config)?;

    match server.state().pipeline().classifier().health_check().await {
        Ok(true) => tracing::info!("Classifier is reachable"),
        _ => tracing::warn!(
            "Classifier not reachable; section identification will fail until it is"
        ),
    }

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
