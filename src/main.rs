mod chunk;
mod core;
mod crawl;
mod embed;
mod ingest;
mod llm;
mod parse;
mod rag;
mod server;
mod state;
mod store;
mod tokenizer;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    core::logging::init(&state.paths);

    let bind_addr = format!("0.0.0.0:{}", state.settings.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let app = server::router::router(state.clone());
    let ingest = state.ingest.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down; cancelling in-flight ingestion jobs");
            ingest.shutdown();
        })
        .await
        .context("Server error")?;

    Ok(())
}
