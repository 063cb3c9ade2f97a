//! Conductor server binary.

use std::net::SocketAddr;

use clap::Parser;
use conductor_engine::DispatchEngine;
use conductor_server::{app, ServerConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::parse();
    let engine = DispatchEngine::new(config.engine_config());
    let handle = engine.start();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, max_concurrent = config.max_concurrent, "conductor listening");

    axum::serve(listener, app(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.stop().await;
    tracing::info!("conductor stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
