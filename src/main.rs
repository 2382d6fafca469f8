use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod config;
mod diff;
mod error;
mod files;
mod llm;
mod protocol;
mod pty;
mod recording;
mod replay;
mod server;
mod session;
mod transcript;

use config::{Cli, Settings};
use files::RealFs;
use pty::NativeSpawner;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let settings = Arc::new(Settings::from_cli(Cli::parse())?);
    let state = AppState::new(settings.clone(), Arc::new(NativeSpawner), Arc::new(RealFs));
    state.registry.store().ensure_dir()?;

    let shutdown = CancellationToken::new();
    let reaper = state.spawn_reaper(shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;
    tracing::info!(
        addr = %settings.bind_addr,
        root = %settings.root.display(),
        recordings = %state.registry.store().dir().display(),
        "Server listening"
    );

    // Recordings of live sessions are left open: they load as interrupted.
    let signal = shutdown.clone();
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = reaper.await;
    Ok(())
}
