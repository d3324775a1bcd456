//! Ferry command-line uploader.
//!
//! Sends every named file to a receiver over one shared connection and
//! waits for the receiver's verdict on each.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ferry_connection::WsConnection;
use ferry_transfer::{FileSource, SourceHandle};
use ferry_upload::{UploadCoordinator, UploadHandle};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ferry uploader");

    let mut config = config::Config::load()?;
    if let Some(url) = args.url.clone() {
        config.url = url;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, args))
}

async fn run(config: config::Config, args: cli::Args) -> anyhow::Result<()> {
    let connection = WsConnection::connect(&config.to_connection_config())
        .await
        .with_context(|| format!("connecting to {}", config.url))?;
    let connection = Arc::new(connection);
    let coordinator = Arc::new(UploadCoordinator::new(connection.clone()));

    let mut waiters = JoinSet::new();
    for path in &args.files {
        let slot = coordinator.stage(path.display().to_string());
        let source = match FileSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(path = %path.display(), "cannot open: {e}");
                waiters.spawn(async { false });
                continue;
            }
        };
        let size_hint = std::fs::metadata(path).ok().map(|m| m.len());
        let chunks = config::chunk_count(size_hint.unwrap_or(0));
        let source: SourceHandle = Arc::new(source);

        match coordinator.start_staged(slot, source, size_hint).await {
            Ok(handle) => {
                tracing::info!(
                    transfer = %handle.transfer_id,
                    path = %path.display(),
                    chunks,
                    "upload started"
                );
                waiters.spawn(watch(coordinator.clone(), handle));
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "upload not started: {e}");
                waiters.spawn(async { false });
            }
        }
    }

    let mut failed = 0usize;
    loop {
        tokio::select! {
            joined = waiters.join_next() => match joined {
                Some(Ok(true)) => {}
                Some(Ok(false)) => failed += 1,
                Some(Err(e)) => {
                    tracing::error!("watcher task failed: {e}");
                    failed += 1;
                }
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("SIGINT received, abandoning active uploads");
                for id in coordinator.list_active() {
                    let _ = coordinator.abandon(&id);
                }
            }
        }
    }

    connection.close().await;

    let board = coordinator.statuses();
    tracing::info!(
        completed = board.completed().len(),
        failed = board.failed().len(),
        "done"
    );
    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads failed", args.files.len());
    }
    Ok(())
}

/// Logs progress until the transfer settles. Returns whether it completed.
///
/// A connection drop leaves the transfer pending forever, so the watcher
/// abandons it instead of waiting.
async fn watch(coordinator: Arc<UploadCoordinator>, handle: UploadHandle) -> bool {
    let id = handle.transfer_id.clone();
    let mut progress = handle.progress.resubscribe();
    let mut disconnect = handle.disconnect.resubscribe();
    let outcome = handle.outcome();
    tokio::pin!(outcome);

    let mut progress_open = true;
    let mut disconnect_open = true;
    loop {
        tokio::select! {
            result = &mut outcome => {
                return match result {
                    Ok(()) => {
                        tracing::info!(transfer = %id, "upload complete");
                        true
                    }
                    Err(e) => {
                        tracing::error!(transfer = %id, "upload failed: {e}");
                        false
                    }
                };
            }
            p = progress.recv(), if progress_open => match p {
                Ok(percent) => tracing::info!(transfer = %id, percent, "progress"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => progress_open = false,
            },
            d = disconnect.recv(), if disconnect_open => {
                disconnect_open = false;
                if let Ok(reason) = d {
                    tracing::warn!(transfer = %id, %reason, "connection lost");
                    let _ = coordinator.abandon(&id);
                }
            }
        }
    }
}
