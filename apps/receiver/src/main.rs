//! Ferry receiver daemon.
//!
//! Usage: `ferry-receiverd [--port PORT] [--dest DIR]`

mod cli;
mod config;

use clap::Parser;
use ferry_receiver::{ReceiverServer, ServerConfig};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ferry receiver");

    let mut config = config::Config::load()?;
    args.apply(&mut config);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("receiver shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let server = ReceiverServer::new(ServerConfig {
        port: config.port,
        dest_dir: config.dest_dir,
    });

    let mut handle = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("SIGINT received, shutting down");
            server.shutdown();
            (&mut handle).await??;
        }
        result = &mut handle => result??,
    }
    Ok(())
}
