mod config;
mod engine;
mod match_service;
mod metrics;
mod persist;
mod server;

use anyhow::Context;
use clap::Parser;
use engine::spot::OrderProcessor;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Price-time priority order matching service", long_about = None)]
struct Args {
    /// Path of the TOML runtime config
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::try_init().unwrap_or_default();
    let args = Args::parse();
    let config = config::install(config::RuntimeConfig::from_toml(&args.config)?);

    let gateway = persist::open(&config.storage)
        .await
        .context("failed to open persistence backend")?;
    let processor = OrderProcessor::recover(gateway)
        .await
        .context("failed to recover order books")?;

    let mut server = server::Server::new(Arc::new(processor));
    server.start(config)?;
    shutdown_signal().await;
    server.stop().await;
    Ok(())
}
