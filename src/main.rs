//! Strictly Arena - CLI entry point.

#![warn(missing_docs)]

use anyhow::Result;
use clap::Parser;
use strictly_arena::cli::{Cli, Command};
use strictly_arena::{GameServer, ServerConfig};
use tracing::{info, instrument};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    initialize_tracing();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            idle_timeout,
        } => run_server(config, host, port, idle_timeout).await,
    }
}

/// Run the game server until the game ends or Ctrl+C.
#[instrument]
async fn run_server(
    config_path: Option<std::path::PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    idle_timeout: Option<u64>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = host {
        config = config.with_host(host);
    }
    if let Some(port) = port {
        config = config.with_port(port);
    }
    if let Some(secs) = idle_timeout {
        config = config.with_idle_timeout_secs(secs);
    }

    let server = GameServer::bind(config).await?;
    info!(addr = %server.local_addr()?, "Waiting for two players");

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
        }
    }
    Ok(())
}

fn initialize_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,strictly_arena=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
