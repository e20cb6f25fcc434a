//! Command-line interface for strictly_arena.

use clap::{Parser, Subcommand};

/// Strictly Arena - authoritative two-player tic-tac-toe server
#[derive(Parser, Debug)]
#[command(name = "strictly_arena")]
#[command(about = "Two-player tic-tac-toe over a line protocol", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the game server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds of silence before a player is dropped, 0 to disable (overrides config)
        #[arg(long)]
        idle_timeout: Option<u64>,
    },
}
