//! FileBeam Daemon
//!
//! Headless service exposing local directories to remote peers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::server::{Server, ServerEvent};
use daemon::vfs::NativeFileSystem;

/// FileBeam Daemon - headless service exposing local directories to
/// remote peers.
#[derive(Parser, Debug)]
#[command(name = "filebeam")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the FileBeam daemon
    Start {
        /// Override the configured listen port
        #[arg(long, short)]
        port: Option<u16>,

        /// Additional mounts as ENDPOINT=DIR pairs
        #[arg(long, short, value_name = "ENDPOINT=DIR")]
        mount: Vec<String>,

        /// Peer addresses allowed to connect (repeatable; empty allows all)
        #[arg(long, value_name = "ADDR")]
        allow: Vec<String>,
    },

    /// Validate the configuration file and exit
    CheckConfig,

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    match cli.command {
        Commands::Start { port, mount, allow } => {
            if let Some(port) = port {
                config.network.port = port;
            }
            if !allow.is_empty() {
                config.network.allowed_peers = allow;
            }
            config.validate()?;

            let server = Server::new(&config)?;
            for pair in &mount {
                let (endpoint, dir) = parse_mount(pair)?;
                server.mount(&endpoint, Arc::new(NativeFileSystem::new(&dir)));
            }

            run(server).await?;
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration is valid");
        }
        Commands::PrintConfig => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Parse an `ENDPOINT=DIR` mount argument.
fn parse_mount(pair: &str) -> anyhow::Result<(String, PathBuf)> {
    let Some((endpoint, dir)) = pair.split_once('=') else {
        anyhow::bail!("Invalid mount '{}': expected ENDPOINT=DIR", pair);
    };
    if endpoint.trim().is_empty() || dir.trim().is_empty() {
        anyhow::bail!("Invalid mount '{}': expected ENDPOINT=DIR", pair);
    }
    Ok((endpoint.to_string(), PathBuf::from(dir)))
}

/// Serve until interrupted, logging server events as they arrive.
async fn run(server: Server) -> anyhow::Result<()> {
    let handle = server.listen().await?;
    tracing::info!("FileBeam daemon listening on {}", handle.local_addr());

    let mut events = server.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::Connected { connection, addr } => {
                    tracing::info!("Peer connected: {} ({})", connection, addr);
                }
                ServerEvent::Command { connection, name } => {
                    tracing::debug!("Command '{}' from {}", name, connection);
                }
                ServerEvent::Disconnected { connection } => {
                    tracing::info!("Peer disconnected: {}", connection);
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");
    handle.shutdown().await;
    Ok(())
}
