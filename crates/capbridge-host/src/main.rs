//! capbridge host
//!
//! Runs a client context as a child process and serves the capability surface
//! over the child's stdio.

use anyhow::Context;
use capbridge_core::{BridgeConfig, FsWatchService, HostServer, Transport, WatchPolicy};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod demo;
mod dialog;

use dialog::TerminalDialog;

#[derive(Parser, Debug)]
#[command(name = "capbridge", version, about = "Capability bridge host")]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn a client and serve it
    Run {
        /// Override the configured watch policy (any, selected-only)
        #[arg(long)]
        policy: Option<WatchPolicy>,

        /// Client command and its arguments
        #[arg(last = true, required = true)]
        client: Vec<String>,
    },
    /// Act as a client of the parent host
    ClientDemo {
        /// Don't watch the selected file
        #[arg(long)]
        no_watch: bool,
    },
    /// Print the default config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout may be the protocol channel; log to stderr only.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::load_or_default()?,
    };

    match cli.command {
        Command::Run { policy, client } => run_host(config, policy, client).await,
        Command::ClientDemo { no_watch } => demo::run_client_demo(&config, !no_watch).await,
        Command::ConfigPath => {
            match BridgeConfig::default_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("(no config directory on this platform)"),
            }
            Ok(())
        }
    }
}

async fn run_host(
    mut config: BridgeConfig,
    policy: Option<WatchPolicy>,
    client: Vec<String>,
) -> anyhow::Result<()> {
    info!("capbridge v{}", env!("CARGO_PKG_VERSION"));

    if let Some(policy) = policy {
        config.watch_policy = policy;
    }

    let (command, args) = client
        .split_first()
        .context("missing client command")?;

    let (transport, mut child) = Transport::spawn(
        command,
        args,
        &HashMap::new(),
        None,
        config.max_message_bytes,
    )?;
    info!("Client started: {} (pid {:?})", command, child.id());

    let dialog = TerminalDialog::stdin(config.dialog_patterns()?);
    let watch_service = FsWatchService::with_digests(config.watch_debounce());

    HostServer::new(transport, Arc::new(dialog), Arc::new(watch_service))
        .with_config(&config)
        .run()
        .await?;

    match child.wait().await {
        Ok(status) if status.success() => info!("Client exited"),
        Ok(status) => warn!("Client exited with {}", status),
        Err(e) => warn!("Failed to reap client: {}", e),
    }
    Ok(())
}
