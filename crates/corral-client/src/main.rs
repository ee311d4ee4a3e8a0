//! Corral CLI
//!
//! Connects to a controller with the configured credentials and runs one
//! diagnostic command:
//! - `status`: session and extension module summary
//! - `list`: servers or services known to the controller
//! - `tail`: follow a console stream

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corral_client::commands::{self, SourceArg, StreamArg};
use corral_client::output::print_error;
use corral_client::{ModuleCatalog, Session};
use corral_core::config::{self, ClientConfig};

#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about = "Game server fleet management client")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Controller address (overrides config)
    #[arg(short, long, global = true, env = "CORRAL_ADDRESS")]
    address: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show controller, user, session state and extension modules
    Status,

    /// List servers or services
    List {
        /// Resource kind
        #[arg(value_enum, default_value = "server")]
        source: SourceArg,
    },

    /// Follow a console stream
    Tail {
        /// Resource kind
        #[arg(value_enum)]
        source: SourceArg,
        /// Resource id
        id: u32,
        /// Stream to follow
        #[arg(short, long, value_enum, default_value = "output")]
        kind: StreamArg,
        /// Stop after this many lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = load_client_config(cli.config.as_ref())?;
    if let Some(address) = cli.address {
        config.address = address;
    }

    let session = Session::connect(config, ModuleCatalog::new())
        .await
        .context("Failed to open session")?;

    if let Err(e) = session.authorize_configured().await {
        print_error(&format!("Authorization failed: {}", e));
        session.close().await;
        return Err(e.into());
    }

    let result = match cli.command {
        Commands::Status => commands::status_command(&session, cli.json).await,
        Commands::List { source } => {
            commands::list_command(&session, source.into(), cli.json).await
        }
        Commands::Tail {
            source,
            id,
            kind,
            lines,
        } => commands::tail_command(&session, source.into(), id, kind.into(), lines).await,
    };

    session.close().await;
    result
}

/// Load the client config from `path`, the default location, or defaults
fn load_client_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        match config::load_config(&default_path) {
            Ok(config) => return Ok(config),
            Err(e) => tracing::warn!("Failed to load config from {:?}: {}", default_path, e),
        }
    }

    Ok(ClientConfig::default())
}
