//! MockMate Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use mockmate_server::{DefinitionStore, MockMateConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockmate-server",
    about = "Local mock HTTP server - scenario-aware request matching and a live admin API",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mockmate.yaml")]
    config: PathBuf,

    /// Port to listen on (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Snapshot file holding mock definitions (overrides the configuration file)
    #[arg(short, long, value_name = "PATH")]
    data: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockMateConfig::load_or_default(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        MockMateConfig::default()
    };

    if let Some(port) = args.port {
        config.server.http_port = port;
    }
    if let Some(data) = args.data {
        config.storage.path = data;
    }
    config.validate()?;

    // Validate and exit if requested
    if args.validate {
        println!(
            "Configuration is valid (listening on {}, snapshot {})",
            config.bind_address(),
            config.storage.path.display()
        );
        return Ok(());
    }

    let store = DefinitionStore::open(&config.storage.path)
        .await
        .with_context(|| {
            format!(
                "Failed to load mock definitions from {}",
                config.storage.path.display()
            )
        })?;

    let catalog = store.snapshot().await;
    info!(
        definitions = catalog.entries().len(),
        active_scenario = %catalog.active_scenario(),
        snapshot = %config.storage.path.display(),
        "Mock catalog loaded"
    );
    drop(catalog);

    mockmate_server::server::run(&config, store).await
}
