//! `roomweave` binary entry point: CLI parsing, config load, and server
//! bring-up (spec.md §6 "Exit codes"). The binary only ever runs with the
//! default no-op auth/hooks — see `roomweave::server::serve` for the
//! library-level extension point a deployer uses to supply real ones.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::prelude::*;

use roomweave::config::{load_config, FileConfig, RoomServerConfig};
use roomweave::error::RoomError;
use roomweave::hooks::Hooks;
use roomweave::server;

#[derive(Parser)]
#[command(name = "roomweave")]
#[command(version)]
#[command(about = "Real-time collaboration room server")]
struct Cli {
    /// Directory holding config.toml (defaults: port 0, path /rooms, health /health)
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Listener port (overrides config.toml and COLLAB_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_directive = if cli.debug { "roomweave=debug,tower_http=debug,info" } else { "roomweave=info,tower_http=info,warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let fc: FileConfig = load_config(&cli.config_dir)
        .extract()
        .map_err(|e| RoomError::Config(roomweave::error::ConfigError::Parse(e)))?;
    let mut config = RoomServerConfig::from_file(&fc);
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    server::serve(&cli.host, config, None, Arc::new(Hooks::default())).await
}
