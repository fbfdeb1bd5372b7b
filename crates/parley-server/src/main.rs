//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory store, guests allowed (development)
//! parley-server --bind 0.0.0.0:6666
//!
//! # Persistent store, authenticated users only
//! parley-server --db /var/lib/parley/parley.redb --no-guests
//!
//! # Everything from a file
//! parley-server --config parley.toml
//! ```

use std::path::PathBuf;

use clap::Parser;
use parley_server::{
    IdentityStore, MemoryStore, RedbStore, Server, ServerConfig, ServerError, StorageConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley messaging server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Parley real-time messaging server")]
#[command(version)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Refuse guests; clients must authenticate
    #[arg(long)]
    no_guests: bool,

    /// Path to a redb database (overrides the config file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path).map_err(ServerError::from)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if args.no_guests {
        config.allow_guests = false;
    }
    if let Some(path) = args.db {
        config.storage = StorageConfig::Redb { path };
    }

    tracing::info!("Parley server starting");
    if !config.allow_guests {
        tracing::info!("Guests disabled - clients must authenticate");
    }

    match config.storage.clone() {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory store - identities are lost on exit");
            serve(&config, MemoryStore::new()).await?;
        },
        StorageConfig::Redb { path } => {
            tracing::info!(path = %path.display(), "Opening redb store");
            serve(&config, RedbStore::open(&path)?).await?;
        },
    }

    Ok(())
}

async fn serve<S: IdentityStore>(config: &ServerConfig, store: S) -> Result<(), ServerError> {
    let server = Server::bind(config, store).await?;
    tracing::info!("Server listening on {}", server.local_addr()?);
    server.run().await
}
