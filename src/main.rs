use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;

use anvil::agent::http::HttpGenerationAgent;
use anvil::config::Config;
use anvil::pipeline::{Coordinator, Services};
use anvil::server::ws::WsBroadcaster;
use anvil::server::{self, AppState};
use anvil::store::{ContractStore, StoreHandle};

#[derive(Parser)]
#[command(name = "anvil")]
#[command(version, about = "LLM-driven contract generation pipeline server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pipeline server
    Serve {
        /// Listen address, e.g. 127.0.0.1:8080
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("anvil=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind, db } => serve(bind, db).await,
    }
}

async fn serve(bind: Option<String>, db: Option<PathBuf>) -> Result<()> {
    let config = Config::from_env(bind, db)?;

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    let store =
        ContractStore::new(&config.database_path).context("Failed to open contract store")?;

    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    let services = Services {
        agent: Arc::new(HttpGenerationAgent::new(config.agent.clone())),
        events: Arc::new(WsBroadcaster::new(ws_tx.clone())),
        store: StoreHandle::new(store),
    };
    let state = Arc::new(AppState {
        coordinator: Coordinator::new(services),
        ws_tx,
    });
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "anvil listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Shutting down");
}
