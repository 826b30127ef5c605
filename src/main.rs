//! Reverse proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!   admin API ──▶ Engine ──▶ KvStore
//!                              │ watch
//!                              ▼
//!                 Engine::subscribe ──ChangeEvent──▶ RouteTable
//!                                                       │
//!   Client ──▶ http server ──▶ frontend match ──────────┘
//!                 │
//!                 ▼
//!        Buffer ▶ [middlewares by priority] ▶ forward ──▶ Backend server
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use reverse_proxy::admin::{run_admin, AdminState};
use reverse_proxy::config::{load_config, ProxyConfig};
use reverse_proxy::lifecycle::run_sync;
use reverse_proxy::observability::{logging, metrics};
use reverse_proxy::{Engine, HttpServer, MemoryStore, RouteTable, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "reverse-proxy", version, about = "Reverse proxy with a store-backed routing table")]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reverse-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        admin_enabled = config.admin.enabled,
        prefix = %config.engine.prefix,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    // The in-process store; an external store plugs in through StoreConnector.
    let store = MemoryStore::new();
    let engine = Arc::new(Engine::new(Arc::new(store), &config.engine.prefix, None)?);
    let table = Arc::new(RouteTable::new());

    let sync = tokio::spawn(run_sync(
        Arc::clone(&engine),
        Arc::clone(&table),
        config.engine.event_buffer,
        shutdown.clone(),
    ));

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(Arc::clone(&engine), &config.admin.api_key);
        Some(tokio::spawn(run_admin(listener, state, shutdown.clone())))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");
    let server = HttpServer::new(config, Arc::clone(&table));
    let served = server.run(listener, shutdown.clone()).await;

    // A failed proxy listener still takes the rest down.
    shutdown.trigger();
    if let Some(admin) = admin {
        admin.await??;
    }
    sync.await?;
    engine.close().await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}
