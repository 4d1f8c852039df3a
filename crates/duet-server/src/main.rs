//! # Duet Server
//!
//! Main binary: one stateless coordinator replica.
//! - REST API (HTTP polling for presence, matching and signaling)
//! - Reaper (background tidy-up of stale sessions)
//!
//! Replicas share nothing but the session store, so any number of them can
//! run behind a load balancer against the same database.

use std::net::SocketAddr;

use clap::Parser;
use duet_api::{AppState, ClientIntervals, build_router};
use duet_match::{Coordinator, Settings};
use tokio::sync::watch;

/// Command-line overrides; everything else comes from config/env.
#[derive(Debug, Parser)]
#[command(name = "duet", version, about = "Matchmaking and signaling coordinator")]
struct Cli {
    /// Address to bind the HTTP API to.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Store URL: `memory`, or a SQL URL such as `sqlite://duet.db?mode=rwc`.
    #[arg(long)]
    database_url: Option<String>,

    /// Skip the background reaper on this replica.
    #[arg(long)]
    no_reaper: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = duet_common::config::init()?.clone();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if cli.no_reaper {
        config.presence.reaper_enabled = false;
    }

    // Initialize tracing (structured logging)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "duet=debug,tower_http=debug".into());
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }

    tracing::info!("Starting Duet v{}", env!("CARGO_PKG_VERSION"));

    // Connect to the session store (runs migrations for SQL backends)
    let store = duet_db::connect_store(&config.database).await?;

    let coordinator = Coordinator::new(store, Settings::try_from(&config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // === Reaper ===
    let reaper = config.presence.reaper_enabled.then(|| {
        coordinator
            .reaper()
            .spawn(config.presence.reaper_interval(), shutdown_rx)
    });
    if reaper.is_none() {
        tracing::info!("Reaper disabled; stale sessions are skipped lazily");
    }

    // === REST API Server ===
    let api_state = AppState::new(coordinator, ClientIntervals::from(&config));
    let api_router = build_router(api_state);
    let api_addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    let listener = tokio::net::TcpListener::bind(api_addr).await?;
    tracing::info!("REST API listening on http://{api_addr}");

    axum::serve(listener, api_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = reaper {
        handle.await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
