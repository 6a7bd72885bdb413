use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use mtr_exporter::config::Config;
use mtr_exporter::export::SnapshotExporter;
use mtr_exporter::probe::engine_from_config;
use mtr_exporter::server::{AppState, build_router};
use mtr_exporter::state::MetricsStore;
use mtr_exporter::trace::ProbeScheduler;

mod cli;

use cli::Args;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));
    fmt().with_env_filter(filter).init();

    tracing::info!(version = VERSION, "starting mtr_exporter");

    let config = Config::load(&args.config_file)
        .with_context(|| format!("failed to load {}", args.config_file.display()))?;
    let listen = args.listen_addr().map_err(anyhow::Error::msg)?;

    let store = MetricsStore::new();
    let engine = engine_from_config(&config);
    let cancel = CancellationToken::new();

    let scheduler = ProbeScheduler::new(config, engine, store.clone(), cancel.clone())
        .start()
        .context("invalid configuration")?;

    // Ctrl+C stops the probe loops and the HTTP server
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        cancel_signal.cancel();
    });

    let app = build_router(AppState::new(store, SnapshotExporter::new(VERSION)));
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;

    tracing::info!(%listen, hosts = scheduler.len(), "listening");

    let serve_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await
        .context("HTTP server failed");

    // Stop probing even if the server exited on its own
    scheduler.shutdown().await;
    tracing::info!("stopped");

    served
}
