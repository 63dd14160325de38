// =============================================================================
// Tape Journal — Main Entry Point
// =============================================================================
//
// Starts the live quote feed, folds every inbound batch into the per-symbol
// candle series, and serves the journal REST + WebSocket API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod app_state;
mod feed;
mod market_data;
mod planning;
mod polygon;
mod runtime_config;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::ChartAnalyst;
use crate::app_state::AppState;
use crate::feed::{StreamConnection, WsConnector};
use crate::polygon::PolygonClient;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "journal_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Tape Journal starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(syms) = std::env::var("JOURNAL_SYMBOLS") {
        config.apply_symbols_override(&syms);
    }
    if let Ok(addr) = std::env::var("JOURNAL_BIND_ADDR") {
        if !addr.trim().is_empty() {
            config.bind_addr = addr.trim().to_string();
        }
    }

    info!(symbols = ?config.symbols, feed_url = %config.feed_url, "Configured feed");

    // ── 2. Outbound clients ──────────────────────────────────────────────
    let polygon_key = std::env::var("POLYGON_API_KEY").unwrap_or_default();
    let openai_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if openai_key.is_empty() {
        warn!("OPENAI_API_KEY is not set, chart analysis will be unavailable");
    }

    let polygon = PolygonClient::new(polygon_key.clone(), config.rest_base_url.clone())?;
    let analyst = ChartAnalyst::new(
        openai_key,
        config.analysis_endpoint.clone(),
        config.analysis_model.clone(),
    )?;

    // ── 3. Live feed ─────────────────────────────────────────────────────
    let (connection, mut feed) = StreamConnection::spawn(
        WsConnector::new(config.feed_url.clone()),
        config.reconnect_delay(),
    );
    let symbols = config.symbols.clone();
    let bind_addr = config.bind_addr.clone();

    let state = Arc::new(AppState::new(config, connection.clone(), polygon, analyst));

    // Subscriptions registered before connect are replayed once the session
    // is up.
    connection.subscribe(symbols.clone());
    if let Err(e) = connection.connect(polygon_key) {
        error!(error = %e, "Live feed not started (set POLYGON_API_KEY)");
        state.push_error("feed", format!("{e:#}"));
    }

    // ── 4. Feed consumer ─────────────────────────────────────────────────
    let consumer_state = state.clone();
    tokio::spawn(async move {
        while let Some(batch) = feed.recv().await {
            if batch.iter().any(|m| m.is_auth_failure()) {
                warn!("Venue rejected the API key");
                consumer_state.push_error("feed", "authentication failed");
            }
            if consumer_state.live_series.apply_batch(&batch) > 0 {
                consumer_state.increment_version();
            }
        }
        info!("Feed consumer stopped");
    });

    // ── 5. Connection state watcher ──────────────────────────────────────
    let watch_state = state.clone();
    let mut changes = connection.state_changes();
    tokio::spawn(async move {
        let mut last_error: Option<String> = None;
        while changes.changed().await.is_ok() {
            let snap = changes.borrow_and_update().clone();
            info!(
                state = %snap.state,
                authenticated = snap.authenticated,
                attempts = snap.reconnect_attempts,
                "Feed connection state"
            );
            if snap.last_error != last_error {
                if let Some(err) = &snap.last_error {
                    watch_state.push_error("feed", err.clone());
                }
                last_error = snap.last_error;
            }
            watch_state.increment_version();
        }
    });

    // ── 6. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, symbols = symbols.len(), "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    connection.close();

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Tape Journal shut down complete.");
    Ok(())
}
