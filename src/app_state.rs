// =============================================================================
// Central Application State — Tape Journal backend
// =============================================================================
//
// Ties the live feed handle, the per-symbol candle series and the outbound
// HTTP clients together, and builds the snapshot served by the REST API and
// the WebSocket push feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - The StreamConnection handle is a channel sender and needs no lock.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::analysis::ChartAnalyst;
use crate::feed::{ConnectionSnapshot, StreamConnection};
use crate::market_data::{Candle, LiveSeries, SummaryStats};
use crate::polygon::{is_market_open, PolygonClient};
use crate::runtime_config::RuntimeConfig;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Where it came from, e.g. `feed` or `history`.
    pub source: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every candle update and connection state change. The
    /// WebSocket feed polls it to decide when to push.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Live feed ───────────────────────────────────────────────────────
    pub connection: StreamConnection,
    pub live_series: Arc<LiveSeries>,

    // ── Outbound HTTP ───────────────────────────────────────────────────
    pub polygon: PolygonClient,
    pub analyst: ChartAnalyst,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant when the server was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        connection: StreamConnection,
        polygon: PolygonClient,
        analyst: ChartAnalyst,
    ) -> Self {
        let live_series = Arc::new(LiveSeries::new(config.max_candles));
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            connection,
            live_series,
            polygon,
            analyst,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error. Capped at [`MAX_RECENT_ERRORS`], oldest evicted.
    pub fn push_error(&self, source: &str, msg: impl Into<String>) {
        let record = ErrorRecord {
            message: msg.into(),
            source: source.to_string(),
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Snapshot Builders ───────────────────────────────────────────────

    pub fn feed_status(&self) -> FeedStatus {
        FeedStatus {
            connection: self.connection.snapshot(),
            last_update: self.live_series.last_update(),
            market_open: is_market_open(),
            series_symbols: self.live_series.symbols(),
        }
    }

    /// Full serialisable snapshot, sent by the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let candles = self.live_series.snapshot();
        let stats = candles
            .keys()
            .filter_map(|sym| self.live_series.stats(sym).map(|s| (sym.clone(), s)))
            .collect();

        StateSnapshot {
            version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_s: self.start_time.elapsed().as_secs(),
            feed: self.feed_status(),
            candles,
            stats,
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub connection: ConnectionSnapshot,
    pub last_update: Option<DateTime<Utc>>,
    pub market_open: bool,
    /// Symbols that currently hold live candles.
    pub series_symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub server_time: i64,
    pub uptime_s: u64,
    pub feed: FeedStatus,
    pub candles: BTreeMap<String, Vec<Candle>>,
    pub stats: BTreeMap<String, SummaryStats>,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::{DEFAULT_ANALYSIS_ENDPOINT, DEFAULT_ANALYSIS_MODEL};
    use crate::feed::{WsConnector, DEFAULT_RECONNECT_DELAY};
    use crate::polygon::DEFAULT_REST_BASE_URL;
    use crate::types::ConnectionState;

    /// State with an idle feed handle; nothing touches the network.
    pub(crate) fn idle_state() -> Arc<AppState> {
        let (connection, _feed) = StreamConnection::spawn(
            WsConnector::new("ws://127.0.0.1:9/stocks"),
            DEFAULT_RECONNECT_DELAY,
        );
        let polygon = PolygonClient::new("test-key", DEFAULT_REST_BASE_URL).unwrap();
        let analyst =
            ChartAnalyst::new("", DEFAULT_ANALYSIS_ENDPOINT, DEFAULT_ANALYSIS_MODEL).unwrap();
        Arc::new(AppState::new(
            RuntimeConfig::default(),
            connection,
            polygon,
            analyst,
        ))
    }

    #[tokio::test]
    async fn error_log_is_capped() {
        let state = idle_state();
        let before = state.current_state_version();
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            state.push_error("feed", format!("err {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "err 5");
        assert_eq!(
            state.current_state_version(),
            before + (MAX_RECENT_ERRORS + 5) as u64
        );
    }

    #[tokio::test]
    async fn snapshot_includes_series_and_stats() {
        let state = idle_state();
        state.live_series.apply_batch(&crate::feed::message::decode_batch(
            r#"[{"ev":"AM","sym":"AAPL","s":0,"o":100,"h":101,"l":99,"c":101}]"#,
        ).unwrap());

        let snap = state.build_snapshot();
        assert_eq!(snap.feed.connection.state, ConnectionState::Idle);
        assert_eq!(snap.candles["AAPL"].len(), 1);
        assert_eq!(snap.stats["AAPL"].change, "1.00");
        assert_eq!(snap.feed.series_symbols, vec!["AAPL"]);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["stats"]["AAPL"]["changePercent"], "1.00");
    }
}
