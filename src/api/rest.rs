// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// All endpoints live under `/api/v1/`. Read endpoints and the planner are
// public; changing subscriptions and chart analysis require a Bearer token
// checked via the `AuthBearer` extractor.
//
// CORS is configured permissively for the browser journal front end.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::analysis::Recommendation;
use crate::api::auth::AuthBearer;
use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::market_data::aggregator::compute_summary_stats;
use crate::planning::{GoalPlan, PlanRequest};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/feed/status", get(feed_status))
        .route("/api/v1/candles/{symbol}", get(candles))
        .route("/api/v1/candles/{symbol}/stats", get(candle_stats))
        .route("/api/v1/history", get(history))
        .route("/api/v1/plan", post(plan))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/subscriptions", post(update_subscriptions))
        .route("/api/v1/analyze-chart", post(analyze_chart))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

/// One trading day.
const MAX_INTERVAL_MINUTES: u32 = 1440;

fn normalise_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

// =============================================================================
// Health & feed status (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
    feed_state: String,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: Utc::now().timestamp_millis(),
        feed_state: state.connection.state().to_string(),
    };
    Json(resp)
}

async fn feed_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.feed_status())
}

// =============================================================================
// Live candles (public)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct CandleQuery {
    /// Re-bucket retained trades into candles this many minutes wide.
    interval: Option<String>,
}

async fn candles(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Value>, ApiError> {
    let symbol = normalise_symbol(&symbol);

    let Some(raw) = query.interval else {
        let candles = state.live_series.candles(&symbol);
        return Ok(Json(json!({ "symbol": symbol, "candles": candles })));
    };

    let interval = match raw.trim().parse::<u32>() {
        Ok(n) if (1..=MAX_INTERVAL_MINUTES).contains(&n) => n,
        _ => {
            return Err(ApiError::BadRequest(format!(
                "interval must be a whole number of minutes between 1 and {MAX_INTERVAL_MINUTES}"
            )))
        }
    };
    let candles = state.live_series.trade_candles(&symbol, interval);
    Ok(Json(json!({
        "symbol": symbol,
        "interval": interval,
        "candles": candles,
    })))
}

async fn candle_stats(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let symbol = normalise_symbol(&symbol);
    let stats = state
        .live_series
        .stats(&symbol)
        .ok_or_else(|| ApiError::NotFound(format!("no live candles for {symbol}")))?;
    Ok(Json(json!({ "symbol": symbol, "stats": stats })))
}

// =============================================================================
// Subscriptions (authenticated)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct SubscriptionUpdate {
    #[serde(default)]
    subscribe: Vec<String>,
    #[serde(default)]
    unsubscribe: Vec<String>,
}

async fn update_subscriptions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<SubscriptionUpdate>,
) -> Result<Json<Value>, ApiError> {
    let subscribe: Vec<String> = update
        .subscribe
        .iter()
        .map(|s| normalise_symbol(s))
        .filter(|s| !s.is_empty())
        .collect();
    let unsubscribe: Vec<String> = update
        .unsubscribe
        .iter()
        .map(|s| normalise_symbol(s))
        .filter(|s| !s.is_empty())
        .collect();

    if subscribe.is_empty() && unsubscribe.is_empty() {
        return Err(ApiError::BadRequest(
            "subscribe or unsubscribe must list at least one symbol".to_string(),
        ));
    }

    state.connection.subscribe(subscribe.clone());
    state.connection.unsubscribe(unsubscribe.clone());

    // Keep the startup list in step so a restart resumes the same set.
    {
        let mut config = state.runtime_config.write();
        for sym in &subscribe {
            if !config.symbols.contains(sym) {
                config.symbols.push(sym.clone());
            }
        }
        config.symbols.retain(|s| !unsubscribe.contains(s));
    }
    state.increment_version();

    info!(?subscribe, ?unsubscribe, "subscriptions updated via API");
    Ok(Json(json!({
        "accepted": true,
        "subscribe": subscribe,
        "unsubscribe": unsubscribe,
    })))
}

// =============================================================================
// Historical bars (public)
// =============================================================================

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    symbol: Option<String>,
    date: Option<String>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let (symbol, date) = match (query.symbol.as_deref(), query.date.as_deref()) {
        (Some(s), Some(d)) if !s.trim().is_empty() && !d.trim().is_empty() => {
            (normalise_symbol(s), d.trim().to_string())
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Symbol and date are required".to_string(),
            ))
        }
    };

    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(ApiError::BadRequest(format!(
            "date must be YYYY-MM-DD, got {date}"
        )));
    }

    let candles = state.polygon.minute_bars(&symbol, &date).await.map_err(|e| {
        warn!(symbol = %symbol, date = %date, error = %e, "historical fetch failed");
        state.push_error("history", format!("{symbol} {date}: {e:#}"));
        ApiError::Upstream("Failed to fetch historical data".to_string())
    })?;

    let Some(stats) = compute_summary_stats(&candles) else {
        return Err(ApiError::NotFound(
            "No data available for this symbol and date".to_string(),
        ));
    };

    Ok(Json(json!({
        "symbol": symbol,
        "date": date,
        "candles": candles,
        "stats": stats,
    })))
}

// =============================================================================
// Goal planning (public)
// =============================================================================

async fn plan(Json(req): Json<PlanRequest>) -> Result<Json<GoalPlan>, ApiError> {
    let plan = req.plan(Utc::now().date_naive())?;
    Ok(Json(plan))
}

// =============================================================================
// Chart analysis (authenticated)
// =============================================================================

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    image: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    date: String,
}

async fn analyze_chart(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<Value>, ApiError> {
    let analysis = state
        .analyst
        .analyze(&req.image, &req.symbol, &req.date)
        .await
        .map_err(|e| {
            warn!(symbol = %req.symbol, error = %e, "chart analysis failed");
            ApiError::from(e)
        })?;

    let recommendation = Recommendation::parse(&analysis);
    Ok(Json(json!({
        "analysis": analysis,
        "recommendation": recommendation,
    })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::tests::idle_state;
    use crate::feed::message::decode_batch;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_feed_state() {
        let (status, body) = call(router(idle_state()), get_req("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["feed_state"], "Idle");
    }

    #[tokio::test]
    async fn feed_status_shape() {
        let (status, body) = call(router(idle_state()), get_req("/api/v1/feed/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connection"]["authenticated"], false);
        assert!(body["connection"]["last_error"].is_null());
        assert!(body["last_update"].is_null());
    }

    #[tokio::test]
    async fn live_candles_and_stats() {
        let state = idle_state();
        state.live_series.apply_batch(
            &decode_batch(r#"[{"ev":"AM","sym":"AAPL","s":0,"o":10,"h":11,"l":9,"c":11}]"#).unwrap(),
        );

        let (status, body) = call(router(state.clone()), get_req("/api/v1/candles/aapl")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["candles"][0]["close"], 11.0);

        let (status, body) = call(router(state.clone()), get_req("/api/v1/candles/AAPL/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["changePercent"], "10.00");

        let (status, _) = call(router(state), get_req("/api/v1/candles/MSFT/stats")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn candles_rebucket_trades_by_interval() {
        let state = idle_state();
        state.live_series.apply_batch(
            &decode_batch(
                r#"[
                    {"ev":"T","sym":"AAPL","t":10000,"p":10},
                    {"ev":"T","sym":"AAPL","t":130000,"p":14},
                    {"ev":"T","sym":"AAPL","t":170000,"p":12},
                    {"ev":"T","sym":"AAPL","t":310000,"p":8}
                ]"#,
            )
            .unwrap(),
        );

        let (status, body) =
            call(router(state.clone()), get_req("/api/v1/candles/AAPL?interval=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval"], 5);
        let candles = body["candles"].as_array().unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0]["timestamp"], 0);
        assert_eq!(candles[0]["high"], 14.0);
        assert_eq!(candles[0]["close"], 12.0);
        assert_eq!(candles[1]["timestamp"], 300_000);

        // Trades alone never create a live minute series.
        let (_, body) = call(router(state.clone()), get_req("/api/v1/candles/AAPL")).await;
        assert_eq!(body["candles"], json!([]));

        for bad in ["0", "abc", "1441", "-5"] {
            let uri = format!("/api/v1/candles/AAPL?interval={bad}");
            let (status, body) = call(router(state.clone()), get_req(&uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "interval={bad}");
            assert!(body["error"].as_str().unwrap().contains("interval"));
        }
    }

    #[tokio::test]
    async fn history_requires_symbol_and_date() {
        let (status, body) = call(router(idle_state()), get_req("/api/v1/history?symbol=AAPL")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Symbol and date are required");

        let (status, _) = call(
            router(idle_state()),
            get_req("/api/v1/history?symbol=AAPL&date=03/01/2024"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn plan_endpoint() {
        let (status, body) = call(
            router(idle_state()),
            post_json(
                "/api/v1/plan",
                json!({"startingAmount": "1000", "returnPercentage": "1", "goalAmount": "2000"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days"], 70);
        assert_eq!(body["tradingDays"], 50);

        let (status, body) = call(
            router(idle_state()),
            post_json(
                "/api/v1/plan",
                json!({"startingAmount": 5000, "returnPercentage": 1, "goalAmount": 2000}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "goal amount must be greater than starting amount");
    }

    #[tokio::test]
    async fn authenticated_routes_reject_missing_token() {
        let (status, _) = call(
            router(idle_state()),
            post_json("/api/v1/subscriptions", json!({"subscribe": ["TSLA"]})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            router(idle_state()),
            post_json("/api/v1/analyze-chart", json!({"image": "QUJD"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
