// =============================================================================
// Polygon REST Client — historical minute aggregates
// =============================================================================
//
// The API key travels as the `apiKey` query parameter, so request URLs are
// never logged and the Debug impl redacts the key.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::market_data::Candle;
use crate::polygon::market_hours::format_polygon_date;

/// Default REST base URL.
pub const DEFAULT_REST_BASE_URL: &str = "https://api.polygon.io";

/// Upper bound on bars per day request (minutes in a day).
const MINUTE_BAR_LIMIT: u32 = 1440;

/// Polygon REST client for historical bars.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl PolygonClient {
    /// Create a new `PolygonClient` against `base_url`.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "PolygonClient initialised");

        Ok(Self {
            api_key: api_key.into(),
            base_url,
            client,
        })
    }

    fn minute_bars_url(&self, symbol: &str, date: &str) -> String {
        let day = format_polygon_date(date);
        format!(
            "{}/v2/aggs/ticker/{}/range/1/minute/{}/{}?adjusted=true&sort=asc&limit={}&apiKey={}",
            self.base_url, symbol, day, day, MINUTE_BAR_LIMIT, self.api_key
        )
    }

    /// GET /v2/aggs/ticker/{symbol}/range/1/minute/{day}/{day}
    ///
    /// `date` is `YYYY-MM-DD`. A day without bars yields an empty Vec.
    #[instrument(skip(self), name = "polygon::minute_bars")]
    pub async fn minute_bars(&self, symbol: &str, date: &str) -> Result<Vec<Candle>> {
        let url = self.minute_bars_url(symbol, date);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /v2/aggs request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse aggregates response")?;

        if !status.is_success() {
            anyhow::bail!("Polygon GET /v2/aggs returned {}: {}", status, body);
        }

        let candles = parse_aggregates(&body)?;
        debug!(symbol, date, count = candles.len(), "minute bars fetched");
        Ok(candles)
    }
}

/// Map `results[].{t,o,h,l,c}` into candles. Missing `results` means no bars.
fn parse_aggregates(body: &serde_json::Value) -> Result<Vec<Candle>> {
    let Some(raw) = body.get("results") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let raw = raw.as_array().context("aggregates results is not an array")?;

    raw.iter()
        .map(|entry| {
            let ts = entry["t"]
                .as_i64()
                .or_else(|| entry["t"].as_f64().map(|t| t as i64))
                .context("aggregate entry missing timestamp")?;
            Ok(Candle::new(
                ts,
                parse_num(&entry["o"])?,
                parse_num(&entry["h"])?,
                parse_num(&entry["l"])?,
                parse_num(&entry["c"])?,
            ))
        })
        .collect()
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_num(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

impl std::fmt::Debug for PolygonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolygonClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
