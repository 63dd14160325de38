// =============================================================================
// Feed wire format — inbound event batches and outbound control requests
// =============================================================================
//
// The venue pushes JSON arrays of heterogeneous events tagged by `ev`. Every
// element is decoded on its own so a single bad element never costs the rest
// of the batch. Numeric price fields arrive either as JSON numbers or as
// decimal strings; anything non-numeric becomes NaN instead of an error.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// One decoded element of an inbound batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "ev")]
pub enum FeedMessage {
    #[serde(rename = "status")]
    Status(StatusEvent),
    #[serde(rename = "AM")]
    Aggregate(AggregateBar),
    #[serde(rename = "T")]
    Trade(TradeTick),
    /// Any event tag this backend does not interpret.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusEvent {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Pre-computed one-minute bar (`AM`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateBar {
    #[serde(default)]
    pub sym: String,
    /// Bar start, epoch milliseconds.
    #[serde(rename = "s", deserialize_with = "lenient_millis")]
    pub start: i64,
    #[serde(rename = "o", default = "nan", deserialize_with = "lenient_f64")]
    pub open: f64,
    #[serde(rename = "h", default = "nan", deserialize_with = "lenient_f64")]
    pub high: f64,
    #[serde(rename = "l", default = "nan", deserialize_with = "lenient_f64")]
    pub low: f64,
    #[serde(rename = "c", default = "nan", deserialize_with = "lenient_f64")]
    pub close: f64,
    #[serde(rename = "v", default, deserialize_with = "lenient_f64")]
    pub volume: f64,
}

/// Single executed trade (`T`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeTick {
    #[serde(default)]
    pub sym: String,
    /// Execution time, epoch milliseconds.
    #[serde(rename = "t", deserialize_with = "lenient_millis")]
    pub timestamp: i64,
    #[serde(rename = "p", default = "nan", deserialize_with = "lenient_f64")]
    pub price: f64,
    #[serde(rename = "s", default, deserialize_with = "lenient_f64")]
    pub size: f64,
}

impl FeedMessage {
    /// Instrument the event refers to, for events that carry one.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Aggregate(bar) => Some(bar.sym.as_str()),
            Self::Trade(tick) => Some(tick.sym.as_str()),
            Self::Status(_) | Self::Unknown => None,
        }
    }

    pub fn is_auth_success(&self) -> bool {
        matches!(self, Self::Status(s) if s.status == "auth_success")
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Status(s) if s.status == "auth_failed")
    }
}

/// Decode one text frame into a batch.
///
/// A frame that is not JSON (or is a JSON scalar) is an error; the caller drops
/// it. Elements that fail to decode are dropped individually with a warning.
/// A bare object is treated as a batch of one.
pub fn decode_batch(text: &str) -> Result<Vec<FeedMessage>> {
    let root: Value = serde_json::from_str(text).context("failed to parse feed frame JSON")?;

    let items = match root {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => anyhow::bail!("unexpected feed frame shape: {other}"),
    };

    let mut batch = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<FeedMessage>(item) {
            Ok(msg) => batch.push(msg),
            Err(e) => warn!(error = %e, "dropping malformed feed event"),
        }
    }
    Ok(batch)
}

fn nan() -> f64 {
    f64::NAN
}

/// Accept a JSON number or a decimal string. Unparsable strings, `null` and
/// other JSON types yield NaN.
fn lenient_f64<'de, D>(de: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(de)?;
    Ok(match val {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    })
}

/// Epoch-millisecond timestamps: integer, float or numeric string.
fn lenient_millis<'de, D>(de: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(de)?;
    let parsed = match &val {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {val}")))
}

// ---------------------------------------------------------------------------
// Outbound control requests
// ---------------------------------------------------------------------------

/// Per-symbol streaming channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Minute aggregates (`AM`).
    Aggregate,
    /// Trades (`T`).
    Trade,
}

impl Channel {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Aggregate => "AM",
            Self::Trade => "T",
        }
    }

    /// `AM.AAPL`, `T.AAPL`, ...
    pub fn topic(self, symbol: &str) -> String {
        format!("{}.{}", self.prefix(), symbol)
    }

    pub fn topics<'a>(self, symbols: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        symbols.into_iter().map(|s| self.topic(s)).collect()
    }
}

/// Control message sent to the venue.
///
/// Serialises as `{"action": "...", "params": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "params", rename_all = "lowercase")]
pub enum ControlRequest {
    Auth(String),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

impl ControlRequest {
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialise control request")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
