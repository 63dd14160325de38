// =============================================================================
// Candle Aggregator — folds feed events into OHLC candles
// =============================================================================
//
// Pure functions; nothing here keeps state between calls. The caller owns the
// running candle collection and passes in whatever it wants folded.
//
// Two behaviours are pinned by tests:
//   - `update_last_candle_with_trade` uses the FIRST trade of the batch.
//   - `group_trades_into_candles` sets `close` by arrival order inside a
//     bucket, not by trade timestamp.
// Non-numeric prices arrive here as NaN and are carried through unchanged.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::feed::message::{AggregateBar, FeedMessage, TradeTick};

const MS_PER_MINUTE: i64 = 60_000;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One OHLC interval. `timestamp` is the interval start in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }

    /// Candle seeded from a single price.
    pub fn flat(timestamp: i64, price: f64) -> Self {
        Self::new(timestamp, price, price, price, price)
    }

    /// Fold one traded price in. `open` never changes.
    pub fn absorb(&mut self, price: f64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
    }
}

impl From<&AggregateBar> for Candle {
    fn from(bar: &AggregateBar) -> Self {
        Self::new(bar.start, bar.open, bar.high, bar.low, bar.close)
    }
}

/// Display-ready summary of a candle series, two decimals each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub current_price: String,
    pub change: String,
    pub change_percent: String,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One candle per `AM` event, in input order. Every other event is skipped.
///
/// The iterator is lazy and `Clone`, so it can be restarted.
pub fn aggregate_minute_bars(
    messages: &[FeedMessage],
) -> impl Iterator<Item = Candle> + Clone + '_ {
    messages.iter().filter_map(|m| match m {
        FeedMessage::Aggregate(bar) => Some(Candle::from(bar)),
        _ => None,
    })
}

/// Fold the first trade of `trades` into a copy of `last_candle`.
///
/// Returns `None` when there is no candle or no trade in the batch.
pub fn update_last_candle_with_trade(
    trades: &[FeedMessage],
    last_candle: Option<&Candle>,
) -> Option<Candle> {
    let last = last_candle?;
    let trade = trades.iter().find_map(as_trade)?;

    let mut updated = *last;
    updated.absorb(trade.price);
    Some(updated)
}

/// Bucket trades into fixed `interval_minutes` candles, sorted by interval
/// start. Within a bucket, later *arrivals* overwrite `close`.
///
/// A zero-minute interval has no buckets and yields nothing. A trade whose
/// bucket start does not fit in an `i64` is skipped.
pub fn group_trades_into_candles(trades: &[FeedMessage], interval_minutes: u32) -> Vec<Candle> {
    if interval_minutes == 0 {
        return Vec::new();
    }
    let interval_ms = i64::from(interval_minutes) * MS_PER_MINUTE;

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for trade in trades.iter().filter_map(as_trade) {
        let Some(start) = trade.timestamp.div_euclid(interval_ms).checked_mul(interval_ms) else {
            warn!(sym = %trade.sym, ts = trade.timestamp, "trade timestamp out of range, skipped");
            continue;
        };
        buckets
            .entry(start)
            .and_modify(|c| c.absorb(trade.price))
            .or_insert_with(|| Candle::flat(start, trade.price));
    }
    buckets.into_values().collect()
}

/// Last close, change since the first open, and that change in percent.
///
/// A zero first open is not guarded: the percentage renders as `inf`/`NaN`.
pub fn compute_summary_stats(candles: &[Candle]) -> Option<SummaryStats> {
    let first = candles.first()?;
    let last = candles.last()?;

    let current_price = last.close;
    let change = current_price - first.open;
    let change_percent = change / first.open * 100.0;

    Some(SummaryStats {
        current_price: format!("{current_price:.2}"),
        change: format!("{change:.2}"),
        change_percent: format!("{change_percent:.2}"),
    })
}

fn as_trade(msg: &FeedMessage) -> Option<&TradeTick> {
    match msg {
        FeedMessage::Trade(t) => Some(t),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
