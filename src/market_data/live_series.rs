use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::feed::message::FeedMessage;
use crate::market_data::aggregator::{
    aggregate_minute_bars, compute_summary_stats, group_trades_into_candles,
    update_last_candle_with_trade, Candle, SummaryStats,
};

/// Trades kept per symbol for re-bucketing.
const MAX_TRADES_PER_SYMBOL: usize = 10_000;

// ---------------------------------------------------------------------------
// LiveSeries -- thread-safe candle collection per symbol
// ---------------------------------------------------------------------------

/// Running candle series per symbol, fed from the stream consumer.
///
/// Candles are keyed by interval start: an aggregate bar for a known start
/// replaces that candle, a newer one is appended, and trades are folded into
/// the most recent candle. Each series is trimmed to `max_candles`.
///
/// The most recent trades are also kept, in arrival order, so callers can
/// bucket them into candles of any width.
pub struct LiveSeries {
    series: RwLock<HashMap<String, VecDeque<Candle>>>,
    trades: RwLock<HashMap<String, VecDeque<FeedMessage>>>,
    max_candles: usize,
    max_trades: usize,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl LiveSeries {
    pub fn new(max_candles: usize) -> Self {
        Self::with_trade_capacity(max_candles, MAX_TRADES_PER_SYMBOL)
    }

    fn with_trade_capacity(max_candles: usize, max_trades: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            trades: RwLock::new(HashMap::new()),
            max_candles: max_candles.max(1),
            max_trades: max_trades.max(1),
            last_update: RwLock::new(None),
        }
    }

    /// Fold one inbound batch into the per-symbol series.
    ///
    /// Returns the number of symbols whose series changed. Retained trades
    /// are recorded even when no candle exists yet for their symbol.
    pub fn apply_batch(&self, batch: &[FeedMessage]) -> usize {
        let mut by_symbol: BTreeMap<&str, Vec<FeedMessage>> = BTreeMap::new();
        for msg in batch {
            match msg.symbol() {
                Some(sym) if !sym.is_empty() => {
                    by_symbol.entry(sym).or_default().push(msg.clone());
                }
                _ => {}
            }
        }

        self.retain_trades(&by_symbol);

        let mut touched = 0;
        {
            let mut map = self.series.write();
            for (sym, msgs) in &by_symbol {
                let ring = map
                    .entry((*sym).to_string())
                    .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

                let mut changed = false;
                for candle in aggregate_minute_bars(msgs) {
                    upsert(ring, candle, self.max_candles);
                    changed = true;
                }
                if let Some(updated) = update_last_candle_with_trade(msgs, ring.back()) {
                    if let Some(last) = ring.back_mut() {
                        *last = updated;
                        changed = true;
                    }
                }

                if changed {
                    touched += 1;
                    if let Some(last) = ring.back() {
                        debug!(symbol = %sym, ts = last.timestamp, close = last.close, "candle update");
                    }
                }
            }
        }

        if touched > 0 {
            self.mark_updated();
        }
        touched
    }

    fn retain_trades(&self, by_symbol: &BTreeMap<&str, Vec<FeedMessage>>) {
        let mut map = self.trades.write();
        for (sym, msgs) in by_symbol {
            let mut incoming = msgs
                .iter()
                .filter(|m| matches!(m, FeedMessage::Trade(_)))
                .peekable();
            if incoming.peek().is_none() {
                continue;
            }
            let ring = map.entry((*sym).to_string()).or_default();
            ring.extend(incoming.cloned());
            while ring.len() > self.max_trades {
                ring.pop_front();
            }
        }
    }

    /// Candles for `symbol`, oldest first.
    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        let map = self.series.read();
        map.get(symbol)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Retained trades for `symbol` bucketed into `interval_minutes` candles.
    pub fn trade_candles(&self, symbol: &str, interval_minutes: u32) -> Vec<Candle> {
        let trades: Vec<FeedMessage> = {
            let map = self.trades.read();
            match map.get(symbol) {
                Some(ring) => ring.iter().cloned().collect(),
                None => return Vec::new(),
            }
        };
        group_trades_into_candles(&trades, interval_minutes)
    }

    pub fn stats(&self, symbol: &str) -> Option<SummaryStats> {
        compute_summary_stats(&self.candles(symbol))
    }

    /// Symbols with at least one candle, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let map = self.series.read();
        let mut syms: Vec<String> = map
            .iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(sym, _)| sym.clone())
            .collect();
        syms.sort();
        syms
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<Candle>> {
        let map = self.series.read();
        map.iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(sym, ring)| (sym.clone(), ring.iter().copied().collect()))
            .collect()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }

    fn mark_updated(&self) {
        *self.last_update.write() = Some(Utc::now());
    }
}

/// Keep `ring` ordered by timestamp with one candle per timestamp.
fn upsert(ring: &mut VecDeque<Candle>, candle: Candle, max_candles: usize) {
    match ring.back() {
        Some(last) if last.timestamp == candle.timestamp => {
            ring.pop_back();
            ring.push_back(candle);
        }
        Some(last) if last.timestamp > candle.timestamp => {
            match ring.binary_search_by_key(&candle.timestamp, |c| c.timestamp) {
                Ok(idx) => ring[idx] = candle,
                Err(idx) => ring.insert(idx, candle),
            }
        }
        _ => ring.push_back(candle),
    }
    while ring.len() > max_candles {
        ring.pop_front();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::message::{decode_batch, AggregateBar, TradeTick};

    fn batch(json: &str) -> Vec<FeedMessage> {
        decode_batch(json).expect("fixture should decode")
    }

    fn bar(sym: &str, start: i64, o: f64, h: f64, l: f64, c: f64) -> FeedMessage {
        FeedMessage::Aggregate(AggregateBar {
            sym: sym.into(),
            start,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 0.0,
        })
    }

    fn flat_bar(start: i64, price: f64) -> FeedMessage {
        bar("AAPL", start, price, price, price, price)
    }

    fn trade(sym: &str, t: i64, p: f64) -> FeedMessage {
        FeedMessage::Trade(TradeTick {
            sym: sym.into(),
            timestamp: t,
            price: p,
            size: 1.0,
        })
    }

    #[test]
    fn series_trimming() {
        let live = LiveSeries::new(3);
        for i in 0..5 {
            live.apply_batch(&[flat_bar(i * 60_000, 100.0 + i as f64)]);
        }
        let closes: Vec<f64> = live.candles("AAPL").iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn same_start_replaces() {
        let live = LiveSeries::new(10);
        live.apply_batch(&[flat_bar(0, 50.0)]);
        live.apply_batch(&[flat_bar(0, 51.0)]);
        let candles = live.candles("AAPL");
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 51.0);
    }

    #[test]
    fn late_candle_is_inserted_in_order() {
        let live = LiveSeries::new(10);
        live.apply_batch(&[flat_bar(0, 1.0), flat_bar(120_000, 3.0)]);
        live.apply_batch(&[flat_bar(60_000, 2.0)]);
        let starts: Vec<i64> = live.candles("AAPL").iter().map(|c| c.timestamp).collect();
        assert_eq!(starts, vec![0, 60_000, 120_000]);
    }

    #[test]
    fn batch_routes_bars_and_trades_per_symbol() {
        let live = LiveSeries::new(100);
        let touched = live.apply_batch(&batch(
            r#"[
                {"ev":"AM","sym":"AAPL","s":0,"o":10,"h":12,"l":9,"c":11},
                {"ev":"AM","sym":"MSFT","s":0,"o":300,"h":301,"l":299,"c":300}
            ]"#,
        ));
        assert_eq!(touched, 2);
        assert_eq!(live.symbols(), vec!["AAPL".to_string(), "MSFT".to_string()]);

        live.apply_batch(&batch(
            r#"[
                {"ev":"T","sym":"MSFT","t":1000,"p":305},
                {"ev":"T","sym":"AAPL","t":1000,"p":15},
                {"ev":"T","sym":"AAPL","t":2000,"p":8}
            ]"#,
        ));

        // First AAPL trade wins.
        assert_eq!(live.candles("AAPL"), vec![Candle::new(0, 10.0, 15.0, 9.0, 15.0)]);
        assert_eq!(live.candles("MSFT")[0].high, 305.0);
    }

    #[test]
    fn trades_without_a_candle_change_nothing() {
        let live = LiveSeries::new(10);
        let touched = live.apply_batch(&batch(r#"[{"ev":"T","sym":"AAPL","t":1,"p":1}]"#));
        assert_eq!(touched, 0);
        assert!(live.last_update().is_none());
        assert!(live.candles("AAPL").is_empty());
        assert!(live.symbols().is_empty());
        assert!(live.snapshot().is_empty());
    }

    #[test]
    fn status_only_batch_is_ignored() {
        let live = LiveSeries::new(10);
        assert_eq!(
            live.apply_batch(&batch(r#"[{"ev":"status","status":"auth_success"}]"#)),
            0
        );
        assert!(live.trade_candles("AAPL", 1).is_empty());
    }

    #[test]
    fn stats_follow_series() {
        let live = LiveSeries::new(10);
        live.apply_batch(&[
            bar("AAPL", 0, 100.0, 100.0, 100.0, 100.0),
            bar("AAPL", 60_000, 100.0, 110.0, 100.0, 110.0),
        ]);
        let stats = live.stats("AAPL").unwrap();
        assert_eq!(stats.current_price, "110.00");
        assert!(live.stats("NONE").is_none());
        assert!(live.last_update().is_some());
    }

    #[test]
    fn retained_trades_rebucket_across_batches() {
        let live = LiveSeries::new(10);
        live.apply_batch(&[trade("AAPL", 30_000, 10.0), trade("MSFT", 30_000, 300.0)]);
        live.apply_batch(&[
            trade("AAPL", 200_000, 12.0),
            trade("AAPL", 290_000, 11.0),
            trade("AAPL", 310_000, 9.0),
        ]);

        let five = live.trade_candles("AAPL", 5);
        assert_eq!(
            five,
            vec![
                Candle::new(0, 10.0, 12.0, 10.0, 11.0),
                Candle::new(300_000, 9.0, 9.0, 9.0, 9.0),
            ]
        );
        assert_eq!(live.trade_candles("AAPL", 1).len(), 4);
        assert_eq!(live.trade_candles("MSFT", 1), vec![Candle::flat(0, 300.0)]);
        assert!(live.trade_candles("AAPL", 0).is_empty());
        assert!(live.trade_candles("TSLA", 1).is_empty());
    }

    #[test]
    fn retained_trades_are_capped_oldest_first() {
        let live = LiveSeries::with_trade_capacity(10, 2);
        live.apply_batch(&[
            trade("AAPL", 0, 1.0),
            trade("AAPL", 60_000, 2.0),
            trade("AAPL", 120_000, 3.0),
        ]);
        let closes: Vec<f64> = live.trade_candles("AAPL", 1).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![2.0, 3.0]);
    }
}
