pub mod aggregator;
pub mod live_series;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use aggregator::{Candle, SummaryStats};
pub use live_series::LiveSeries;
