pub mod client;
pub mod market_hours;

pub use client::{PolygonClient, DEFAULT_REST_BASE_URL};
pub use market_hours::is_market_open;
