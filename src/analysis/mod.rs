pub mod client;
pub mod recommendation;

pub use client::{AnalysisError, ChartAnalyst, DEFAULT_ANALYSIS_ENDPOINT, DEFAULT_ANALYSIS_MODEL};
pub use recommendation::Recommendation;
