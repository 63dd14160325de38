// =============================================================================
// Runtime Configuration — feed, history and API settings with atomic save
// =============================================================================
//
// Non-secret settings for the journal backend. Secrets (venue key, analysis
// key, API bearer token) come from the environment only and never land in
// this file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::{DEFAULT_ANALYSIS_ENDPOINT, DEFAULT_ANALYSIS_MODEL};
use crate::feed::DEFAULT_RECONNECT_DELAY;
use crate::polygon::DEFAULT_REST_BASE_URL;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_feed_url() -> String {
    "wss://socket.polygon.io/stocks".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["AAPL".to_string(), "MSFT".to_string(), "SPY".to_string()]
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_max_candles() -> usize {
    // One full day of minute bars.
    1440
}

fn default_rest_base_url() -> String {
    DEFAULT_REST_BASE_URL.to_string()
}

fn default_analysis_endpoint() -> String {
    DEFAULT_ANALYSIS_ENDPOINT.to_string()
}

fn default_analysis_model() -> String {
    DEFAULT_ANALYSIS_MODEL.to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Live feed ------------------------------------------------------------

    /// Streaming endpoint for the quote feed.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Symbols subscribed at startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Fixed delay between a disconnect and the next connection attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Candles retained per symbol in the live series.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    // --- Outbound HTTP --------------------------------------------------------

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Chat-completions endpoint used for chart analysis.
    #[serde(default = "default_analysis_endpoint")]
    pub analysis_endpoint: String,

    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,

    // --- API server -----------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            symbols: default_symbols(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_candles: default_max_candles(),
            rest_base_url: default_rest_base_url(),
            analysis_endpoint: default_analysis_endpoint(),
            analysis_model: default_analysis_model(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            feed_url = %config.feed_url,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    pub fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Replace the startup symbol list from a comma-separated override.
    /// Entries are trimmed and upper-cased; blanks are skipped.
    pub fn apply_symbols_override(&mut self, raw: &str) {
        let symbols: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            self.symbols = symbols;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.feed_url, "wss://socket.polygon.io/stocks");
        assert_eq!(cfg.symbols, vec!["AAPL", "MSFT", "SPY"]);
        assert_eq!(cfg.reconnect_delay_ms, 3000);
        assert_eq!(cfg.max_candles, 1440);
        assert_eq!(cfg.rest_base_url, "https://api.polygon.io");
        assert_eq!(cfg.analysis_model, "gpt-4o");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.reconnect_delay_ms, 3000);
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["TSLA"], "reconnect_delay_ms": 500 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["TSLA"]);
        assert_eq!(cfg.reconnect_delay(), std::time::Duration::from_millis(500));
        assert_eq!(cfg.max_candles, 1440);
    }

    #[test]
    fn symbols_override() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_symbols_override(" tsla, ,nvda ");
        assert_eq!(cfg.symbols, vec!["TSLA", "NVDA"]);

        cfg.apply_symbols_override(" , ");
        assert_eq!(cfg.symbols, vec!["TSLA", "NVDA"]);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("journal-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("journal_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbols = vec!["QQQ".to_string()];
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["QQQ"]);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
