// =============================================================================
// Chart Analyst — vision chat-completions proxy
// =============================================================================
//
// Sends a chart screenshot plus a structured options-trade prompt to a
// chat-completions endpoint and returns the first choice's text. The API key
// is never logged and the Debug impl redacts it.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument};

pub const DEFAULT_ANALYSIS_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gpt-4o";

const MAX_TOKENS: u32 = 600;

const SYSTEM_PROMPT: &str = "You are a specialized options trading analyst. You can see and \
analyze stock charts to provide specific options trading recommendations.";

#[derive(Debug)]
pub enum AnalysisError {
    MissingImage,
    MissingApiKey,
    Upstream(anyhow::Error),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingImage => write!(f, "missing image data"),
            Self::MissingApiKey => write!(f, "analysis API key is not configured"),
            Self::Upstream(e) => write!(f, "chart analysis failed: {e:#}"),
        }
    }
}

impl std::error::Error for AnalysisError {}

#[derive(Clone)]
pub struct ChartAnalyst {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl ChartAnalyst {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            client,
        })
    }

    /// Analyse a chart image (bare base64 or data URL) for `symbol` on `date`.
    #[instrument(skip(self, image), fields(image_len = image.len()), name = "analysis::analyze")]
    pub async fn analyze(&self, image: &str, symbol: &str, date: &str) -> Result<String, AnalysisError> {
        if image.trim().is_empty() {
            return Err(AnalysisError::MissingImage);
        }
        if self.api_key.is_empty() {
            return Err(AnalysisError::MissingApiKey);
        }

        let body = self.request_body(image, symbol, date);
        self.send(&body).await.map_err(AnalysisError::Upstream)
    }

    fn request_body(&self, image: &str, symbol: &str, date: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_prompt(symbol, date) },
                        {
                            "type": "image_url",
                            "image_url": { "url": image_data_url(image), "detail": "high" }
                        }
                    ]
                }
            ],
            "max_tokens": MAX_TOKENS,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<String> {
        info!(model = %self.model, "sending chart for analysis");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("POST chat completions request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse chat completions response")?;

        if !status.is_success() {
            anyhow::bail!("chat completions returned {}: {}", status, body);
        }

        let text = first_choice_text(&body)?;
        debug!(chars = text.len(), "analysis received");
        Ok(text)
    }
}

fn user_prompt(symbol: &str, date: &str) -> String {
    format!(
        "Based on this chart image of {symbol} for {date}, please analyze and provide:\n\n\
         1. OPTION TYPE: Recommend whether this setup indicates a call or put position.\n\n\
         2. STRIKE PRICE: Suggest the optimal strike price based on the technical setup.\n\n\
         3. ENTRY PRICE: Specify the ideal entry price or range for this options contract.\n\n\
         4. EXIT STRATEGY: Define both a profit target price and stop-loss level.\n\n\
         5. RATIONALE: Explain the technical setup or pattern visible in the chart that \
         justifies this trade.\n\n\
         Please organize your response in these five clearly labeled sections."
    )
}

/// Normalise to `data:image/{png|jpeg};base64,...`.
fn image_data_url(image: &str) -> String {
    let kind = if image.contains("data:image/png") {
        "png"
    } else {
        "jpeg"
    };
    let payload = match image.split_once(',') {
        Some((_, b64)) => b64,
        None => image,
    };
    format!("data:image/{kind};base64,{payload}")
}

fn first_choice_text(body: &serde_json::Value) -> Result<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .context("chat completions response has no message content")
}

impl std::fmt::Debug for ChartAnalyst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartAnalyst")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyst(key: &str) -> ChartAnalyst {
        ChartAnalyst::new(key, DEFAULT_ANALYSIS_ENDPOINT, DEFAULT_ANALYSIS_MODEL).unwrap()
    }

    #[test]
    fn data_url_normalisation() {
        assert_eq!(image_data_url("QUJD"), "data:image/jpeg;base64,QUJD");
        assert_eq!(
            image_data_url("data:image/png;base64,QUJD"),
            "data:image/png;base64,QUJD"
        );
        assert_eq!(
            image_data_url("data:image/webp;base64,QUJD"),
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn request_shape() {
        let body = analyst("k").request_body("QUJD", "AAPL", "2024-03-01");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 600);
        assert_eq!(body["messages"][0]["role"], "system");
        let content = &body["messages"][1]["content"];
        assert!(content[0]["text"].as_str().unwrap().contains("AAPL for 2024-03-01"));
        assert!(content[0]["text"].as_str().unwrap().contains("5. RATIONALE"));
        assert_eq!(content[1]["image_url"]["detail"], "high");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn choice_text_extraction() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Buy calls"}}]});
        assert_eq!(first_choice_text(&body).unwrap(), "Buy calls");
        assert!(first_choice_text(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn validation_precedes_any_request() {
        assert!(matches!(
            analyst("k").analyze("  ", "AAPL", "2024-03-01").await,
            Err(AnalysisError::MissingImage)
        ));
        assert!(matches!(
            analyst("").analyze("QUJD", "AAPL", "2024-03-01").await,
            Err(AnalysisError::MissingApiKey)
        ));
    }

    #[test]
    fn debug_redacts_key() {
        assert!(!format!("{:?}", analyst("sk-secret")).contains("sk-secret"));
    }
}
