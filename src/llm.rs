//! LLM Client
//!
//! Chat-completion access to an OpenAI-compatible endpoint with a per-call
//! timeout and a bounded retry loop. Transient failures (timeouts, server
//! errors) back off exponentially with jitter; rate limits wait a longer
//! fixed interval before retrying.

use crate::config::Settings;
use crate::error::{Result, SenseError};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::{error, warn};

/// Text-completion capability consumed by the generation pipeline.
///
/// Production uses [`LlmClient`]; tests substitute scripted responses.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String>;
}

enum CallFailure {
    Transient(String),
    RateLimited(String),
    Fatal(String),
}

pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.llm_timeout_seconds))
            .build()
            .map_err(|e| SenseError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: settings.llm_api_key.clone(),
            base_url: settings.llm_base_url.trim_end_matches('/').to_string(),
            max_retries: settings.llm_max_retries.max(1),
        })
    }

    async fn call_chat(&self, prompt: &str, model: &str) -> std::result::Result<String, CallFailure> {
        let body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallFailure::Transient(format!("Request timed out: {}", e))
                } else {
                    CallFailure::Transient(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CallFailure::RateLimited(format!("Rate limited ({})", status)));
        }
        if status.is_server_error() {
            return Err(CallFailure::Transient(format!("Server error ({})", status)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CallFailure::Fatal(format!("API error ({}): {}", status, detail)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CallFailure::Transient(format!("Failed to parse response: {}", e)))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CallFailure::Fatal("No content in completion response".to_string()))
    }
}

#[async_trait]
impl CompletionModel for LlmClient {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        for attempt in 1..=self.max_retries {
            match self.call_chat(prompt, model).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {
                    warn!("Empty LLM response on attempt {}", attempt);
                }
                Err(CallFailure::Transient(msg)) => {
                    warn!("Transient LLM failure on attempt {}: {}", attempt, msg);
                }
                Err(CallFailure::RateLimited(msg)) => {
                    warn!("Rate limited on attempt {}: {}", attempt, msg);
                    if attempt < self.max_retries {
                        tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                    }
                    continue;
                }
                Err(CallFailure::Fatal(msg)) => {
                    error!("Fatal LLM failure: {}", msg);
                    return Err(SenseError::Llm(msg));
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(transient_backoff(attempt)).await;
            }
        }

        Err(SenseError::Llm(format!(
            "No usable response after {} attempts",
            self.max_retries
        )))
    }
}

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

fn transient_backoff(attempt: u32) -> Duration {
    let base_ms = 1000u64.saturating_mul(1 << attempt.min(5));
    let jitter_ms = rand::thread_rng().gen_range(0..500);
    Duration::from_millis(base_ms + jitter_ms)
}
