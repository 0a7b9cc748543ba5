//! OpenRouter LLM integration.
//!
//! Routes evaluator calls through OpenRouter's unified API, giving access to
//! multiple model providers with a single API key. Uses the OpenAI-compatible
//! chat completions format.
//!
//! Primary model: Gemini 2.0 Flash (fast and cheap for short JSON verdicts).
//! Fallback model: optional, used when the primary exhausts its retries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::prompt::{build_prompt, parse_judgment, SYSTEM_PROMPT};
use super::EdgeEvaluator;
use crate::types::{EvaluationResult, MarketSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub const DEFAULT_PRIMARY_MODEL: &str = "google/gemini-2.0-flash-001";

const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Maximum retries on rate limit / server errors per model attempt.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

impl ChatResponse {
    fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.as_str())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    primary_model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    temperature: f32,
    app_title: String,
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client.
    ///
    /// - `primary_model`: model ID, defaults to [`DEFAULT_PRIMARY_MODEL`].
    /// - `fallback_model`: tried once the primary has exhausted its retries.
    pub fn new(
        api_key: SecretString,
        primary_model: Option<String>,
        fallback_model: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            primary_model: primary_model.unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model: fallback_model.filter(|m| !m.trim().is_empty()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: temperature.unwrap_or(DEFAULT_TEMPERATURE),
            app_title: "EDGESCOUT".to_string(),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Title sent in the `X-Title` header for OpenRouter attribution.
    pub fn with_app_title(mut self, title: &str) -> Self {
        self.app_title = title.to_string();
        self
    }

    fn build_request(&self, model: &str, system: &str, user_message: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
        }
    }

    /// Send a chat completion request for a specific model, with retry +
    /// exponential backoff on 429 / 5xx / transport errors.
    async fn call_model(&self, model: &str, system: &str, user_message: &str) -> Result<String> {
        let request = self.build_request(model, system, user_message);
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model, "Retrying OpenRouter API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(OPENROUTER_API_URL)
                .bearer_auth(self.api_key.expose_secret())
                .header("X-Title", &self.app_title)
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenRouter response")?;
                        self.total_calls.fetch_add(1, Ordering::Relaxed);

                        return body
                            .text()
                            .map(|t| t.trim().to_string())
                            .with_context(|| format!("OpenRouter returned no choices (model={model})"));
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = %status, attempt, model, error = %error_text, "Retryable OpenRouter error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    anyhow::bail!("OpenRouter API error {status} (model={model}): {error_text}");
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "OpenRouter API failed after {} retries (model={}): {}",
            MAX_RETRIES,
            model,
            last_error.unwrap_or_default()
        )
    }

    /// Call the primary model, falling back to the secondary if configured
    /// and the primary fails.
    async fn call_api(&self, system: &str, user_message: &str) -> Result<String> {
        match self.call_model(&self.primary_model, system, user_message).await {
            Ok(text) => Ok(text),
            Err(primary_err) => match self.fallback_model {
                Some(ref fallback) => {
                    warn!(
                        primary = %self.primary_model,
                        fallback = %fallback,
                        error = %primary_err,
                        "Primary model failed, falling back"
                    );
                    self.call_model(fallback, system, user_message)
                        .await
                        .with_context(|| {
                            format!(
                                "Both primary ({}) and fallback ({}) models failed. Primary error: {}",
                                self.primary_model, fallback, primary_err
                            )
                        })
                }
                None => Err(primary_err),
            },
        }
    }

    /// Total number of successful API calls made.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// EdgeEvaluator implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl EdgeEvaluator for OpenRouterClient {
    async fn evaluate(&self, market: &MarketSnapshot, context: Option<&str>) -> EvaluationResult {
        let user_msg = build_prompt(market, context);
        debug!(
            market_id = %market.market_id,
            model = %self.primary_model,
            "Requesting edge evaluation via OpenRouter"
        );

        match self.call_api(SYSTEM_PROMPT, &user_msg).await {
            Ok(text) => parse_judgment(&text),
            Err(e) => EvaluationResult::ProviderError(format!("{e:#}")),
        }
    }

    fn model_name(&self) -> &str {
        &self.primary_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
