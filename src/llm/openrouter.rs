//! OpenRouter advisory client.
//!
//! Routes advisory calls through OpenRouter's unified API (OpenAI-compatible
//! chat completions), so any hosted model can act as the advisor with a
//! single API key. A fallback model is tried when the primary fails.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::{build_prompt, parse_suggestion, system_prompt, AdvisoryContext, AdvisoryOracle};
use crate::types::AdvisorySuggestion;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const DEFAULT_PRIMARY_MODEL: &str = "anthropic/claude-sonnet-4";

const DEFAULT_MAX_TOKENS: u32 = 256;

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

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterAdvisor {
    http: Client,
    api_key: SecretString,
    primary_model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    total_calls: AtomicU64,
    malformed_replies: AtomicU64,
}

impl OpenRouterAdvisor {
    /// Create a new advisor.
    ///
    /// - `api_key`: OpenRouter API key.
    /// - `primary_model`: model ID, defaults to `anthropic/claude-sonnet-4`.
    /// - `fallback_model`: tried when the primary fails.
    /// - `timeout_secs`: per-request HTTP timeout.
    pub fn new(
        api_key: SecretString,
        primary_model: Option<String>,
        fallback_model: Option<String>,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            primary_model: primary_model.unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_calls: AtomicU64::new(0),
            malformed_replies: AtomicU64::new(0),
        })
    }

    /// Send a chat completion request for a specific model, with retry +
    /// exponential backoff on 429 / 5xx / transport errors.
    async fn call_model(&self, model: &str, system: &str, user_message: &str) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            temperature: 0.2,
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
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model, "Retrying OpenRouter API call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(OPENROUTER_API_URL)
                .header(
                    "Authorization",
                    format!("Bearer {}", self.api_key.expose_secret()),
                )
                .header("Content-Type", "application/json")
                .header("X-Title", "AEGIS Trading Core")
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
                        return Ok(body
                            .choices
                            .first()
                            .and_then(|c| c.message.as_ref())
                            .map(|m| m.content.clone())
                            .unwrap_or_default());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(
                            status = %status,
                            attempt,
                            model,
                            error = %error_text,
                            "Retryable OpenRouter error"
                        );
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("OpenRouter API error {status} (model={model}): {error_text}");
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
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

    /// Call the primary model, falling back to the secondary if configured.
    async fn call_api(&self, system: &str, user_message: &str) -> Result<String> {
        match self.call_model(&self.primary_model, system, user_message).await {
            Ok(text) => Ok(text),
            Err(primary_err) => match &self.fallback_model {
                Some(fallback) => {
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

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub fn malformed_replies(&self) -> u64 {
        self.malformed_replies.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// AdvisoryOracle implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl AdvisoryOracle for OpenRouterAdvisor {
    async fn suggest(&self, context: &AdvisoryContext) -> Result<Option<AdvisorySuggestion>> {
        let user_msg = build_prompt(context);
        debug!(
            instrument = %context.instrument.id,
            model = %self.primary_model,
            "Requesting advisory suggestion"
        );

        let reply = self
            .call_api(system_prompt(), &user_msg)
            .await
            .context("OpenRouter advisory call failed")?;

        match parse_suggestion(&reply) {
            Some(suggestion) => {
                info!(
                    instrument = %context.instrument.id,
                    action = %suggestion.action,
                    confidence = format!("{:.0}%", suggestion.confidence * 100.0),
                    "Advisory suggestion received"
                );
                Ok(Some(suggestion))
            }
            None => {
                self.malformed_replies.fetch_add(1, Ordering::Relaxed);
                warn!(
                    instrument = %context.instrument.id,
                    reply = %crate::strategy::signal::truncate(&reply, 120),
                    "Malformed advisory reply ignored"
                );
                Ok(None)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.primary_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
