//! Bounded-concurrency, retrying, metric-instrumented wrapper around the
//! external completion endpoint (C13, spec §4.13).

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::config::LlmConfig;

/// Returned when the provider rejects the API key; the caller should not
/// retry (spec §4.13: "authentication errors terminate immediately").
pub const AUTH_ERROR_SENTINEL: &str = "__llm_auth_error__";

static LLM_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "llm_requests_total",
        "LLM completion requests by outcome",
        &["outcome"]
    )
    .expect("register llm_requests_total")
});

static LLM_REQUEST_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "llm_request_latency_seconds",
        "LLM completion request latency",
        &["outcome"]
    )
    .expect("register llm_request_latency_seconds")
});

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed")]
    Auth,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("max retries exceeded")]
    RetriesExceeded,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
    semaphore: Arc<Semaphore>,
    endpoint: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self::with_endpoint(config, "https://api.openai.com/v1/chat/completions".to_string())
    }

    pub fn with_endpoint(config: LlmConfig, endpoint: String) -> Self {
        Self {
            http: Client::new(),
            semaphore: Arc::new(Semaphore::new(5)),
            config,
            endpoint,
        }
    }

    /// Performs a JSON-mode chat completion with retry. `max_attempts`
    /// bounds retries on transport errors only; auth errors never retry.
    pub async fn call(&self, system_prompt: &str, user_prompt: &str, max_attempts: u32) -> Result<String, LlmError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::Transport("semaphore closed".to_string()))?;

        // `resilience::with_retry` retries any `Err` from the closure; auth
        // failures must terminate immediately instead, so they're surfaced
        // as an inner `Err` wrapped in an outer `Ok` to short-circuit the
        // retry loop (spec §4.13).
        let config = resilience::RetryConfig {
            max_retries: max_attempts.saturating_sub(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        let outcome = resilience::with_retry(config, || async {
            let started = Instant::now();
            match self.complete_once(system_prompt, user_prompt).await {
                Ok(text) => {
                    LLM_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                    LLM_REQUEST_LATENCY_SECONDS
                        .with_label_values(&["success"])
                        .observe(started.elapsed().as_secs_f64());
                    Ok(Ok(text))
                }
                Err(LlmError::Auth) => {
                    LLM_REQUESTS_TOTAL.with_label_values(&["auth_error"]).inc();
                    LLM_REQUEST_LATENCY_SECONDS
                        .with_label_values(&["auth_error"])
                        .observe(started.elapsed().as_secs_f64());
                    error!("LLM authentication failed, not retrying");
                    Ok(Err(LlmError::Auth))
                }
                Err(e) => {
                    LLM_REQUESTS_TOTAL.with_label_values(&["failure"]).inc();
                    LLM_REQUEST_LATENCY_SECONDS
                        .with_label_values(&["failure"])
                        .observe(started.elapsed().as_secs_f64());
                    warn!(error = %e, "LLM call failed, retrying");
                    Err(e)
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(auth_err)) => Err(auth_err),
            Err(_) => {
                warn!(attempts = max_attempts, "LLM call exhausted retries");
                Err(LlmError::RetriesExceeded)
            }
        }
    }

    /// Single sentence/question embedding, used by the classifier (C8) and
    /// popular-query dedup (C11). Not subject to the completion retry
    /// policy: embedding failures degrade to a neutral default at the
    /// caller (spec §4.8, §4.11).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::Transport("semaphore closed".to_string()))?;

        let endpoint = self.endpoint.replace("/chat/completions", "/embeddings");
        let body = EmbeddingRequest { model: "text-embedding-3-small", input: text };

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::Auth);
        }
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("status {}", response.status())));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::Transport("empty embedding response".to_string()))
    }

    async fn complete_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: true,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(LlmError::Auth);
        }
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("status {}", response.status())));
        }

        self.accumulate_stream(response).await
    }

    /// Each request streams tokens and concatenates them (spec §4.13): the
    /// provider emits Server-Sent Events framed as `data: {json}` lines,
    /// terminated by `data: [DONE]`.
    async fn accumulate_stream(&self, response: reqwest::Response) -> Result<String, LlmError> {
        let mut answer = String::new();
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" || payload.is_empty() {
                    continue;
                }
                if let Ok(parsed) = serde_json::from_str::<StreamChunk>(payload) {
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content {
                            answer.push_str(&content);
                        }
                    }
                }
            }
        }

        Ok(answer)
    }
}
