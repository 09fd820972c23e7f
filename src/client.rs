//! Chat completion client for a local Ollama endpoint.
//!
//! Sends `POST /api/chat` and turns the streamed NDJSON response into a
//! single completion record via the stream decoder and the completion
//! assembler. One request opens one stream and produces one record.

use std::time::Duration;

use reqwest::Client as HttpClient;

use crate::assembler::CompletionAssembler;
use crate::config::BackendConfig;
use crate::errors::ChatError;
use crate::streaming::chunk_stream;
use crate::types::{ChatCompletion, ChatMessage, ChatRequest};

// ─── ChatClient ──────────────────────────────────────────────────────────────

/// Client for a local Ollama chat endpoint.
///
/// Holds one HTTP client built from [`BackendConfig`]. The client is `&self`
/// throughout and safe to share across tasks; each request owns its own
/// stream state.
pub struct ChatClient {
    http: HttpClient,
    config: BackendConfig,
}

impl ChatClient {
    /// Create a client from a validated configuration.
    ///
    /// The request timeout covers the whole streaming response. Local models
    /// can take a long time to emit the first token when the context is
    /// large, and a short timeout cuts streams off in a way that looks like
    /// an empty answer, so the default is generous (180s). Does NOT check
    /// connectivity; that happens on the first request.
    pub fn new(config: BackendConfig) -> Result<Self, ChatError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChatError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    /// The base URL of the configured endpoint.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// The full chat endpoint URL.
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send a chat completion request and assemble the streamed response.
    ///
    /// Connection failures, timeouts before the response, and non-2xx
    /// statuses abort with an error. Once the stream is open, the assembler
    /// decides the outcome: a terminal chunk, a repeat-guard trip, and a
    /// transport early-close all yield a completion; decode failures and
    /// mid-stream read errors abort.
    ///
    /// Dropping the returned future (caller timeout, disconnect) drops the
    /// response stream and closes the connection; no record is produced.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatCompletion, ChatError> {
        let url = self.chat_url();
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages,
        };

        // Log the request metadata (not the full body, which can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            "=== CHAT REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ChatError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                } else if e.is_timeout() {
                    ChatError::Timeout {
                        duration_secs: self.config.request_timeout_secs,
                    }
                } else {
                    ChatError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ChatError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        CompletionAssembler::new(self.config.model.clone(), self.config.idle_repeat_threshold)
            .assemble(chunk_stream(response))
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
