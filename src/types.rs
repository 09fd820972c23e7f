//! Shared types for the chat client.
//!
//! The request and chunk types mirror the Ollama `/api/chat` wire format.
//! The completion types mirror the OpenAI chat-completion object, so callers
//! written against that schema work unmodified.

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Request body for `POST /api/chat`.
///
/// Ollama streams the response by default for this endpoint, so the body
/// carries no `stream` flag.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

// ─── Stream Chunk Types ──────────────────────────────────────────────────────

/// One decoded line from the streaming response.
///
/// Every line carries `message.content` and `done`; lines missing either
/// fail deserialization and surface as decode errors. The usage counts
/// appear only on the terminal (`done: true`) line.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    pub message: ChunkMessage,
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

/// The message payload within a stream chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkMessage {
    pub content: String,
}

// ─── Completion Types ────────────────────────────────────────────────────────

/// A completed chat response, one per request.
///
/// Field names and shapes follow the OpenAI chat-completion object exactly,
/// including its quirks (see [`CompletionUsage`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Unique record id, `"chatcmpl-<uuid>"`.
    pub id: String,
    /// Always `"chat.completion"`.
    pub object: String,
    /// Milliseconds since the Unix epoch at assembly time.
    pub created: i64,
    pub model: String,
    pub system_fingerprint: String,
    /// Exactly one choice, index 0.
    pub choices: Vec<CompletionChoice>,
    pub usage: CompletionUsage,
}

/// A single choice within a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: FinishReason,
}

/// The assistant message within a completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

/// Why the model stopped.
///
/// Every termination path here reports [`Stop`](FinishReason::Stop),
/// including guard trips and early closes. The remaining variants exist for
/// schema compatibility with callers that match on the full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    FunctionCall,
}

/// Token usage for a completion.
///
/// The counts are decimal strings, not numbers. The mirrored schema reports
/// them this way and downstream consumers depend on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: String,
    pub completion_tokens: String,
    pub total_tokens: String,
}

impl CompletionUsage {
    /// Build usage strings from the backend's raw counts.
    pub fn from_counts(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt.to_string(),
            completion_tokens: completion.to_string(),
            total_tokens: (prompt + completion).to_string(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
