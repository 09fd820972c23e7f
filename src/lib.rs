//! OpenAI-shaped chat completions streamed from a local Ollama endpoint.
//!
//! This crate is a compatibility shim: callers send an OpenAI-style list of
//! chat messages and receive one OpenAI-style completion object, while
//! underneath a single streaming `POST /api/chat` request feeds a local
//! Ollama server's token stream through:
//! - a stream decoder turning newline-delimited JSON lines into chunks
//! - a repeat guard that cuts off backends stuck emitting one token forever
//! - a completion assembler building one fixed-schema record per request
//!
//! The record shape is guaranteed regardless of how the stream ended. A
//! normal finish, a repeat-guard trip, and a transport early-close all
//! produce a usable completion; only transport failures and undecodable
//! stream lines abort without one.

pub mod assembler;
pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use assembler::{CompletionAssembler, RepeatGuard};
pub use client::ChatClient;
pub use config::{load_backend_config, BackendConfig};
pub use errors::ChatError;
pub use streaming::chunk_stream;
pub use types::{
    ChatChunk, ChatCompletion, ChatMessage, ChatRequest, CompletionUsage, FinishReason, Role,
};
