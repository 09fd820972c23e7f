//! Chat completion error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility. These types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while requesting or assembling a chat completion.
///
/// Two stream outcomes are deliberately NOT errors: a repeat-guard trip and a
/// transport close before the final chunk. Both still yield a completion with
/// whatever text arrived. Only the variants below abort without a result.
#[derive(Debug, Error)]
pub enum ChatError {
    /// TCP/HTTP connection to the backend endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The backend did not respond within the configured timeout.
    #[error("request timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the backend endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// A stream line could not be parsed into a chunk.
    ///
    /// Always aborts the request: skipping an undecodable line would leave a
    /// hole of unknown size in the accumulated text.
    #[error("decode error: {reason}")]
    DecodeError {
        reason: String,
    },

    /// Transport read failure while the stream was live.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}
