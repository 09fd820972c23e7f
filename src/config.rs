//! Backend configuration loading and validation.
//!
//! Reads a YAML config file and resolves environment variables. Every field
//! has a default matching a stock local Ollama install, so an empty file (or
//! no file at all, via [`BackendConfig::default`]) is a working setup.

use std::path::Path;

use serde::Deserialize;

use crate::errors::ChatError;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Settings for one inference backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Ollama HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name in Ollama format (e.g. "phi4:14b-q8_0").
    #[serde(default = "default_model")]
    pub model: String,
    /// How many consecutive identical stream chunks to tolerate before
    /// cutting the stream off. A text repeating strictly more than this
    /// many times terminates the request early.
    #[serde(default = "default_idle_repeat_threshold")]
    pub idle_repeat_threshold: u32,
    /// TCP connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds, covering the full stream.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "phi4:14b-q8_0".to_string()
}
fn default_idle_repeat_threshold() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    180
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            idle_repeat_threshold: default_idle_repeat_threshold(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Validate the configuration.
    ///
    /// Checks that the endpoint and model are non-empty. Connectivity is
    /// NOT checked here; that happens on the first request.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.base_url.trim().is_empty() {
            return Err(ChatError::ConfigError {
                reason: "base_url must not be empty".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ChatError::ConfigError {
                reason: "model must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load and parse a backend configuration file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`, then validates the result.
/// A trailing slash on `base_url` is trimmed.
pub fn load_backend_config(path: &Path) -> Result<BackendConfig, ChatError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ChatError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    let mut config: BackendConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ChatError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    config.base_url = config.base_url.trim_end_matches('/').to_string();
    config.validate()?;

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            let resolved = resolve_var_expr(&var_expr);
            result.push_str(&resolved);
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
