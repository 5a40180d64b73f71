//! Error types for impl-forge operations.
//!
//! Subsystem-specific errors live next to the code that raises them
//! (`ToolError`, `AgentError`, `ContextError`, `ConfigError`,
//! `ManifestError`). This module holds the provider-facing error shared by
//! the client and the conversation driver.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: IMPL_FORGE_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl LlmError {
    /// Short machine-readable tag used in failure contexts.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::MissingApiBase => "configuration",
            LlmError::RequestFailed(_) => "transport",
            LlmError::Timeout { .. } => "timeout",
            LlmError::ParseError(_) => "parse",
            LlmError::RateLimited(_) => "rate_limited",
            LlmError::ApiError { .. } => "api",
            LlmError::InvalidRequest(_) => "invalid_request",
            LlmError::ClientBuild(_) => "configuration",
        }
    }
}
