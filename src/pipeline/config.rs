//! Generator configuration.
//!
//! This module provides configuration for a generation run: provider endpoint
//! and model, concurrency and round limits, per-phase temperatures, the
//! observer queue size, context depth and the optional validation command.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a generation run.
#[derive(Clone)]
pub struct GeneratorConfig {
    // Provider settings
    /// Base URL of the chat-completions endpoint.
    pub api_base: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Coarse per-call timeout for provider requests.
    pub request_timeout: Duration,

    // Execution settings
    /// Maximum number of targets generated concurrently.
    pub max_concurrency: usize,
    /// Round limit applied to each phase invocation.
    pub max_rounds: usize,
    /// Temperature for the context-gathering phase.
    pub context_temperature: f64,
    /// Temperature for the implementation phase.
    pub implementation_temperature: f64,

    // Observer and context settings
    /// Capacity of the bounded observer event queue.
    pub event_buffer: usize,
    /// How many reference hops the type-context provider follows.
    pub context_depth: usize,
    /// External validation command; `{file}` is replaced by the code path.
    pub validate_command: Option<String>,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("max_concurrency", &self.max_concurrency)
            .field("max_rounds", &self.max_rounds)
            .field("context_temperature", &self.context_temperature)
            .field("implementation_temperature", &self.implementation_temperature)
            .field("event_buffer", &self.event_buffer)
            .field("context_depth", &self.context_depth)
            .field("validate_command", &self.validate_command)
            .finish()
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            model: "anthropic/claude-sonnet-4.5".to_string(),
            request_timeout: Duration::from_secs(120),

            max_concurrency: 16,
            max_rounds: 30,
            context_temperature: 0.2,
            implementation_temperature: 0.1,

            event_buffer: 1024,
            context_depth: 2,
            validate_command: None,
        }
    }
}

impl GeneratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `IMPL_FORGE_API_BASE`: Endpoint base URL (default: https://openrouter.ai/api/v1)
    /// - `IMPL_FORGE_API_KEY`: Bearer token (optional)
    /// - `IMPL_FORGE_MODEL`: Model identifier (default: anthropic/claude-sonnet-4.5)
    /// - `IMPL_FORGE_REQUEST_TIMEOUT_SECS`: Provider call timeout (default: 120)
    /// - `IMPL_FORGE_MAX_CONCURRENCY`: Concurrent targets (default: 16)
    /// - `IMPL_FORGE_MAX_ROUNDS`: Rounds per phase (default: 30)
    /// - `IMPL_FORGE_CONTEXT_TEMPERATURE`: Phase 1 temperature (default: 0.2)
    /// - `IMPL_FORGE_IMPLEMENTATION_TEMPERATURE`: Phase 2 temperature (default: 0.1)
    /// - `IMPL_FORGE_EVENT_BUFFER`: Observer queue capacity (default: 1024)
    /// - `IMPL_FORGE_CONTEXT_DEPTH`: Type-context hops (default: 2)
    /// - `IMPL_FORGE_VALIDATE_COMMAND`: Validation command (optional)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Provider settings
        if let Ok(val) = std::env::var("IMPL_FORGE_API_BASE") {
            config.api_base = val;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_API_KEY") {
            if !val.trim().is_empty() {
                config.api_key = Some(val);
            }
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_MODEL") {
            config.model = val;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "IMPL_FORGE_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }

        // Execution settings
        if let Ok(val) = std::env::var("IMPL_FORGE_MAX_CONCURRENCY") {
            config.max_concurrency = parse_env_value(&val, "IMPL_FORGE_MAX_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_MAX_ROUNDS") {
            config.max_rounds = parse_env_value(&val, "IMPL_FORGE_MAX_ROUNDS")?;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_CONTEXT_TEMPERATURE") {
            config.context_temperature = parse_env_value(&val, "IMPL_FORGE_CONTEXT_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_IMPLEMENTATION_TEMPERATURE") {
            config.implementation_temperature =
                parse_env_value(&val, "IMPL_FORGE_IMPLEMENTATION_TEMPERATURE")?;
        }

        // Observer and context settings
        if let Ok(val) = std::env::var("IMPL_FORGE_EVENT_BUFFER") {
            config.event_buffer = parse_env_value(&val, "IMPL_FORGE_EVENT_BUFFER")?;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_CONTEXT_DEPTH") {
            config.context_depth = parse_env_value(&val, "IMPL_FORGE_CONTEXT_DEPTH")?;
        }

        if let Ok(val) = std::env::var("IMPL_FORGE_VALIDATE_COMMAND") {
            if !val.trim().is_empty() {
                config.validate_command = Some(val);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "api_base cannot be empty".to_string(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if self.request_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_rounds must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.context_temperature) {
            return Err(ConfigError::ValidationFailed(
                "context_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.implementation_temperature) {
            return Err(ConfigError::ValidationFailed(
                "implementation_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        if let Some(ref cmd) = self.validate_command {
            if !cmd.contains("{file}") {
                return Err(ConfigError::ValidationFailed(
                    "validate_command must contain the {file} placeholder".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Builder method to set the endpoint base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Builder method to set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set the provider call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder method to set max concurrent targets.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Builder method to set the per-phase round limit.
    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max;
        self
    }

    /// Builder method to set both phase temperatures.
    pub fn with_temperatures(mut self, context: f64, implementation: f64) -> Self {
        self.context_temperature = context;
        self.implementation_temperature = implementation;
        self
    }

    /// Builder method to set the observer queue capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Builder method to set the type-context depth.
    pub fn with_context_depth(mut self, depth: usize) -> Self {
        self.context_depth = depth;
        self
    }

    /// Builder method to set the validation command.
    pub fn with_validate_command(mut self, command: impl Into<String>) -> Self {
        self.validate_command = Some(command.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
