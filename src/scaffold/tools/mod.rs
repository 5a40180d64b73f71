//! Tool definitions and registry for the scaffold system.
//!
//! This module defines the `Tool` capability the conversation driver depends
//! on, the context handed to every execution, and an ordered registry. Tool
//! sets are assembled explicitly through the registry constructors; nothing is
//! discovered at runtime.

pub mod file;
pub mod search;
pub mod validate;

pub use file::ReadSourceTool;
pub use search::SearchSourceTool;
pub use validate::{
    CheckImplementationTool, CodeValidator, CommandValidator, NonEmptyValidator,
    SubmitImplementationTool, ValidationReport,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::ToolDefinition;

/// Parameter mapping handed to a tool after argument decoding.
pub type ToolParams = Map<String, Value>;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Something the tool was asked about does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Submitted code did not pass validation.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Tool execution timed out.
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The run was cancelled while the tool was executing.
    #[error("Cancelled")]
    Cancelled,

    /// Access outside the permitted source root.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// File system error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Error-kind tag carried in the structured error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::NotFound(_) => "not_found",
            ToolError::ExecutionFailed(_) => "execution_failed",
            ToolError::ValidationFailed(_) => "validation_failed",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Cancelled => "cancelled",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::Io(_) => "io",
        }
    }
}

/// Successful value produced by a tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Raw text, passed to the model verbatim.
    Text(String),
    /// Structured value, serialized as JSON.
    Structured(Value),
    /// No value; encoded as an explicit `null`.
    Empty,
}

impl ToolOutput {
    /// Encode the value as tool-message content.
    pub fn encode(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Structured(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
            }
            ToolOutput::Empty => "null".to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ToolOutput::Empty,
            Value::String(text) => ToolOutput::Text(text),
            other => ToolOutput::Structured(other),
        }
    }
}

/// Context for one tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Name of the target the conversation is about.
    pub target_name: String,
    /// Root directory inspection tools are confined to.
    pub source_root: PathBuf,
    /// File holding the target's stub, relative to the source root.
    pub source_file: Option<PathBuf>,
    /// Cooperative cancellation; tools must observe it promptly.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(target_name: impl Into<String>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            target_name: target_name.into(),
            source_root: source_root.into(),
            source_file: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_source_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.source_file = Some(file.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a model-supplied relative path inside the source root.
    ///
    /// Existing paths are canonicalized so symlinks cannot lead outside.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, ToolError> {
        if raw.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "Path cannot be empty".to_string(),
            ));
        }
        if raw.contains('\0') {
            return Err(ToolError::InvalidParameters(
                "Path contains invalid null character".to_string(),
            ));
        }

        let path = Path::new(raw);
        if path.is_absolute() {
            return Err(ToolError::PermissionDenied(format!(
                "absolute paths are not allowed: {}",
                raw
            )));
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ToolError::PermissionDenied(format!(
                "path escapes the source root: {}",
                raw
            )));
        }

        let joined = self.source_root.join(path);
        if let Ok(real) = joined.canonicalize() {
            let root = self.source_root.canonicalize()?;
            if !real.starts_with(&root) {
                return Err(ToolError::PermissionDenied(format!(
                    "path resolves outside the source root: {}",
                    raw
                )));
            }
        }

        Ok(joined)
    }
}

/// Decode a parameter mapping into a typed parameter struct.
pub fn parse_params<T: DeserializeOwned>(params: ToolParams) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

/// Capability offered to the model during a phase.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Whether a successful call ends the phase with this tool's output.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Execute the tool with decoded parameters.
    async fn execute(&self, params: ToolParams, ctx: &ToolContext)
        -> Result<ToolOutput, ToolError>;

    /// Definition advertised to the provider.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters_schema())
    }
}

/// Ordered set of tools available to one phase.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Read-only tools for the context-gathering phase.
    pub fn inspection() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadSourceTool::new()));
        registry.register(Arc::new(SearchSourceTool::new()));
        registry
    }

    /// Validation tools for the implementation phase; submission is terminal.
    pub fn validation(validator: Arc<dyn CodeValidator>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CheckImplementationTool::new(Arc::clone(&validator))));
        registry.register(Arc::new(SubmitImplementationTool::new(validator)));
        registry
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(pos) => self.tools[pos] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// First terminal tool, if the set has one.
    pub fn terminal_tool(&self) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.is_terminal())
    }

    /// Definitions for every tool, in order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
