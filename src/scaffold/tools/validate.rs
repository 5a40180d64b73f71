//! Validation tools for the implementation phase.
//!
//! Both tools delegate the actual analysis to a [`CodeValidator`].
//! `check_implementation` reports diagnostics and lets the model keep going;
//! `submit_implementation` is terminal and returns the code verbatim once it
//! validates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{parse_params, Tool, ToolContext, ToolError, ToolOutput, ToolParams};

/// Default timeout for a validation command in seconds.
const DEFAULT_VALIDATE_TIMEOUT: u64 = 120;

/// Diagnostics beyond this many bytes are truncated.
const MAX_DIAGNOSTICS: usize = 8_000;

/// Outcome of validating one code fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub diagnostics: String,
}

impl ValidationReport {
    pub fn passed(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Static-analysis boundary used by the validation tools.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    /// Validate a code fragment for the target in `ctx`.
    async fn validate(&self, code: &str, ctx: &ToolContext) -> Result<ValidationReport, ToolError>;
}

/// Validator used when no command is configured: only blank code fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonEmptyValidator;

#[async_trait]
impl CodeValidator for NonEmptyValidator {
    async fn validate(
        &self,
        code: &str,
        _ctx: &ToolContext,
    ) -> Result<ValidationReport, ToolError> {
        if code.trim().is_empty() {
            Ok(ValidationReport::failed("implementation is empty"))
        } else {
            Ok(ValidationReport::passed("ok"))
        }
    }
}

/// Validator that writes the code to a temp file and runs a shell command.
///
/// `{file}` in the command is replaced with the quoted temp file path. A zero
/// exit status passes; stdout and stderr become the diagnostics.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    command: String,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(DEFAULT_VALIDATE_TIMEOUT),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl CodeValidator for CommandValidator {
    async fn validate(&self, code: &str, ctx: &ToolContext) -> Result<ValidationReport, ToolError> {
        if code.trim().is_empty() {
            return Ok(ValidationReport::failed("implementation is empty"));
        }

        let suffix = ctx
            .source_file
            .as_ref()
            .and_then(|f| f.extension())
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_else(|| ".txt".to_string());

        let file = tempfile::Builder::new()
            .prefix("impl-forge-")
            .suffix(&suffix)
            .tempfile()?;
        let path = file.path().to_path_buf();

        let mut handle = tokio::fs::File::create(&path).await?;
        handle.write_all(code.as_bytes()).await?;
        handle.flush().await?;
        drop(handle);

        let rendered = self
            .command
            .replace("{file}", &escape_path_for_shell(&path.display().to_string()));

        tracing::debug!(
            target_name = %ctx.target_name,
            command = %rendered,
            "Running validation command"
        );

        let child = Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .current_dir(&ctx.source_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::ExecutionFailed(format!("failed to spawn validation command: {}", e))
            })?;

        // Dropping the wait future kills the child.
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            waited = tokio::time::timeout(self.timeout, child.wait_with_output()) => waited
                .map_err(|_| ToolError::Timeout { seconds: self.timeout.as_secs() })??,
        };

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                diagnostics.push('\n');
            }
            diagnostics.push_str(&stderr);
        }
        let diagnostics = truncate(diagnostics.trim(), MAX_DIAGNOSTICS);

        tracing::debug!(
            target_name = %ctx.target_name,
            exit_code = output.status.code().unwrap_or(-1),
            "Validation command complete"
        );

        if output.status.success() {
            Ok(ValidationReport::passed(if diagnostics.is_empty() {
                "ok".to_string()
            } else {
                diagnostics
            }))
        } else {
            Ok(ValidationReport::failed(diagnostics))
        }
    }
}

/// Escape a path for safe use in shell commands.
fn escape_path_for_shell(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len() * 2);
    for c in path.chars() {
        match c {
            '"' | '\\' | '$' | '`' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    format!("\"{}\"", escaped)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [truncated]", &text[..end])
}

/// Parameters shared by both validation tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CodeParams {
    /// Complete implementation of the target.
    code: String,
}

fn code_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": description
            }
        },
        "required": ["code"]
    })
}

/// Non-terminal tool: validate code and report diagnostics.
pub struct CheckImplementationTool {
    validator: Arc<dyn CodeValidator>,
}

impl CheckImplementationTool {
    pub fn new(validator: Arc<dyn CodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Tool for CheckImplementationTool {
    fn name(&self) -> &str {
        "check_implementation"
    }

    fn description(&self) -> &str {
        "Validate a candidate implementation without submitting it. Returns whether it passed and any diagnostics."
    }

    fn parameters_schema(&self) -> Value {
        code_schema("Candidate implementation of the function")
    }

    async fn execute(
        &self,
        params: ToolParams,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let params: CodeParams = parse_params(params)?;
        let report = self.validator.validate(&params.code, ctx).await?;
        let value = serde_json::to_value(&report)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::Structured(value))
    }
}

/// Terminal tool: validate code and, when it passes, return it verbatim.
pub struct SubmitImplementationTool {
    validator: Arc<dyn CodeValidator>,
}

impl SubmitImplementationTool {
    pub fn new(validator: Arc<dyn CodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Tool for SubmitImplementationTool {
    fn name(&self) -> &str {
        "submit_implementation"
    }

    fn description(&self) -> &str {
        "Submit the final implementation. The code is validated; if validation fails the diagnostics are returned and you may fix the code and submit again."
    }

    fn parameters_schema(&self) -> Value {
        code_schema("Complete final implementation of the function")
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: ToolParams,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let params: CodeParams = parse_params(params)?;
        let report = self.validator.validate(&params.code, ctx).await?;
        if report.passed {
            Ok(ToolOutput::Text(params.code))
        } else {
            Err(ToolError::ValidationFailed(report.diagnostics))
        }
    }
}
