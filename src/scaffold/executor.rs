//! Parallel execution of one assistant turn's tool calls.
//!
//! Every call runs on its own task. Handles are awaited in call order, so the
//! results line up with the calls no matter which task finishes first. Tool
//! failures never escape as errors; they become structured error results the
//! model can read and react to.

use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::tools::{ToolContext, ToolOutput, ToolParams, ToolRegistry};
use crate::llm::{Message, ToolCallInfo, DEFAULT_CALL_TYPE};

/// Error kind for arguments that do not decode to a parameter mapping.
pub const KIND_INVALID_ARGUMENTS: &str = "invalid_arguments";
/// Error kind for a call naming a tool outside the phase's tool set.
pub const KIND_UNKNOWN_TOOL: &str = "unknown_tool";
/// Error kind for a tool task that panicked.
pub const KIND_PANICKED: &str = "panicked";

/// Result of one executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Encoded success payload or structured error object.
    pub content: String,
    pub elapsed: Duration,
    /// Set only when the tool is terminal and the call succeeded.
    pub terminal: bool,
    /// Error kind when the call failed.
    pub error_kind: Option<String>,
}

impl ToolResult {
    fn success(call: &ToolCallInfo, output: &ToolOutput, elapsed: Duration, terminal: bool) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name().to_string(),
            content: output.encode(),
            elapsed,
            terminal,
            error_kind: None,
        }
    }

    fn error(call: &ToolCallInfo, kind: &str, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name().to_string(),
            content: encode_error(&message.into(), kind),
            elapsed,
            terminal: false,
            error_kind: Some(kind.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }

    /// Tool-role message answering the call.
    pub fn to_message(&self) -> Message {
        Message::tool_result(self.tool_call_id.clone(), self.content.clone())
    }
}

/// Structured error payload fed back to the model.
pub fn encode_error(message: &str, kind: &str) -> String {
    json!({ "error": message, "kind": kind }).to_string()
}

/// Decode a raw argument payload into a parameter mapping.
///
/// Empty and `null` payloads become an empty mapping. A payload that decodes
/// to a JSON string is decoded once more, since some providers double-encode
/// their arguments.
pub fn decode_arguments(raw: &str) -> Result<ToolParams, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }

    let mut value: Value =
        serde_json::from_str(trimmed).map_err(|e| format!("malformed tool arguments: {}", e))?;

    if let Value::String(inner) = &value {
        let inner = inner.trim();
        value = if inner.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(inner)
                .map_err(|e| format!("malformed double-encoded tool arguments: {}", e))?
        };
    }

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(format!(
            "tool arguments must be a JSON object, got {}",
            json_type_name(&other)
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Execute every supported call concurrently and return results in call order.
///
/// Calls whose type tag is not `function` are skipped with a warning and get
/// no result.
pub async fn execute_tool_calls(
    calls: &[ToolCallInfo],
    tools: &ToolRegistry,
    ctx: &ToolContext,
) -> Vec<ToolResult> {
    let mut handles = Vec::with_capacity(calls.len());

    for call in calls {
        if call.call_type != DEFAULT_CALL_TYPE {
            warn!(
                target_name = %ctx.target_name,
                call_id = %call.id,
                call_type = %call.call_type,
                "Skipping unsupported tool call type"
            );
            continue;
        }

        let info = (call.id.clone(), call.name().to_string());
        let call = call.clone();
        let tool = tools.get(call.name());
        let task_ctx = ctx.clone();
        let started = Instant::now();

        let handle = tokio::spawn(async move {
            let Some(tool) = tool else {
                return ToolResult::error(
                    &call,
                    KIND_UNKNOWN_TOOL,
                    format!("unknown tool: {}", call.name()),
                    started.elapsed(),
                );
            };

            let params = match decode_arguments(call.arguments()) {
                Ok(params) => params,
                Err(message) => {
                    return ToolResult::error(
                        &call,
                        KIND_INVALID_ARGUMENTS,
                        message,
                        started.elapsed(),
                    )
                }
            };

            match tool.execute(params, &task_ctx).await {
                Ok(output) => {
                    ToolResult::success(&call, &output, started.elapsed(), tool.is_terminal())
                }
                Err(e) => ToolResult::error(&call, e.kind(), e.to_string(), started.elapsed()),
            }
        });

        handles.push((info, started, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for ((id, name), started, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                let message = if e.is_panic() {
                    format!("tool {} panicked", name)
                } else {
                    format!("tool {} task was aborted", name)
                };
                warn!(
                    target_name = %ctx.target_name,
                    tool = %name,
                    error = %e,
                    "Tool task failed"
                );
                ToolResult {
                    tool_call_id: id,
                    tool_name: name,
                    content: encode_error(&message, KIND_PANICKED),
                    elapsed: started.elapsed(),
                    terminal: false,
                    error_kind: Some(KIND_PANICKED.to_string()),
                }
            }
        };

        debug!(
            target_name = %ctx.target_name,
            tool = %result.tool_name,
            elapsed_ms = result.elapsed.as_millis() as u64,
            is_error = result.is_error(),
            "Tool call finished"
        );
        results.push(result);
    }

    results
}
