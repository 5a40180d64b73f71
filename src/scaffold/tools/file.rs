//! Source reading tool for the context-gathering phase.
//!
//! `ReadSourceTool` reads a file under the manifest's source root, optionally
//! restricted to a line range, and returns it with line numbers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_params, Tool, ToolContext, ToolError, ToolOutput, ToolParams};

/// Maximum file size that can be read (1MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Parameters for the read_source tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReadSourceParams {
    /// Path to the file, relative to the source root.
    path: String,
    /// Optional starting line number (1-indexed).
    start_line: Option<usize>,
    /// Optional ending line number (1-indexed, inclusive).
    end_line: Option<usize>,
}

/// Tool for reading source files below the source root.
#[derive(Debug, Default)]
pub struct ReadSourceTool;

impl ReadSourceTool {
    /// Create a new ReadSourceTool instance.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ReadSourceTool {
    fn name(&self) -> &str {
        "read_source"
    }

    fn description(&self) -> &str {
        "Read a source file relative to the project root. Returns the content with line numbers. Optionally specify a range of lines to read."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "Starting line number (1-indexed, optional)",
                    "minimum": 1
                },
                "end_line": {
                    "type": "integer",
                    "description": "Ending line number (1-indexed, inclusive, optional)",
                    "minimum": 1
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        params: ToolParams,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let params: ReadSourceParams = parse_params(params)?;

        if let (Some(start), Some(end)) = (params.start_line, params.end_line) {
            if start > end {
                return Err(ToolError::InvalidParameters(format!(
                    "start_line ({}) cannot be greater than end_line ({})",
                    start, end
                )));
            }
        }

        let path = ctx.resolve_path(&params.path)?;

        let read = async {
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ToolError::NotFound(params.path.clone()));
                }
                Err(e) => return Err(ToolError::Io(e)),
            };

            if !metadata.is_file() {
                return Err(ToolError::InvalidParameters(format!(
                    "{} is not a file",
                    params.path
                )));
            }

            if metadata.len() > MAX_FILE_SIZE {
                return Err(ToolError::ExecutionFailed(format!(
                    "File size ({} bytes) exceeds maximum allowed ({} bytes)",
                    metadata.len(),
                    MAX_FILE_SIZE
                )));
            }

            Ok(tokio::fs::read_to_string(&path).await?)
        };

        let content = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            content = read => content?,
        };

        Ok(ToolOutput::Text(number_lines(
            &content,
            params.start_line,
            params.end_line,
        )))
    }
}

/// Render a line range with right-aligned line numbers.
fn number_lines(content: &str, start: Option<usize>, end: Option<usize>) -> String {
    let start = start.unwrap_or(1).max(1);
    let end = end.unwrap_or(usize::MAX);

    let mut out = String::new();
    for (i, line) in content.lines().enumerate() {
        let number = i + 1;
        if number < start {
            continue;
        }
        if number > end {
            break;
        }
        out.push_str(&format!("{:>6}\t{}\n", number, line));
    }

    if out.is_empty() {
        out.push_str("(no lines in range)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ToolParams {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_read_source_tool_schema() {
        let tool = ReadSourceTool::new();
        assert_eq!(tool.name(), "read_source");
        assert!(!tool.is_terminal());
        let schema = tool.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
    }

    #[test]
    fn test_number_lines_range() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(number_lines(text, Some(2), Some(3)), "     2\tb\n     3\tc\n");
        assert_eq!(number_lines(text, Some(10), None), "(no lines in range)\n");
    }

    #[tokio::test]
    async fn test_read_source_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn a() {}\nfn b() {}\nfn c() {}\n").unwrap();

        let tool = ReadSourceTool::new();
        let ctx = ToolContext::new("t", dir.path());
        let out = tool
            .execute(
                params(json!({"path": "src/lib.rs", "start_line": 2, "end_line": 2})),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(out, ToolOutput::Text("     2\tfn b() {}\n".to_string()));
    }

    #[tokio::test]
    async fn test_read_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadSourceTool::new();
        let ctx = ToolContext::new("t", dir.path());

        let err = tool
            .execute(params(json!({"path": "Widget.rs"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not found: Widget.rs");
    }

    #[tokio::test]
    async fn test_read_source_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadSourceTool::new();
        let ctx = ToolContext::new("t", dir.path());

        let err = tool
            .execute(params(json!({"path": "../secret"})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_read_source_invalid_range() {
        let tool = ReadSourceTool::new();
        let ctx = ToolContext::new("t", "/workspace");
        let err = tool
            .execute(
                params(json!({"path": "a.rs", "start_line": 20, "end_line": 10})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
