//! Search tool for finding patterns in source files.
//!
//! Walks the source root with `walkdir` and matches lines with `regex`.
//! The walk runs on the blocking pool and checks for cancellation between
//! files.

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{parse_params, Tool, ToolContext, ToolError, ToolOutput, ToolParams};

/// Maximum number of search results to return.
const MAX_RESULTS: usize = 100;

/// Timeout for search operations in seconds.
const SEARCH_TIMEOUT: u64 = 60;

/// Files larger than this are skipped.
const MAX_SEARCH_FILE_SIZE: u64 = 1_048_576;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", "vendor"];

/// Parameters for the search tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchParams {
    /// Pattern to search for.
    pattern: String,
    /// Optional path to search in, relative to the source root.
    path: Option<String>,
    /// Whether to interpret pattern as a regex (defaults to false).
    #[serde(default)]
    regex: Option<bool>,
    /// Optional file extension filter (e.g., "py", "rs", "go").
    file_type: Option<String>,
    /// Case-insensitive search (defaults to false).
    #[serde(default)]
    ignore_case: Option<bool>,
}

/// Tool for searching patterns in source files.
#[derive(Debug, Default)]
pub struct SearchSourceTool;

impl SearchSourceTool {
    /// Create a new SearchSourceTool instance.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for SearchSourceTool {
    fn name(&self) -> &str {
        "search_source"
    }

    fn description(&self) -> &str {
        "Search for a text pattern in source files below the project root. Returns matching lines as path:line: text. Supports regex, case-insensitive search and file extension filtering."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search, relative to the project root (defaults to the root)"
                },
                "regex": {
                    "type": "boolean",
                    "description": "Interpret the pattern as a regular expression (default: false)"
                },
                "file_type": {
                    "type": "string",
                    "description": "Only search files with this extension (e.g. 'rs', 'py')"
                },
                "ignore_case": {
                    "type": "boolean",
                    "description": "Case-insensitive search (default: false)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        params: ToolParams,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let params: SearchParams = parse_params(params)?;

        if params.pattern.is_empty() {
            return Err(ToolError::InvalidParameters(
                "Pattern cannot be empty".to_string(),
            ));
        }

        let source = if params.regex.unwrap_or(false) {
            params.pattern.clone()
        } else {
            regex::escape(&params.pattern)
        };
        let matcher = RegexBuilder::new(&source)
            .case_insensitive(params.ignore_case.unwrap_or(false))
            .build()
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid regex: {}", e)))?;

        let root = ctx.source_root.clone();
        let start = match params.path.as_deref() {
            Some(p) if !p.trim().is_empty() && p.trim() != "." => ctx.resolve_path(p)?,
            _ => root.clone(),
        };
        if !start.exists() {
            return Err(ToolError::NotFound(
                params.path.unwrap_or_else(|| ".".to_string()),
            ));
        }

        let file_type = params.file_type.map(|t| t.trim_start_matches('.').to_string());
        let cancel = ctx.cancel.clone();
        let walk = tokio::task::spawn_blocking(move || {
            search_tree(&root, &start, &matcher, file_type.as_deref(), &cancel)
        });

        let matches = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            joined = timeout(Duration::from_secs(SEARCH_TIMEOUT), walk) => joined
                .map_err(|_| ToolError::Timeout { seconds: SEARCH_TIMEOUT })?
                .map_err(|e| ToolError::ExecutionFailed(format!("search task failed: {}", e)))??,
        };

        if matches.is_empty() {
            return Ok(ToolOutput::Text(format!(
                "No matches found for pattern: {}",
                params.pattern
            )));
        }

        let mut out = matches.join("\n");
        if matches.len() >= MAX_RESULTS {
            out.push_str(&format!(
                "\n\n[Results truncated. Showing first {} matches.]",
                MAX_RESULTS
            ));
        }
        Ok(ToolOutput::Text(out))
    }
}

/// Collect up to `MAX_RESULTS` matching lines below `start`.
fn search_tree(
    root: &Path,
    start: &Path,
    matcher: &regex::Regex,
    file_type: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<String>, ToolError> {
    let mut matches = Vec::new();

    let walker = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && e.file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        });

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(ext) = file_type {
            if entry.path().extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
        }

        if entry
            .metadata()
            .map(|m| m.len() > MAX_SEARCH_FILE_SIZE)
            .unwrap_or(true)
        {
            continue;
        }

        // Binary and non-UTF-8 files are skipped.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };

        let display = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();

        for (i, line) in content.lines().enumerate() {
            if matcher.is_match(line) {
                matches.push(format!("{}:{}: {}", display, i + 1, line.trim_end()));
                if matches.len() >= MAX_RESULTS {
                    return Ok(matches);
                }
            }
        }
    }

    Ok(matches)
}
