//! Prompts for the two generation phases.
//!
//! This module contains the system prompts, the per-target initial messages
//! and the nudge sent when the model stops without using a phase's result
//! tool.

use crate::targets::Target;

/// System prompt for the context-gathering phase.
pub const CONTEXT_SYSTEM_PROMPT: &str = r#"You are a senior engineer preparing to implement a single function stub. Your job in this step is research only: do not write the implementation yet.

## Available Tools

1. **read_source** - Read a file relative to the project root
   - Returns content with line numbers
   - Can read specific line ranges with start_line and end_line

2. **search_source** - Search for a pattern across the project
   - Returns matching lines as path:line: text
   - Supports regex, case-insensitive search and file extension filters

## Guidelines

1. Look at the file containing the stub and at the definitions of every type in its signature.
2. Find existing helpers, conventions and error types the implementation should reuse.
3. Prefer a few targeted searches over reading whole files.
4. Stop as soon as you know enough to implement the function.

## Response Format

When you are done, reply without calling any tool. Your reply must be a concise summary of your findings: relevant type definitions, helper functions with their signatures, conventions, and pitfalls. This summary is the only thing the implementer will see."#;

/// System prompt for the implementation phase.
pub const IMPLEMENTATION_SYSTEM_PROMPT: &str = r#"You are a senior engineer implementing a single function stub.

## Available Tools

1. **check_implementation** - Validate a candidate implementation
   - Returns whether it passed and any diagnostics
   - Does not end the task

2. **submit_implementation** - Submit the final implementation
   - The code is validated first
   - If validation fails the diagnostics are returned and you may fix the code and submit again

## Guidelines

1. Implement exactly what the instruction asks, keeping the given signature unchanged.
2. Reuse the types and helpers described in the research notes.
3. Do not leave placeholders, stubs or TODO markers.
4. Use check_implementation when unsure, then submit.

## Response Format

Submit the complete function, including its signature, through submit_implementation. Do not wrap the code in markdown fences."#;

/// Synthetic user message sent when the model replies without calling the
/// phase's result tool.
pub fn nudge_message(tool_name: &str) -> String {
    format!(
        "You have not called `{}` yet. The task is only complete once you call `{}` with your final answer. Call it now.",
        tool_name, tool_name
    )
}

/// Initial user message for the context-gathering phase.
pub fn build_context_prompt(target: &Target, type_context: Option<&str>) -> String {
    let mut prompt = format!(
        "## Target\n\nFunction: `{}`\nLocation: {}\n\n```\n{}\n```\n\n## Instruction\n\n{}\n",
        target.name, target.location, target.signature, target.instruction
    );

    if let Some(context) = type_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n## Known Types And References\n\n");
        prompt.push_str(context.trim_end());
        prompt.push('\n');
    }

    prompt.push_str(
        "\nResearch the codebase and reply with a summary of everything needed to implement this function.",
    );
    prompt
}

/// Initial user message for the implementation phase.
pub fn build_implementation_prompt(target: &Target, findings: &str) -> String {
    format!(
        "## Target\n\nFunction: `{}`\nLocation: {}\n\n```\n{}\n```\n\n## Instruction\n\n{}\n\n## Research Notes\n\n{}\n\nImplement the function and submit it with submit_implementation.",
        target.name,
        target.location,
        target.signature,
        target.instruction,
        findings.trim()
    )
}
