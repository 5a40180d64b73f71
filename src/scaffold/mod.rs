//! Tool-calling conversation scaffold.
//!
//! The driver runs one phase as a loop of provider rounds:
//! 1. Send the history with the phase's tool definitions
//! 2. Execute requested tool calls concurrently
//! 3. Append results in call order
//! 4. Stop on a terminal tool, a final answer, or the round limit
//!
//! # Example
//!
//! ```ignore
//! use impl_forge::scaffold::{ConversationDriver, NoopSink, ToolContext};
//!
//! let driver = ConversationDriver::new(provider, 30);
//! let ctx = ToolContext::new("parse_header", "./src");
//! let outcome = driver.run(&phase.config, messages, &ctx, &NoopSink).await?;
//! ```

pub mod agent_loop;
pub mod executor;
pub mod prompts;
pub mod tools;

pub use agent_loop::{AgentError, ConversationDriver, NoopSink, PhaseOutcome, StepSink};
pub use executor::{decode_arguments, execute_tool_calls, ToolResult};
pub use prompts::{
    build_context_prompt, build_implementation_prompt, nudge_message, CONTEXT_SYSTEM_PROMPT,
    IMPLEMENTATION_SYSTEM_PROMPT,
};
pub use tools::{
    CodeValidator, CommandValidator, NonEmptyValidator, Tool, ToolContext, ToolError, ToolOutput,
    ToolParams, ToolRegistry, ValidationReport,
};
