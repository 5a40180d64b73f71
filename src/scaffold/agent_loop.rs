//! Conversation driver for one phase.
//!
//! The driver runs a bounded round loop:
//! 1. Send the history and tool definitions to the provider
//! 2. Execute the returned tool calls concurrently
//! 3. Append the results in call order
//! 4. Stop on a terminal tool, a final answer or the round limit
//!
//! When the phase has a result tool that the model has not called, a reply
//! without tool calls is answered with a nudge instead of being accepted.
//! The nudge may repeat every round until the budget runs out.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::executor::execute_tool_calls;
use super::prompts::nudge_message;
use super::tools::ToolContext;
use crate::error::LlmError;
use crate::llm::{LlmProvider, Message, ResponseFormat, DEFAULT_CALL_TYPE};
use crate::pipeline::phases::PhaseConfig;

/// Errors that end a phase.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Provider call failed. Not retried.
    #[error("{0}")]
    Llm(#[from] LlmError),

    /// The model replied with neither content nor tool calls.
    #[error("model returned empty response without tool calls")]
    EmptyResponse,

    /// The phase used up its round budget.
    #[error("exceeded maximum rounds ({max_rounds})")]
    ExceededMaxRounds { max_rounds: usize },

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl AgentError {
    /// Short tag used as failure context.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Llm(e) => e.kind(),
            AgentError::EmptyResponse => "empty_response",
            AgentError::ExceededMaxRounds { .. } => "round_limit",
            AgentError::Cancelled => "cancelled",
        }
    }
}

/// Receives progress from the driver.
pub trait StepSink: Send + Sync {
    /// A new step started, e.g. `round 2: awaiting model`.
    fn step(&self, description: String);

    /// Something went wrong that the conversation recovers from.
    fn warn(&self, message: String);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl StepSink for NoopSink {
    fn step(&self, _description: String) {}

    fn warn(&self, _message: String) {}
}

/// Successful end of a phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    /// Terminal tool content, or the final assistant content.
    pub output: String,
    /// Provider rounds used.
    pub rounds: usize,
    /// Name of the terminal tool that ended the phase, if any.
    pub terminal_tool: Option<String>,
}

/// Drives the tool-calling conversation for one phase of one target.
#[derive(Clone)]
pub struct ConversationDriver {
    provider: Arc<dyn LlmProvider>,
    max_rounds: usize,
}

impl ConversationDriver {
    pub fn new(provider: Arc<dyn LlmProvider>, max_rounds: usize) -> Self {
        Self {
            provider,
            max_rounds,
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run one phase to completion.
    ///
    /// `initial` holds the messages that follow the phase's system prompt.
    pub async fn run(
        &self,
        phase: &PhaseConfig,
        initial: Vec<Message>,
        ctx: &ToolContext,
        sink: &dyn StepSink,
    ) -> Result<PhaseOutcome, AgentError> {
        let mut history = Vec::with_capacity(initial.len() + 1);
        history.push(Message::system(phase.system_prompt.clone()));
        history.extend(initial);

        let definitions = phase.tools.definitions();
        let response_format = phase
            .response_schema
            .clone()
            .map(|schema| ResponseFormat::json_schema(format!("{}_output", phase.name), schema));
        let result_tool = phase.tools.terminal_tool().map(|t| t.name().to_string());

        for round in 0..self.max_rounds {
            let number = round + 1;
            if ctx.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            sink.step(format!("round {}: awaiting model", number));
            debug!(
                target_name = %ctx.target_name,
                phase = %phase.name,
                round = number,
                messages = history.len(),
                "Sending conversation to provider"
            );

            // Dropping the send future aborts the in-flight request.
            let mut reply = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                reply = self.provider.send(
                    &history,
                    &definitions,
                    phase.temperature,
                    response_format.clone(),
                ) => reply?,
            };

            // Calls that will never be answered must not enter the history.
            if let Some(calls) = reply.tool_calls.take() {
                let (supported, skipped): (Vec<_>, Vec<_>) = calls
                    .into_iter()
                    .partition(|call| call.call_type == DEFAULT_CALL_TYPE);
                for call in &skipped {
                    warn!(
                        target_name = %ctx.target_name,
                        phase = %phase.name,
                        round = number,
                        call_id = %call.id,
                        call_type = %call.call_type,
                        "Dropping unsupported tool call"
                    );
                }
                if !supported.is_empty() {
                    reply.tool_calls = Some(supported);
                }
            }

            if reply.has_tool_calls() {
                let calls = reply.calls().to_vec();
                history.push(reply);

                sink.step(format!(
                    "round {}: executing {} tool call(s)",
                    number,
                    calls.len()
                ));

                let results = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                    results = execute_tool_calls(&calls, &phase.tools, ctx) => results,
                };

                let mut terminal = None;
                for result in &results {
                    if let Some(ref kind) = result.error_kind {
                        warn!(
                            target_name = %ctx.target_name,
                            phase = %phase.name,
                            round = number,
                            tool = %result.tool_name,
                            kind = %kind,
                            "Tool call returned an error"
                        );
                        sink.warn(format!(
                            "{} failed ({}): {}",
                            result.tool_name, kind, result.content
                        ));
                    }
                    if result.terminal && terminal.is_none() {
                        terminal = Some(result);
                    }
                    history.push(result.to_message());
                }

                if let Some(result) = terminal {
                    debug!(
                        target_name = %ctx.target_name,
                        phase = %phase.name,
                        round = number,
                        tool = %result.tool_name,
                        "Terminal tool ended the phase"
                    );
                    return Ok(PhaseOutcome {
                        output: result.content.clone(),
                        rounds: number,
                        terminal_tool: Some(result.tool_name.clone()),
                    });
                }
                continue;
            }

            if let Some(ref tool) = result_tool {
                if number < self.max_rounds {
                    sink.step(format!("round {}: nudging for {}", number, tool));
                    if !reply.content.trim().is_empty() {
                        history.push(reply);
                    }
                    history.push(Message::user(nudge_message(tool)));
                    continue;
                }
            }

            if reply.content.trim().is_empty() {
                return Err(AgentError::EmptyResponse);
            }

            return Ok(PhaseOutcome {
                output: reply.content,
                rounds: number,
                terminal_tool: None,
            });
        }

        Err(AgentError::ExceededMaxRounds {
            max_rounds: self.max_rounds,
        })
    }
}
