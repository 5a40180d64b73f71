//! Phase definitions for target generation.
//!
//! A phase bundles what the conversation driver needs for one stage: the
//! temperature, system prompt, ordered tool set and optional structured
//! output schema, plus the builder for the stage's first user message.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::llm::Message;
use crate::scaffold::prompts::{
    build_context_prompt, build_implementation_prompt, CONTEXT_SYSTEM_PROMPT,
    IMPLEMENTATION_SYSTEM_PROMPT,
};
use crate::scaffold::tools::{CodeValidator, ToolRegistry};
use crate::targets::Target;

/// The two stages every target goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    ContextGathering,
    Implementation,
}

impl PhaseKind {
    /// Phase name used in events and failure reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::ContextGathering => "context_gathering",
            PhaseKind::Implementation => "implementation",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the conversation driver needs for one phase.
#[derive(Debug, Clone)]
pub struct PhaseConfig {
    pub name: String,
    pub temperature: f64,
    pub system_prompt: String,
    pub tools: ToolRegistry,
    /// JSON schema for structured output, sent as `response_format`.
    pub response_schema: Option<Value>,
}

impl PhaseConfig {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            temperature: 0.0,
            system_prompt: system_prompt.into(),
            tools,
            response_schema: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Builds the first user message of a phase from the target and the
/// phase's input text.
pub type InitialMessageBuilder = fn(&Target, &str) -> Vec<Message>;

/// A phase: its kind, driver configuration and initial-message builder.
#[derive(Debug, Clone)]
pub struct PhaseDefinition {
    pub kind: PhaseKind,
    pub config: PhaseConfig,
    build_initial: InitialMessageBuilder,
}

impl PhaseDefinition {
    pub fn new(kind: PhaseKind, config: PhaseConfig, build_initial: InitialMessageBuilder) -> Self {
        Self {
            kind,
            config,
            build_initial,
        }
    }

    /// Research phase with read-only inspection tools. Its input is the
    /// type/reference context blob.
    pub fn context_gathering(temperature: f64) -> Self {
        Self::new(
            PhaseKind::ContextGathering,
            PhaseConfig::new(
                PhaseKind::ContextGathering.as_str(),
                CONTEXT_SYSTEM_PROMPT,
                ToolRegistry::inspection(),
            )
            .with_temperature(temperature),
            context_messages,
        )
    }

    /// Implementation phase with validation tools. Its input is the
    /// findings of the research phase.
    pub fn implementation(temperature: f64, validator: Arc<dyn CodeValidator>) -> Self {
        Self::new(
            PhaseKind::Implementation,
            PhaseConfig::new(
                PhaseKind::Implementation.as_str(),
                IMPLEMENTATION_SYSTEM_PROMPT,
                ToolRegistry::validation(validator),
            )
            .with_temperature(temperature),
            implementation_messages,
        )
    }

    /// Messages that follow the system prompt at the start of the phase.
    pub fn initial_messages(&self, target: &Target, input: &str) -> Vec<Message> {
        (self.build_initial)(target, input)
    }
}

fn context_messages(target: &Target, type_context: &str) -> Vec<Message> {
    vec![Message::user(build_context_prompt(target, Some(type_context)))]
}

fn implementation_messages(target: &Target, findings: &str) -> Vec<Message> {
    vec![Message::user(build_implementation_prompt(target, findings))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::scaffold::tools::NonEmptyValidator;
    use crate::targets::SourceLocation;

    fn target() -> Target {
        Target::new(
            "area",
            "fn area(shape: &Shape) -> f64",
            "Compute the area.",
            SourceLocation {
                file: "geometry.rs".to_string(),
                line: 3,
            },
        )
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(PhaseKind::ContextGathering.to_string(), "context_gathering");
        assert_eq!(PhaseKind::Implementation.as_str(), "implementation");
    }

    #[test]
    fn test_context_gathering_definition() {
        let phase = PhaseDefinition::context_gathering(0.2);
        assert_eq!(phase.config.name, "context_gathering");
        assert!((phase.config.temperature - 0.2).abs() < f64::EPSILON);
        assert!(phase.config.tools.terminal_tool().is_none());

        let messages = phase.initial_messages(&target(), "struct Shape;");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.contains("struct Shape;"));
    }

    #[test]
    fn test_implementation_definition() {
        let phase = PhaseDefinition::implementation(0.1, Arc::new(NonEmptyValidator));
        assert_eq!(
            phase.config.tools.terminal_tool().map(|t| t.name()),
            Some("submit_implementation")
        );

        let messages = phase.initial_messages(&target(), "Shape is an enum.");
        assert!(messages[0].content.contains("## Research Notes\n\nShape is an enum."));
    }
}
