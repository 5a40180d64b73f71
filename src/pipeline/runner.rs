//! Phase runner: generates one target.
//!
//! For each target the runner asks the context provider for the type
//! context, runs the context-gathering phase, then feeds its findings into the
//! implementation phase. The first phase that fails ends the target with a
//! [`FailureReason`] tagged by that phase.

use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::GeneratorConfig;
use super::context::ContextProvider;
use super::phases::{PhaseDefinition, PhaseKind};
use crate::llm::LlmProvider;
use crate::scaffold::agent_loop::{AgentError, ConversationDriver, StepSink};
use crate::scaffold::tools::{CodeValidator, CommandValidator, NonEmptyValidator, ToolContext};
use crate::scheduler::observer::{EventSender, LogLevel};
use crate::targets::{FailureReason, Target};

/// Forwards driver progress for one target and phase to the observer.
struct PhaseReporter<'a> {
    events: &'a EventSender,
    index: usize,
    phase: PhaseKind,
}

impl StepSink for PhaseReporter<'_> {
    fn step(&self, description: String) {
        self.events.update_phase(self.index, self.phase.as_str(), description);
    }

    fn warn(&self, message: String) {
        self.events.log(Some(self.index), LogLevel::Warn, message);
    }
}

/// Runs the two generation phases for a target.
pub struct PhaseRunner {
    driver: ConversationDriver,
    context_provider: Arc<dyn ContextProvider>,
    context_phase: PhaseDefinition,
    implementation_phase: PhaseDefinition,
    source_root: PathBuf,
}

impl PhaseRunner {
    pub fn new(
        driver: ConversationDriver,
        context_provider: Arc<dyn ContextProvider>,
        context_phase: PhaseDefinition,
        implementation_phase: PhaseDefinition,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            context_provider,
            context_phase,
            implementation_phase,
            source_root: source_root.into(),
        }
    }

    /// Build a runner with the built-in phases from the generator config.
    ///
    /// The validation command, when configured, backs both validation tools.
    pub fn from_config(
        provider: Arc<dyn LlmProvider>,
        config: &GeneratorConfig,
        context_provider: Arc<dyn ContextProvider>,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        let validator: Arc<dyn CodeValidator> = match config.validate_command {
            Some(ref command) => Arc::new(CommandValidator::new(command.clone())),
            None => Arc::new(NonEmptyValidator),
        };

        Self::new(
            ConversationDriver::new(provider, config.max_rounds),
            context_provider,
            PhaseDefinition::context_gathering(config.context_temperature),
            PhaseDefinition::implementation(config.implementation_temperature, validator),
            source_root,
        )
    }

    pub fn source_root(&self) -> &std::path::Path {
        &self.source_root
    }

    /// Generate an implementation for `target`.
    ///
    /// Every failure is returned as a phase-tagged [`FailureReason`].
    pub async fn run(
        &self,
        index: usize,
        target: &Target,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<String, FailureReason> {
        let started = Instant::now();
        let ctx = ToolContext::new(target.name.clone(), self.source_root.clone())
            .with_source_file(target.location.file.clone())
            .with_cancel(cancel.clone());

        events.update_phase(index, PhaseKind::ContextGathering.as_str(), "resolving type context");
        let type_context = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FailureReason::new(PhaseKind::ContextGathering.as_str(), "cancelled"));
            }
            blob = self.context_provider.context_for(&target.location, target) => blob.map_err(|e| {
                FailureReason::new(PhaseKind::ContextGathering.as_str(), e.to_string())
                    .with_context("context provider")
            })?,
        };

        let findings = self
            .run_phase(&self.context_phase, index, target, &type_context, &ctx, events)
            .await?;
        debug!(
            target_index = index,
            target_name = %target.name,
            findings_len = findings.output.len(),
            "Context gathering finished"
        );

        let outcome = self
            .run_phase(&self.implementation_phase, index, target, &findings.output, &ctx, events)
            .await?;

        let implementation = match outcome.terminal_tool {
            Some(_) => outcome.output,
            None => unwrap_code_fence(&outcome.output),
        };

        info!(
            target_index = index,
            target_name = %target.name,
            rounds = findings.rounds + outcome.rounds,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Implementation generated"
        );
        Ok(implementation)
    }

    async fn run_phase(
        &self,
        phase: &PhaseDefinition,
        index: usize,
        target: &Target,
        input: &str,
        ctx: &ToolContext,
        events: &EventSender,
    ) -> Result<crate::scaffold::agent_loop::PhaseOutcome, FailureReason> {
        let reporter = PhaseReporter {
            events,
            index,
            phase: phase.kind,
        };

        self.driver
            .run(&phase.config, phase.initial_messages(target, input), ctx, &reporter)
            .await
            .map_err(|e| {
                events.log(Some(index), LogLevel::Error, format!("{} failed: {}", phase.kind, e));
                failure_from(phase.kind, &e)
            })
    }
}

fn failure_from(phase: PhaseKind, error: &AgentError) -> FailureReason {
    FailureReason::new(phase.as_str(), error.to_string()).with_context(error.kind())
}

/// Return the body of the single fenced code block in `content`, or the
/// trimmed content when there is not exactly one block.
pub fn unwrap_code_fence(content: &str) -> String {
    let Ok(re) = Regex::new(r"```[\w+#.-]*[ \t]*\r?\n([\s\S]*?)\r?\n?```") else {
        return content.trim().to_string();
    };

    let mut blocks = re.captures_iter(content);
    match (blocks.next(), blocks.next()) {
        (Some(caps), None) => caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        _ => content.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{GenerationRequest, GenerationResponse, Message, ResponseFormat, ToolCallInfo, ToolDefinition};
    use crate::pipeline::context::{ContextError, StaticContextProvider};
    use crate::scheduler::observer::{spawn_observer, LogRecord, Observer, TargetEvent};
    use crate::targets::SourceLocation;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Message>>,
        histories: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                histories: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::InvalidRequest("scripted".to_string()))
        }

        async fn send(
            &self,
            history: &[Message],
            _tools: &[ToolDefinition],
            _temperature: f64,
            _response_format: Option<ResponseFormat>,
        ) -> Result<Message, LlmError> {
            self.histories.lock().unwrap().push(history.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::RequestFailed("script exhausted".to_string()))
        }
    }

    struct FailingContext;

    #[async_trait]
    impl ContextProvider for FailingContext {
        async fn context_for(&self, _location: &SourceLocation, _target: &Target) -> Result<String, ContextError> {
            Err(ContextError::Unavailable("index missing".to_string()))
        }
    }

    #[derive(Default)]
    struct Steps(Vec<(String, String)>);

    impl Observer for Steps {
        fn add_target(&mut self, _name: &str, _index: usize, _total: usize) {}
        fn mark_running(&mut self, _index: usize) {}
        fn complete(&mut self, _index: usize) {}
        fn fail(&mut self, _index: usize) {}
        fn update_phase(&mut self, event: TargetEvent) {
            self.0.push((event.phase, event.step));
        }
        fn send_log(&mut self, _record: LogRecord) {}
    }

    fn target() -> Target {
        Target::new(
            "add",
            "fn add(a: i32, b: i32) -> i32",
            "Add the numbers.",
            SourceLocation {
                file: "math.rs".to_string(),
                line: 1,
            },
        )
        .with_context("i32 arithmetic wraps in release builds")
    }

    fn runner(provider: Arc<ScriptedProvider>, context: Arc<dyn ContextProvider>) -> PhaseRunner {
        let config = GeneratorConfig::default().with_max_rounds(4);
        PhaseRunner::from_config(provider, &config, context, ".")
    }

    #[tokio::test]
    async fn test_two_phases_feed_findings_forward() {
        let provider = ScriptedProvider::new(vec![
            Message::assistant("Use plain addition."),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallInfo::function(
                    "1",
                    "submit_implementation",
                    r#"{"code": "fn add(a: i32, b: i32) -> i32 { a + b }"}"#,
                )],
            ),
        ]);
        let runner = runner(provider.clone(), Arc::new(StaticContextProvider));
        let (events, task) = spawn_observer(Steps::default(), 64);

        let code = runner
            .run(0, &target(), &events, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, "fn add(a: i32, b: i32) -> i32 { a + b }");

        let histories = provider.histories.lock().unwrap();
        assert!(histories[0][1].content.contains("i32 arithmetic wraps"));
        assert!(histories[1][1].content.contains("Use plain addition."));

        drop(events);
        let steps = task.finish().await.unwrap().0;
        assert_eq!(steps[0], ("context_gathering".to_string(), "resolving type context".to_string()));
        assert!(steps.iter().any(|(p, s)| p == "implementation" && s == "round 1: executing 1 tool call(s)"));
    }

    #[tokio::test]
    async fn test_context_phase_failure_short_circuits() {
        let provider = ScriptedProvider::new(vec![Message::assistant("")]);
        let runner = runner(provider.clone(), Arc::new(StaticContextProvider));

        let reason = runner
            .run(0, &target(), &EventSender::disabled(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(reason.phase, "context_gathering");
        assert_eq!(reason.message, "model returned empty response without tool calls");
        assert_eq!(reason.context.as_deref(), Some("empty_response"));
        assert_eq!(provider.histories.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_context_provider_failure() {
        let provider = ScriptedProvider::new(vec![]);
        let runner = runner(provider.clone(), Arc::new(FailingContext));

        let reason = runner
            .run(0, &target(), &EventSender::disabled(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(reason.phase, "context_gathering");
        assert!(reason.message.contains("index missing"));
        assert!(provider.histories.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_implementation_failure_is_tagged() {
        let provider = ScriptedProvider::new(vec![Message::assistant("notes")]);
        let runner = runner(provider, Arc::new(StaticContextProvider));

        let reason = runner
            .run(0, &target(), &EventSender::disabled(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(reason.phase, "implementation");
        assert_eq!(reason.context.as_deref(), Some("transport"));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let provider = ScriptedProvider::new(vec![]);
        let runner = runner(provider, Arc::new(StaticContextProvider));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reason = runner
            .run(0, &target(), &EventSender::disabled(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(reason.message, "cancelled");
    }

    #[test]
    fn test_unwrap_code_fence() {
        assert_eq!(unwrap_code_fence("```rust\nfn a() {}\n```"), "fn a() {}");
        assert_eq!(unwrap_code_fence("Here:\n```\nx + 1\n```\nDone."), "x + 1");
        assert_eq!(unwrap_code_fence("  plain code  "), "plain code");
        let two = "```\na\n```\n```\nb\n```";
        assert_eq!(unwrap_code_fence(two), two);
    }
}
