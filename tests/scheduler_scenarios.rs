//! Scheduler scenarios driven by in-process mock providers.

use async_trait::async_trait;
use impl_forge::error::LlmError;
use impl_forge::llm::{
    GenerationRequest, GenerationResponse, LlmProvider, Message, ResponseFormat, Role,
    ToolCallInfo, ToolDefinition,
};
use impl_forge::pipeline::{GeneratorConfig, PhaseRunner, StaticContextProvider};
use impl_forge::scheduler::{
    spawn_observer, EventSender, LogRecord, Observer, ObserverEvent, TargetEvent, TargetScheduler,
    RUNTIME_PHASE,
};
use impl_forge::targets::{SourceLocation, Target};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Answers the research phase with notes and the implementation phase with
/// a `submit_implementation` call. Target names steer failures.
struct MockProvider {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProvider {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

fn target_name(prompt: &str) -> String {
    prompt.split('`').nth(1).unwrap_or_default().to_string()
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        Err(LlmError::InvalidRequest("mock".to_string()))
    }

    async fn send(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
        _temperature: f64,
        _response_format: Option<ResponseFormat>,
    ) -> Result<Message, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = target_name(&history[1].content);
        if name.starts_with("panic_") {
            panic!("provider exploded for {}", name);
        }
        if name.starts_with("broken_") {
            return Err(LlmError::ApiError {
                code: 500,
                message: "upstream unavailable".to_string(),
            });
        }

        let implementing = tools
            .iter()
            .any(|t| t.function.name == "submit_implementation");
        if !implementing {
            return Ok(Message::assistant(format!("{} needs no helpers.", name)));
        }

        let code = json!({ "code": format!("fn {}() {{}}", name) }).to_string();
        Ok(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallInfo::function(
                format!("call-{}", call),
                "submit_implementation",
                code,
            )],
        ))
    }
}

#[derive(Default)]
struct Recorder {
    events: Vec<ObserverEvent>,
}

impl Observer for Recorder {
    fn add_target(&mut self, name: &str, index: usize, total: usize) {
        self.events.push(ObserverEvent::AddTarget {
            name: name.to_string(),
            index,
            total,
        });
    }

    fn mark_running(&mut self, index: usize) {
        self.events.push(ObserverEvent::MarkRunning(index));
    }

    fn complete(&mut self, index: usize) {
        self.events.push(ObserverEvent::Complete(index));
    }

    fn fail(&mut self, index: usize) {
        self.events.push(ObserverEvent::Fail(index));
    }

    fn update_phase(&mut self, _event: TargetEvent) {}

    fn send_log(&mut self, record: LogRecord) {
        self.events.push(ObserverEvent::Log(record));
    }

    fn run_finished(&mut self) {
        self.events.push(ObserverEvent::RunFinished);
    }
}

fn targets(names: &[&str]) -> Vec<Target> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            Target::new(
                *name,
                format!("fn {}()", name),
                "Do nothing.",
                SourceLocation {
                    file: "lib.rs".to_string(),
                    line: i + 1,
                },
            )
        })
        .collect()
}

fn runner(provider: Arc<dyn LlmProvider>, source_root: &std::path::Path) -> Arc<PhaseRunner> {
    let config = GeneratorConfig::default().with_max_rounds(4);
    Arc::new(PhaseRunner::from_config(
        provider,
        &config,
        Arc::new(StaticContextProvider),
        source_root,
    ))
}

fn assert_exactly_once(results: &[impl_forge::GenerationResult], n: usize) {
    assert_eq!(results.len(), n);
    let indexes: HashSet<usize> = results.iter().map(|r| r.index()).collect();
    assert_eq!(indexes, (0..n).collect::<HashSet<_>>());
    let names: HashSet<&str> = results.iter().map(|r| r.target().name.as_str()).collect();
    assert_eq!(names.len(), n);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_targets_with_cap_two() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(Duration::from_millis(40));
    let (events, task) = spawn_observer(Recorder::default(), 256);
    let scheduler = TargetScheduler::new(runner(provider.clone(), dir.path()), 2, events);

    let results = scheduler
        .execute(targets(&["one", "two", "three"]), CancellationToken::new())
        .await;
    assert_exactly_once(&results, 3);
    assert!(results.iter().all(|r| r.is_success()));
    assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);

    drop(scheduler);
    let events = task.finish().await.unwrap().events;

    let position = |wanted: &ObserverEvent| events.iter().position(|e| e == wanted).unwrap();
    let mut running: Vec<(usize, usize)> = (0..3)
        .map(|i| (position(&ObserverEvent::MarkRunning(i)), i))
        .collect();
    running.sort();
    let first_finish = (0..3)
        .map(|i| position(&ObserverEvent::Complete(i)))
        .min()
        .unwrap();
    assert!(running[1].0 < first_finish);
    assert!(running[2].0 > first_finish, "third target started before a slot freed");
    assert_eq!(events.last(), Some(&ObserverEvent::RunFinished));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_outcomes_yield_one_result_each() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(Duration::from_millis(5));
    let names: Vec<String> = (0..24)
        .map(|i| {
            if i % 5 == 0 {
                format!("broken_{}", i)
            } else {
                format!("fn_{}", i)
            }
        })
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let scheduler = TargetScheduler::new(runner(provider, dir.path()), 4, EventSender::disabled());
    let results = scheduler
        .execute(targets(&name_refs), CancellationToken::new())
        .await;

    assert_exactly_once(&results, 24);
    let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
    assert_eq!(failed.len(), 5);
    for result in &failed {
        let reason = result.failure().unwrap();
        assert_eq!(reason.phase, "context_gathering");
        assert_eq!(reason.context.as_deref(), Some("api"));
    }
    for result in results.iter().filter(|r| r.is_success()) {
        let expected = format!("fn {}() {{}}", result.target().name);
        assert_eq!(result.implementation(), Some(expected.as_str()));
    }

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 19);
    assert_eq!(stats.failed, 5);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_stats_describe_only_the_latest_run() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(Duration::ZERO);
    let scheduler = TargetScheduler::new(runner(provider, dir.path()), 2, EventSender::disabled());

    let first = scheduler
        .execute(targets(&["alpha", "broken_beta"]), CancellationToken::new())
        .await;
    assert_exactly_once(&first, 2);
    let stats = scheduler.stats();
    assert_eq!((stats.completed, stats.failed), (1, 1));

    let second = scheduler
        .execute(targets(&["gamma", "delta"]), CancellationToken::new())
        .await;
    assert_exactly_once(&second, 2);
    let stats = scheduler.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.total_processed(), 2);
    assert_eq!(stats.success_rate(), 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_worker_does_not_abort_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(Duration::from_millis(5));
    let (events, task) = spawn_observer(Recorder::default(), 256);
    let scheduler = TargetScheduler::new(runner(provider, dir.path()), 2, events);

    let results = scheduler
        .execute(targets(&["left", "panic_middle", "right"]), CancellationToken::new())
        .await;
    assert_exactly_once(&results, 3);

    let panicked = results.iter().find(|r| r.index() == 1).unwrap();
    let reason = panicked.failure().unwrap();
    assert_eq!(reason.phase, RUNTIME_PHASE);
    assert!(reason.message.contains("provider exploded for panic_middle"));
    assert!(results.iter().filter(|r| r.index() != 1).all(|r| r.is_success()));

    drop(scheduler);
    let events = task.finish().await.unwrap().events;
    assert!(events.contains(&ObserverEvent::Fail(1)));
    assert!(events.contains(&ObserverEvent::Complete(0)));
    assert!(events.contains(&ObserverEvent::Complete(2)));
}

#[tokio::test]
async fn test_cancelled_run_still_reports_every_target() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(Duration::from_millis(5));
    let scheduler = TargetScheduler::new(
        runner(provider.clone(), dir.path()),
        2,
        EventSender::disabled(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = scheduler.execute(targets(&["a", "b", "c", "d"]), cancel).await;
    assert_exactly_once(&results, 4);
    assert!(results
        .iter()
        .all(|r| r.failure().map(|f| f.message.as_str()) == Some("cancelled")));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (events, task) = spawn_observer(Recorder::default(), 8);
    let scheduler = TargetScheduler::new(
        runner(MockProvider::new(Duration::ZERO), dir.path()),
        16,
        events,
    );

    let results = scheduler.execute(Vec::new(), CancellationToken::new()).await;
    assert!(results.is_empty());

    drop(scheduler);
    let events = task.finish().await.unwrap().events;
    assert_eq!(events, vec![ObserverEvent::RunFinished]);
}

/// Replays a fixed script and records every history it is sent.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Message>>,
    histories: Mutex<Vec<Vec<Message>>>,
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

#[tokio::test]
async fn test_tool_error_feeds_back_into_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider {
        replies: Mutex::new(VecDeque::from(vec![
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallInfo::function(
                    "c1",
                    "read_source",
                    r#"{"path": "Widget"}"#,
                )],
            ),
            Message::assistant("Widget does not exist; return the input unchanged."),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallInfo::function(
                    "c2",
                    "submit_implementation",
                    r#"{"code": "fn identity(x: u32) -> u32 { x }"}"#,
                )],
            ),
        ])),
        histories: Mutex::new(Vec::new()),
    });

    let scheduler = TargetScheduler::new(
        runner(provider.clone(), dir.path()),
        1,
        EventSender::disabled(),
    );
    let results = scheduler
        .execute(targets(&["identity"]), CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].implementation(),
        Some("fn identity(x: u32) -> u32 { x }")
    );

    let histories = provider.histories.lock().unwrap();
    let tool_message = histories[1]
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result in history");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert!(tool_message.content.contains("not found: Widget"));
}
