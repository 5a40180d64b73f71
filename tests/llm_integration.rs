//! Integration tests against a live chat-completions endpoint.
//!
//! These tests make real API calls.
//! Run with: IMPL_FORGE_API_KEY=your_key cargo test --test llm_integration -- --ignored

use impl_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message, ToolDefinition};
use impl_forge::pipeline::{GeneratorConfig, PhaseRunner, StaticContextProvider};
use impl_forge::scheduler::observer::EventSender;
use impl_forge::targets::{SourceLocation, Target};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn test_config() -> GeneratorConfig {
    let key = std::env::var("IMPL_FORGE_API_KEY")
        .expect("IMPL_FORGE_API_KEY environment variable must be set for integration tests");
    GeneratorConfig::from_env()
        .expect("valid environment config")
        .with_api_key(key)
}

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_config(&test_config()).expect("client")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_tool_call_round() {
    let client = create_test_client();
    let tools = vec![ToolDefinition::function(
        "report_sum",
        "Report the sum of two numbers.",
        json!({
            "type": "object",
            "properties": { "sum": { "type": "integer" } },
            "required": ["sum"]
        }),
    )];

    let reply = client
        .send(
            &[
                Message::system("Always answer by calling the provided tool."),
                Message::user("What is 19 + 23?"),
            ],
            &tools,
            0.0,
            None,
        )
        .await
        .expect("send");

    assert!(reply.has_tool_calls(), "expected a tool call, got: {:?}", reply);
    assert_eq!(reply.calls()[0].name(), "report_sum");
    assert!(reply.calls()[0].arguments().contains("42"));
}

#[tokio::test]
#[ignore]
async fn test_runner_end_to_end() {
    let config = test_config().with_max_rounds(8);
    let provider: Arc<dyn LlmProvider> = Arc::new(LiteLlmClient::from_config(&config).expect("client"));
    let source_root = tempfile::tempdir().expect("tempdir");
    let runner = PhaseRunner::from_config(
        provider,
        &config,
        Arc::new(StaticContextProvider),
        source_root.path(),
    );

    let target = Target::new(
        "clamp_percent",
        "fn clamp_percent(value: i64) -> u8",
        "Clamp the value into the range 0..=100 and return it as u8.",
        SourceLocation {
            file: "lib.rs".to_string(),
            line: 1,
        },
    );

    let code = runner
        .run(0, &target, &EventSender::disabled(), &CancellationToken::new())
        .await
        .expect("generation succeeds");
    assert!(code.contains("clamp_percent"), "unexpected output: {}", code);
}
