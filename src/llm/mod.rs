//! LLM integration for impl-forge.
//!
//! Provides the chat-completions wire types and the `LlmProvider` seam the
//! conversation driver talks to. `LiteLlmClient` is the HTTP implementation;
//! tests substitute scripted providers.
//!
//! ```ignore
//! use impl_forge::llm::{LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let reply = client
//!     .send(&[Message::system("You are terse."), Message::user("2+2?")], &[], 0.0, None)
//!     .await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, FunctionCall, FunctionDefinition, GenerationRequest, GenerationResponse,
    JsonSchemaFormat, LiteLlmClient, LlmProvider, Message, ResponseFormat, Role, ToolCallInfo,
    ToolChoice, ToolDefinition, Usage, DEFAULT_CALL_TYPE,
};
