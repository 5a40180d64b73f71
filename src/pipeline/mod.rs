//! Per-target generation pipeline.
//!
//! - **Config**: `GeneratorConfig`, loaded from the environment and CLI flags
//! - **Context**: providers for the type/reference context of a target
//! - **Phases**: the context-gathering and implementation phase definitions
//! - **Runner**: runs both phases for one target
//!
//! ```rust,ignore
//! use impl_forge::pipeline::{GeneratorConfig, PhaseRunner, StaticContextProvider};
//!
//! let config = GeneratorConfig::from_env()?;
//! let provider = Arc::new(LiteLlmClient::from_config(&config)?);
//! let runner = PhaseRunner::from_config(provider, &config, Arc::new(StaticContextProvider), "./src");
//! let code = runner.run(0, &target, &EventSender::disabled(), &CancellationToken::new()).await?;
//! ```

pub mod config;
pub mod context;
pub mod phases;
pub mod runner;

pub use config::{ConfigError, GeneratorConfig};
pub use context::{ContextError, ContextProvider, StaticContextProvider, TypeGraphContextProvider};
pub use phases::{InitialMessageBuilder, PhaseConfig, PhaseDefinition, PhaseKind};
pub use runner::{unwrap_code_fence, PhaseRunner};
