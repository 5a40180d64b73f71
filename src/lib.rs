//! impl-forge: implement annotated function stubs with a tool-calling LLM agent.
//!
//! Each target goes through a context-gathering phase and an implementation
//! phase, many targets at a time, with exactly one result per target.

pub mod cli;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod scaffold;
pub mod scheduler;
pub mod targets;

pub use error::LlmError;
pub use pipeline::{GeneratorConfig, PhaseRunner};
pub use scheduler::{TargetScheduler, SchedulerStats};
pub use targets::{FailureReason, GenerationResult, Target, TargetManifest};
