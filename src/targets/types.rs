//! Core data types for generation targets and their results.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Where a target's stub lives in the source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// File path relative to the manifest's source root.
    pub file: String,
    /// 1-based line of the stub.
    #[serde(default)]
    pub line: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            write!(f, "{}", self.file)
        }
    }
}

/// A function stub with an attached natural-language instruction.
///
/// Targets are owned by the caller and never mutated during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Function name.
    pub name: String,
    /// Full signature of the stub.
    pub signature: String,
    /// What the implementation must do.
    pub instruction: String,
    pub location: SourceLocation,
    /// Type names the signature refers to, used to seed context gathering.
    #[serde(default)]
    pub references: Vec<String>,
    /// Statically supplied context, passed to the model verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        signature: impl Into<String>,
        instruction: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            instruction: instruction.into(),
            location,
            references: Vec::new(),
            context: None,
        }
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Why a target failed, tagged with the phase that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Phase name (`context_gathering`, `implementation`, `runtime`).
    pub phase: String,
    pub message: String,
    /// Extra detail such as the error kind or the rounds consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl FailureReason {
    pub fn new(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)?;
        if let Some(ref context) = self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

/// Outcome of generating one target. Created once, never modified.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    index: usize,
    target: Target,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    implementation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureReason>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    duration: Duration,
}

fn serialize_duration_ms<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_millis() as u64)
}

impl GenerationResult {
    pub fn succeeded(
        index: usize,
        target: Target,
        implementation: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            index,
            target,
            success: true,
            implementation: Some(implementation.into()),
            failure: None,
            duration,
        }
    }

    pub fn failed(index: usize, target: Target, reason: FailureReason, duration: Duration) -> Self {
        Self {
            index,
            target,
            success: false,
            implementation: None,
            failure: Some(reason),
            duration,
        }
    }

    /// Position of the target in the submitted batch.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn implementation(&self) -> Option<&str> {
        self.implementation.as_deref()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
