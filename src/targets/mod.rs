//! Generation targets, their results, and the manifest they are loaded from.

pub mod manifest;
pub mod types;

pub use manifest::{ManifestError, TargetManifest, TypeDefinition};
pub use types::{FailureReason, GenerationResult, SourceLocation, Target};
