//! Target manifest loading.
//!
//! Stubs are discovered by an external parser; impl-forge consumes the
//! result as a YAML or JSON manifest listing targets and, optionally, a type
//! table used for context gathering.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::Target;

/// Errors that can occur while loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error reading manifest '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest contains no targets")]
    NoTargets,

    #[error("Target #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("Duplicate target name '{0}'")]
    DuplicateTarget(String),
}

/// A type known to the manifest, with the names it refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Source text of the definition.
    pub definition: String,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Parsed target manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetManifest {
    /// Root directory inspection tools may read from.
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDefinition>,
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

impl TargetManifest {
    /// Load a manifest from disk. `.json` files are parsed as JSON, anything
    /// else as YAML. A relative `source_root` is resolved against the
    /// manifest's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let mut manifest = if is_json {
            Self::from_json(&raw)?
        } else {
            Self::from_yaml(&raw)?
        };

        if manifest.source_root.is_relative() {
            if let Some(parent) = path.parent() {
                manifest.source_root = parent.join(&manifest.source_root);
            }
        }

        Ok(manifest)
    }

    /// Parse and validate a YAML manifest.
    pub fn from_yaml(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_yaml::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse and validate a JSON manifest.
    pub fn from_json(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check that targets are present and uniquely named.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.targets.is_empty() {
            return Err(ManifestError::NoTargets);
        }

        let mut seen = HashSet::new();
        for (index, target) in self.targets.iter().enumerate() {
            if target.name.trim().is_empty() {
                return Err(ManifestError::EmptyName { index });
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ManifestError::DuplicateTarget(target.name.clone()));
            }
        }

        Ok(())
    }
}
