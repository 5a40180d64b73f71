//! Context providers.
//!
//! Before the research phase, the runner asks a [`ContextProvider`] for the
//! type and reference context of a target. Extraction from real sources is
//! left to external tooling; the providers here work from what the manifest
//! carries.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::debug;

use crate::targets::{SourceLocation, Target, TypeDefinition};

/// Errors that can occur while building context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A referenced type has no definition and the provider is strict.
    #[error("unknown type '{name}' referenced from {from}")]
    UnknownType { name: String, from: String },

    /// Context could not be produced.
    #[error("context unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the type/reference context blob for a target.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context_for(
        &self,
        location: &SourceLocation,
        target: &Target,
    ) -> Result<String, ContextError>;
}

/// Returns the target's statically supplied context, or nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticContextProvider;

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn context_for(
        &self,
        _location: &SourceLocation,
        target: &Target,
    ) -> Result<String, ContextError> {
        Ok(target.context.clone().unwrap_or_default())
    }
}

/// Walks a type table breadth-first from the target's references.
///
/// Direct references are depth 0; a type is included when its depth is at
/// most `max_depth`. Each name is visited once, so cycles terminate.
#[derive(Debug, Clone)]
pub struct TypeGraphContextProvider {
    types: BTreeMap<String, TypeDefinition>,
    max_depth: usize,
    strict: bool,
}

impl TypeGraphContextProvider {
    pub fn new(types: BTreeMap<String, TypeDefinition>, max_depth: usize) -> Self {
        Self {
            types,
            max_depth,
            strict: false,
        }
    }

    /// Fail on references with no definition instead of skipping them.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Names reachable from `roots` within the depth cap, in visit order.
    pub fn resolve(&self, roots: &[String], from: &str) -> Result<Vec<(String, usize)>, ContextError> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize, &str)> =
            roots.iter().map(|r| (r.as_str(), 0, from)).collect();
        let mut order = Vec::new();

        while let Some((name, depth, parent)) = queue.pop_front() {
            if depth > self.max_depth || !visited.insert(name) {
                continue;
            }

            let Some(def) = self.types.get(name) else {
                if self.strict {
                    return Err(ContextError::UnknownType {
                        name: name.to_string(),
                        from: parent.to_string(),
                    });
                }
                debug!(type_name = name, from = parent, "No definition for referenced type");
                continue;
            };

            order.push((name.to_string(), depth));
            for next in &def.references {
                if !visited.contains(next.as_str()) {
                    queue.push_back((next.as_str(), depth + 1, name));
                }
            }
        }

        Ok(order)
    }
}

#[async_trait]
impl ContextProvider for TypeGraphContextProvider {
    async fn context_for(
        &self,
        location: &SourceLocation,
        target: &Target,
    ) -> Result<String, ContextError> {
        let resolved = self.resolve(&target.references, &target.name)?;

        let mut sections = Vec::new();
        if let Some(ref context) = target.context {
            if !context.trim().is_empty() {
                sections.push(context.trim_end().to_string());
            }
        }
        for (name, _) in &resolved {
            if let Some(def) = self.types.get(name) {
                sections.push(format!("// {}\n{}", name, def.definition.trim_end()));
            }
        }

        debug!(
            target_name = %target.name,
            location = %location,
            types = resolved.len(),
            "Resolved type context"
        );
        Ok(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(definition: &str, references: &[&str]) -> TypeDefinition {
        TypeDefinition {
            definition: definition.to_string(),
            references: references.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn table() -> BTreeMap<String, TypeDefinition> {
        let mut types = BTreeMap::new();
        types.insert("Shape".to_string(), def("enum Shape { C(Circle), P(Poly) }", &["Circle", "Poly"]));
        types.insert("Circle".to_string(), def("struct Circle { c: Point }", &["Point"]));
        types.insert("Poly".to_string(), def("struct Poly { pts: Vec<Point>, s: Shape }", &["Point", "Shape"]));
        types.insert("Point".to_string(), def("struct Point { x: f64, y: Coord }", &["Coord"]));
        types.insert("Coord".to_string(), def("type Coord = f64;", &[]));
        types
    }

    fn target(references: &[&str]) -> Target {
        Target::new(
            "area",
            "fn area(s: &Shape) -> f64",
            "Compute the area.",
            SourceLocation {
                file: "geo.rs".to_string(),
                line: 1,
            },
        )
        .with_references(references.iter().map(|r| r.to_string()).collect())
    }

    #[test]
    fn test_depth_cap() {
        let provider = TypeGraphContextProvider::new(table(), 1);
        let resolved = provider.resolve(&["Shape".to_string()], "area").unwrap();
        let names: Vec<_> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Shape", "Circle", "Poly"]);
        assert!(resolved.iter().all(|(_, d)| *d <= 1));

        let provider = TypeGraphContextProvider::new(table(), 0);
        assert_eq!(provider.resolve(&["Shape".to_string()], "area").unwrap().len(), 1);
    }

    #[test]
    fn test_cycles_visit_once() {
        let provider = TypeGraphContextProvider::new(table(), 10);
        let resolved = provider.resolve(&["Shape".to_string()], "area").unwrap();
        let names: Vec<_> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Shape", "Circle", "Poly", "Point", "Coord"]);
    }

    #[test]
    fn test_unknown_types() {
        let lenient = TypeGraphContextProvider::new(table(), 2);
        let resolved = lenient
            .resolve(&["Widget".to_string(), "Coord".to_string()], "area")
            .unwrap();
        assert_eq!(resolved, vec![("Coord".to_string(), 0)]);

        let strict = lenient.with_strict(true);
        let err = strict.resolve(&["Widget".to_string()], "area").unwrap_err();
        assert_eq!(err.to_string(), "unknown type 'Widget' referenced from area");
    }

    #[tokio::test]
    async fn test_context_blob() {
        let provider = TypeGraphContextProvider::new(table(), 0);
        let t = target(&["Coord"]).with_context("Coordinates are metres.");
        let blob = provider.context_for(&t.location, &t).await.unwrap();
        assert_eq!(blob, "Coordinates are metres.\n\n// Coord\ntype Coord = f64;");
    }

    #[tokio::test]
    async fn test_static_provider() {
        let t = target(&[]);
        assert_eq!(StaticContextProvider.context_for(&t.location, &t).await.unwrap(), "");
        let t = t.with_context("static");
        assert_eq!(StaticContextProvider.context_for(&t.location, &t).await.unwrap(), "static");
    }
}
