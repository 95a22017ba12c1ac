//! Policy compilation
//!
//! The rest of the crate only sees the [`PolicyCompiler`] / [`CompiledPolicy`]
//! seam. [`CelCompiler`] is the shipped implementation: rule bodies are CEL
//! expressions grouped into YAML modules.

pub mod cel_policy;
pub mod graph;
pub mod module;
pub mod refs;
pub mod result;

pub use cel_policy::{CelCompiler, CelPolicy};
pub use graph::{DependencyGraph, GraphError};
pub use module::PolicyModule;
pub use result::{DecisionValue, ExpressionValue, QueryResult, ResultSet};

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::bundle::DocumentStore;
use crate::error::{CompileError, Result};

/// Request input document
pub type Input = HashMap<String, Value>;

/// Turns a bundle's module sources into an evaluable artifact.
///
/// All modules are compiled together so references between them resolve;
/// any diagnostic fails the whole compilation.
pub trait PolicyCompiler: Send + Sync {
    fn compile(
        &self,
        modules: &BTreeMap<String, String>,
        documents: &DocumentStore,
    ) -> std::result::Result<Arc<dyn CompiledPolicy>, CompileError>;
}

/// Compiled rules, immutable once built
pub trait CompiledPolicy: Send + Sync + fmt::Debug {
    /// Evaluate `query` against `input` and the bundle's documents.
    ///
    /// An undefined query yields an empty [`ResultSet`]; `Err` means the engine
    /// could not execute the query at all.
    fn evaluate(&self, query: &str, input: &Input, documents: &DocumentStore) -> Result<ResultSet>;

    /// Full paths (`data.<package>.<rule>`) of every compiled rule
    fn rule_paths(&self) -> Vec<String>;
}
