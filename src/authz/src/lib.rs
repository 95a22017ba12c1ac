//! # Bundle Authorization Engine
//!
//! Policy-based authorization over a directory of policy modules.
//!
//! ## Features
//!
//! - **Bundles**: YAML policy modules with CEL rule bodies plus static data
//!   documents, compiled together as one unit
//! - **Atomic reloads**: a new bundle replaces the active one only after it
//!   compiled cleanly; readers always see one whole policy set
//! - **Fail closed**: unknown policies are denied, non-boolean results are
//!   errors
//! - **Concurrent batches** bounded by a configurable concurrency limit
//! - **Hot reload** of the bundle directory (`watch` feature)
//!
//! ## Example
//!
//! ```no_run
//! use bundle_authz::{Authorizer, AuthorizationRequest, EngineConfig, Input};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let authorizer = Authorizer::new(EngineConfig::default().with_bundle_path("policies"))?;
//!
//!     let mut input = Input::new();
//!     input.insert("field".to_string(), json!("name"));
//!
//!     if authorizer.authorised("data.api.entity.object.viewField", &input)? {
//!         println!("Access granted!");
//!     }
//!
//!     let batch = vec![AuthorizationRequest::new("data.api.entity.object.viewField", input)];
//!     for outcome in authorizer.run_batch(batch).await {
//!         println!("{}: {:?}", outcome.index, outcome.result.allowed);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod bundle;
pub mod cel; // CEL expression layer
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod register;
pub mod types;

// Re-export commonly used types
pub use batch::BatchCoordinator;
pub use bundle::{BundleLoader, DocumentStore};
#[cfg(feature = "watch")]
pub use bundle::BundleWatcher;
pub use compiler::{CelCompiler, CompiledPolicy, DecisionValue, Input, PolicyCompiler, ResultSet};
pub use engine::{Authorizer, EngineConfig, EngineMetrics, MetricsCollector};
pub use error::{AuthzError, CompileError, Diagnostic, Result};
pub use evaluator::QueryEvaluator;
pub use register::{PolicyRegister, PolicySet};
pub use types::{AuthorizationRequest, AuthorizationResult, BatchOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
