//! Bundle loading: read, compile, publish

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::Bundle;
use crate::compiler::{CelCompiler, PolicyCompiler};
use crate::engine::MetricsCollector;
use crate::error::Result;
use crate::register::{PolicyRegister, PolicySet};

/// Loads bundles into a [`PolicyRegister`]
///
/// The register is only touched after the bundle has been read and compiled
/// successfully; any failure leaves the active set in force.
pub struct BundleLoader {
    compiler: Arc<dyn PolicyCompiler>,
    register: Arc<PolicyRegister>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BundleLoader {
    pub fn new(compiler: Arc<dyn PolicyCompiler>, register: Arc<PolicyRegister>) -> Self {
        Self {
            compiler,
            register,
            metrics: None,
        }
    }

    /// Loader using the CEL compiler
    pub fn with_register(register: Arc<PolicyRegister>) -> Self {
        Self::new(Arc::new(CelCompiler::new()), register)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register(&self) -> &Arc<PolicyRegister> {
        &self.register
    }

    /// Read and compile the bundle at `path` without publishing it
    pub fn compile(&self, path: &Path) -> Result<PolicySet> {
        let bundle = Bundle::read(path)?;
        let compiled = self.compiler.compile(&bundle.modules, &bundle.documents)?;

        Ok(PolicySet::new(compiled, bundle.documents, bundle.revision).with_source(bundle.root))
    }

    /// Read, compile and publish the bundle at `path`.
    ///
    /// Returns the newly active set.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::BundleLoad`](crate::AuthzError::BundleLoad) if the path cannot be read
    /// - [`AuthzError::InvalidDocument`](crate::AuthzError::InvalidDocument) for a bad data document
    /// - [`AuthzError::Compile`](crate::AuthzError::Compile) with every compiler diagnostic
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<PolicySet>> {
        let path = path.as_ref();
        let start = Instant::now();

        let set = match self.compile(path) {
            Ok(set) => set,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load policy bundle, keeping active policy set");
                if let Some(metrics) = &self.metrics {
                    metrics.record_reload(false);
                }
                return Err(e);
            }
        };

        let rules = set.compiled().rule_paths().len();
        let (active, _previous) = self.register.publish(set);
        if let Some(metrics) = &self.metrics {
            metrics.record_reload(true);
        }

        info!(
            path = %path.display(),
            rules,
            revision = %active.revision(),
            generation = active.generation(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "policy bundle loaded"
        );

        Ok(active)
    }
}

impl std::fmt::Debug for BundleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLoader")
            .field("register", &self.register)
            .finish_non_exhaustive()
    }
}
