//! Authorizer: the host-facing surface
//!
//! Wires the bundle loader, policy register, query evaluator and batch
//! coordinator together around one shared register.
//!
//! ```text
//! load_bundle ─► BundleLoader ─► PolicyCompiler ─► PolicyRegister::publish
//!                                                        │
//! authorised / run_batch ─► BatchCoordinator ─► QueryEvaluator ─► snapshot
//!                                                        │
//!                                                    [Metrics]
//! ```

pub mod metrics;

pub use metrics::{EngineMetrics, MetricsCollector};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::batch::BatchCoordinator;
use crate::bundle::BundleLoader;
#[cfg(feature = "watch")]
use crate::bundle::BundleWatcher;
use crate::compiler::{CelCompiler, Input, PolicyCompiler};
use crate::error::{AuthzError, Result};
use crate::evaluator::QueryEvaluator;
use crate::register::{PolicyRegister, PolicySet};
use crate::types::{AuthorizationRequest, AuthorizationResult, BatchOutcome};

/// Authorizer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Bundle loaded when the authorizer is built
    pub bundle_path: Option<PathBuf>,

    /// Upper bound on concurrently running evaluations in a batch
    pub max_concurrency: usize,

    /// Reload the configured bundle when it changes on disk
    pub watch: bool,

    /// Quiet period before a change triggers a reload
    pub watch_debounce: Duration,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bundle_path: None,
            max_concurrency: num_cpus::get() * 4,
            watch: false,
            watch_debounce: Duration::from_millis(250),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Configuration from `AUTHZ_*` environment variables over the defaults
    ///
    /// - `AUTHZ_BUNDLE_PATH` - bundle directory
    /// - `AUTHZ_MAX_CONCURRENCY` - batch concurrency bound
    /// - `AUTHZ_WATCH` - `true`/`false`, `1`/`0`
    /// - `AUTHZ_WATCH_DEBOUNCE_MS` - reload debounce in milliseconds
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("AUTHZ_BUNDLE_PATH").filter(|p| !p.is_empty()) {
            config.bundle_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("AUTHZ_MAX_CONCURRENCY") {
            config.max_concurrency = parse_var("AUTHZ_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("AUTHZ_WATCH") {
            config.watch = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => return Err(AuthzError::Config(format!("AUTHZ_WATCH: invalid boolean '{}'", value))),
            };
        }
        if let Some(value) = lookup("AUTHZ_WATCH_DEBOUNCE_MS") {
            config.watch_debounce = Duration::from_millis(parse_var("AUTHZ_WATCH_DEBOUNCE_MS", &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_bundle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_path = Some(path.into());
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// # Errors
    ///
    /// Returns [`AuthzError::Config`] for a zero concurrency bound.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(AuthzError::Config("max_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AuthzError::Config(format!("{}: invalid value '{}': {}", name, value, e)))
}

/// Policy-based authorizer over a reloadable bundle
pub struct Authorizer {
    config: EngineConfig,
    register: Arc<PolicyRegister>,
    loader: Arc<BundleLoader>,
    evaluator: Arc<QueryEvaluator>,
    batch: BatchCoordinator,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Authorizer {
    /// Create an authorizer compiling CEL policy modules
    ///
    /// If `config.bundle_path` is set the bundle is loaded before returning and
    /// a load failure is returned as the error.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_compiler(config, Arc::new(CelCompiler::new()))
    }

    /// Create an authorizer with a custom policy compiler
    pub fn with_compiler(config: EngineConfig, compiler: Arc<dyn PolicyCompiler>) -> Result<Self> {
        config.validate()?;

        let register = Arc::new(PolicyRegister::new());
        let metrics = config.enable_metrics.then(|| Arc::new(MetricsCollector::new()));

        let mut loader = BundleLoader::new(compiler, Arc::clone(&register));
        let mut evaluator = QueryEvaluator::new(Arc::clone(&register));
        if let Some(metrics) = &metrics {
            loader = loader.with_metrics(Arc::clone(metrics));
            evaluator = evaluator.with_metrics(Arc::clone(metrics));
        }
        let evaluator = Arc::new(evaluator);
        let batch = BatchCoordinator::new(Arc::clone(&evaluator), config.max_concurrency)?;

        info!(
            "Authorizer initialized with max_concurrency={}, metrics={}, watch={}",
            config.max_concurrency, config.enable_metrics, config.watch
        );

        let authorizer = Self {
            config,
            register,
            loader: Arc::new(loader),
            evaluator,
            batch,
            metrics,
        };

        if let Some(path) = authorizer.config.bundle_path.clone() {
            authorizer.load_bundle(path)?;
        }

        Ok(authorizer)
    }

    /// Load the bundle at `path` and make it the active policy set.
    ///
    /// On failure the previously active set stays in force.
    pub fn load_bundle(&self, path: impl AsRef<Path>) -> Result<Arc<PolicySet>> {
        self.loader.load(path)
    }

    /// Whether `input` is permitted by `policy_name`.
    ///
    /// A policy name that yields no result is denied without error.
    pub fn authorised(&self, policy_name: &str, input: &Input) -> Result<bool> {
        self.evaluator.authorised(policy_name, input)
    }

    /// Evaluate one request
    pub fn evaluate(&self, request: &AuthorizationRequest) -> AuthorizationResult {
        self.evaluator.evaluate(request)
    }

    /// Evaluate a batch concurrently, returning once every request completed
    pub async fn run_batch(&self, requests: Vec<AuthorizationRequest>) -> Vec<BatchOutcome> {
        self.batch.run_batch(requests).await
    }

    pub fn register(&self) -> &Arc<PolicyRegister> {
        &self.register
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current counters, `None` when metrics are disabled
    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|m| m.snapshot())
    }

    /// Watch `path` and reload it on change
    #[cfg(feature = "watch")]
    pub fn watch(&self, path: impl Into<PathBuf>) -> Result<BundleWatcher> {
        BundleWatcher::start(path, Arc::clone(&self.loader), self.config.watch_debounce)
    }

    /// Watch the configured bundle if `config.watch` is set
    #[cfg(feature = "watch")]
    pub fn watch_configured(&self) -> Result<Option<BundleWatcher>> {
        match (&self.config.bundle_path, self.config.watch) {
            (Some(path), true) => self.watch(path.clone()).map(Some),
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("config", &self.config)
            .field("register", &self.register)
            .finish_non_exhaustive()
    }
}
