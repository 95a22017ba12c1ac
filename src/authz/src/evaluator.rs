//! Query evaluation and decision normalization

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::compiler::{DecisionValue, Input};
use crate::engine::MetricsCollector;
use crate::error::{AuthzError, Result};
use crate::register::{PolicyRegister, PolicySet};
use crate::types::{AuthorizationRequest, AuthorizationResult};

/// Evaluates authorization checks against the active policy set
///
/// The snapshot is taken once per check; evaluation runs without holding the
/// register lock.
#[derive(Debug)]
pub struct QueryEvaluator {
    register: Arc<PolicyRegister>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl QueryEvaluator {
    pub fn new(register: Arc<PolicyRegister>) -> Self {
        Self {
            register,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register(&self) -> &Arc<PolicyRegister> {
        &self.register
    }

    /// Evaluate one request
    pub fn evaluate(&self, request: &AuthorizationRequest) -> AuthorizationResult {
        self.check(&request.policy_name, &request.input)
    }

    /// Evaluate `policy_name` against `input`
    ///
    /// An unknown policy is `Ok(false)`.
    pub fn authorised(&self, policy_name: &str, input: &Input) -> Result<bool> {
        self.check(policy_name, input).into_result()
    }

    fn check(&self, policy_name: &str, input: &Input) -> AuthorizationResult {
        let start = Instant::now();

        let outcome = self
            .register
            .require_snapshot()
            .and_then(|set| decide(&set, policy_name, input));
        let elapsed = start.elapsed();

        match outcome {
            Ok(Some(allowed)) => {
                debug!(policy = %policy_name, allowed, elapsed_us = elapsed.as_micros() as u64, "policy evaluated");
                if let Some(metrics) = &self.metrics {
                    metrics.record_decision(allowed, elapsed);
                }
                AuthorizationResult::decided(allowed)
            }
            Ok(None) => {
                warn!(policy = %policy_name, "policy produced no result, denying");
                if let Some(metrics) = &self.metrics {
                    metrics.record_unknown_policy(elapsed);
                }
                AuthorizationResult::denied()
            }
            Err(error) => {
                debug!(policy = %policy_name, error = %error, "policy evaluation failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(elapsed);
                }
                AuthorizationResult::failed(error)
            }
        }
    }
}

/// The decision `policy_name` yields in `set`; `None` when it yields nothing
fn decide(set: &PolicySet, policy_name: &str, input: &Input) -> Result<Option<bool>> {
    let results = set.compiled().evaluate(policy_name, input, set.documents())?;

    let Some(expression) = results.first().and_then(|result| result.expressions.first()) else {
        return Ok(None);
    };

    match expression.decision() {
        DecisionValue::Bool(allowed) => Ok(Some(allowed)),
        DecisionValue::Other(type_name) => Err(AuthzError::NonBooleanDecision(type_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::DocumentStore;
    use crate::compiler::{CompiledPolicy, QueryResult, ResultSet};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Canned answers keyed by query
    #[derive(Debug, Default)]
    struct CannedPolicy {
        answers: HashMap<String, ResultSet>,
    }

    impl CannedPolicy {
        fn answer(mut self, query: &str, value: Value) -> Self {
            self.answers
                .insert(query.to_string(), vec![QueryResult::single(query, value)]);
            self
        }

        fn empty_result(mut self, query: &str) -> Self {
            self.answers
                .insert(query.to_string(), vec![QueryResult { expressions: Vec::new() }]);
            self
        }
    }

    impl CompiledPolicy for CannedPolicy {
        fn evaluate(&self, query: &str, _input: &Input, _documents: &DocumentStore) -> Result<ResultSet> {
            if query == "broken" {
                return Err(AuthzError::Evaluation("engine failure".to_string()));
            }
            Ok(self.answers.get(query).cloned().unwrap_or_default())
        }

        fn rule_paths(&self) -> Vec<String> {
            self.answers.keys().cloned().collect()
        }
    }

    fn evaluator(policy: CannedPolicy) -> (QueryEvaluator, Arc<MetricsCollector>) {
        let register = Arc::new(PolicyRegister::new());
        register.publish(PolicySet::new(Arc::new(policy), DocumentStore::empty(), "test"));
        let metrics = Arc::new(MetricsCollector::new());
        (QueryEvaluator::new(register).with_metrics(Arc::clone(&metrics)), metrics)
    }

    #[test]
    fn test_boolean_decisions() {
        let (evaluator, metrics) = evaluator(
            CannedPolicy::default()
                .answer("data.p.allow", json!(true))
                .answer("data.p.deny", json!(false)),
        );

        assert!(evaluator.authorised("data.p.allow", &Input::new()).unwrap());
        assert!(!evaluator.authorised("data.p.deny", &Input::new()).unwrap());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.allowed_decisions, 1);
        assert_eq!(snapshot.denied_decisions, 1);
    }

    #[test]
    fn test_empty_results_are_denied_without_error() {
        let (evaluator, metrics) = evaluator(CannedPolicy::default().empty_result("data.p.hollow"));

        let missing = evaluator.evaluate(&AuthorizationRequest::new("data.p.missing", Input::new()));
        assert!(!missing.allowed);
        assert!(missing.error.is_none());

        let hollow = evaluator.evaluate(&AuthorizationRequest::new("data.p.hollow", Input::new()));
        assert!(!hollow.allowed);
        assert!(hollow.error.is_none());

        assert_eq!(metrics.snapshot().unknown_policies, 2);
    }

    #[test]
    fn test_non_boolean_is_error() {
        let (evaluator, metrics) = evaluator(
            CannedPolicy::default()
                .answer("data.p.name", json!("admin"))
                .answer("data.p.count", json!(3)),
        );

        let err = evaluator.authorised("data.p.name", &Input::new()).unwrap_err();
        assert!(matches!(err, AuthzError::NonBooleanDecision("string")));
        assert_eq!(
            err.to_string(),
            "Could not authorise action, policy returned type: string"
        );

        let result = evaluator.evaluate(&AuthorizationRequest::new("data.p.count", Input::new()));
        assert!(!result.allowed);
        assert!(matches!(result.error, Some(AuthzError::NonBooleanDecision("number"))));

        assert_eq!(metrics.snapshot().error_count, 2);
    }

    #[test]
    fn test_engine_error_propagates() {
        let (evaluator, _) = evaluator(CannedPolicy::default());
        let result = evaluator.evaluate(&AuthorizationRequest::new("broken", Input::new()));
        assert!(!result.allowed);
        assert!(matches!(result.error, Some(AuthzError::Evaluation(_))));
    }

    #[test]
    fn test_no_active_policy() {
        let evaluator = QueryEvaluator::new(Arc::new(PolicyRegister::new()));
        let err = evaluator.authorised("data.p.allow", &Input::new()).unwrap_err();
        assert!(matches!(err, AuthzError::NoActivePolicy));
    }
}
