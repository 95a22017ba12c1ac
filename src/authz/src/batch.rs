//! Concurrent batch evaluation
//!
//! Every request of a batch is dispatched as its own task. Evaluation is
//! synchronous, so each unit runs on the blocking pool while holding a permit
//! from a semaphore that bounds how many evaluate at once. The caller waits
//! until every unit has reported, whatever the individual outcomes.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

use crate::error::{AuthzError, Result};
use crate::evaluator::QueryEvaluator;
use crate::types::{AuthorizationRequest, AuthorizationResult, BatchOutcome};

/// Fans a batch out over the evaluator and joins on all results
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    evaluator: Arc<QueryEvaluator>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl BatchCoordinator {
    /// Create a coordinator running at most `max_concurrency` evaluations at once
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Config`] if `max_concurrency` is zero.
    pub fn new(evaluator: Arc<QueryEvaluator>, max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(AuthzError::Config("max_concurrency must be at least 1".to_string()));
        }
        if max_concurrency > Semaphore::MAX_PERMITS {
            return Err(AuthzError::Config(format!(
                "max_concurrency must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            evaluator,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Evaluate every request and return one outcome per request.
    ///
    /// Outcomes arrive in completion order; pair them with their request
    /// through [`BatchOutcome::index`]. A failing request never affects the
    /// others, and the call returns only once all of them have completed.
    pub async fn run_batch(&self, requests: Vec<AuthorizationRequest>) -> Vec<BatchOutcome> {
        let total = requests.len();
        if total == 0 {
            return Vec::new();
        }

        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel(total);

        for (index, request) in requests.into_iter().enumerate() {
            let tx = tx.clone();
            let evaluator = Arc::clone(&self.evaluator);
            let permits = Arc::clone(&self.permits);

            tokio::spawn(async move {
                let dispatched = Instant::now();
                let policy_name = request.policy_name.clone();

                let result = match permits.acquire_owned().await {
                    Ok(permit) => {
                        let joined = tokio::task::spawn_blocking(move || {
                            let result = evaluator.evaluate(&request);
                            drop(permit);
                            result
                        })
                        .await;

                        joined.unwrap_or_else(|e| {
                            AuthorizationResult::failed(AuthzError::Internal(format!(
                                "evaluation task failed: {}",
                                e
                            )))
                        })
                    }
                    Err(_) => AuthorizationResult::failed(AuthzError::Internal(
                        "batch semaphore closed".to_string(),
                    )),
                };

                if let Some(error) = &result.error {
                    warn!(index, policy = %policy_name, error = %error, "batch request failed");
                }

                let outcome = BatchOutcome {
                    index,
                    policy_name,
                    result,
                    elapsed: dispatched.elapsed(),
                };
                // The receiver lives until all outcomes are drained
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while outcomes.len() < total {
            match rx.recv().await {
                Some(outcome) => outcomes.push(outcome),
                None => {
                    error!(
                        expected = total,
                        received = outcomes.len(),
                        "batch channel closed before every request reported"
                    );
                    break;
                }
            }
        }

        debug!(
            requests = total,
            allowed = outcomes.iter().filter(|o| o.result.allowed).count(),
            errors = outcomes.iter().filter(|o| o.result.is_error()).count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch completed"
        );

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::DocumentStore;
    use crate::compiler::{CompiledPolicy, Input, QueryResult, ResultSet};
    use crate::register::{PolicyRegister, PolicySet};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Allows `data.allow`, panics on `data.panic`, errors on `data.error`,
    /// and tracks how many evaluations overlap.
    #[derive(Debug, Default)]
    struct TrackingPolicy {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CompiledPolicy for TrackingPolicy {
        fn evaluate(&self, query: &str, _input: &Input, _documents: &DocumentStore) -> Result<ResultSet> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.running.fetch_sub(1, Ordering::SeqCst);

            match query {
                "data.allow" => Ok(vec![QueryResult::single(query, json!(true))]),
                "data.error" => Err(AuthzError::Evaluation("boom".to_string())),
                "data.panic" => panic!("policy panicked"),
                _ => Ok(Vec::new()),
            }
        }

        fn rule_paths(&self) -> Vec<String> {
            vec!["data.allow".to_string()]
        }
    }

    fn coordinator(max_concurrency: usize) -> (BatchCoordinator, Arc<TrackingPolicy>) {
        let policy = Arc::new(TrackingPolicy::default());
        let register = Arc::new(PolicyRegister::new());
        register.publish(PolicySet::new(policy.clone(), DocumentStore::empty(), "tracking"));
        let evaluator = Arc::new(QueryEvaluator::new(register));
        (BatchCoordinator::new(evaluator, max_concurrency).unwrap(), policy)
    }

    fn requests(names: &[&str]) -> Vec<AuthorizationRequest> {
        names
            .iter()
            .map(|name| AuthorizationRequest::new(*name, Input::new()))
            .collect()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let evaluator = Arc::new(QueryEvaluator::new(Arc::new(PolicyRegister::new())));
        let err = BatchCoordinator::new(evaluator, 0).unwrap_err();
        assert!(matches!(err, AuthzError::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (coordinator, _) = coordinator(4);
        assert!(coordinator.run_batch(Vec::new()).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_request_reports() {
        let (coordinator, _) = coordinator(4);
        let names = ["data.allow", "data.error", "data.missing", "data.allow", "data.panic"];

        let outcomes = coordinator.run_batch(requests(&names)).await;

        assert_eq!(outcomes.len(), names.len());
        let indices: BTreeSet<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, (0..names.len()).collect());

        for outcome in &outcomes {
            assert_eq!(outcome.policy_name, names[outcome.index]);
            match outcome.policy_name.as_str() {
                "data.allow" => assert!(outcome.result.allowed && !outcome.result.is_error()),
                "data.missing" => assert!(!outcome.result.allowed && !outcome.result.is_error()),
                "data.error" => assert!(matches!(outcome.result.error, Some(AuthzError::Evaluation(_)))),
                "data.panic" => assert!(matches!(outcome.result.error, Some(AuthzError::Internal(_)))),
                other => panic!("unexpected policy {}", other),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let (coordinator, policy) = coordinator(2);
        let outcomes = coordinator.run_batch(requests(&["data.allow"; 16])).await;

        assert_eq!(outcomes.len(), 16);
        assert!(outcomes.iter().all(|o| o.result.allowed));
        assert!(policy.peak.load(Ordering::SeqCst) <= 2);
    }
}
