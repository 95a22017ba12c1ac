//! Active policy register
//!
//! One [`PolicySet`] is active at a time. Readers clone its `Arc` under a
//! short read lock and evaluate outside of it; a reload swaps the pointer under
//! the write lock.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::bundle::DocumentStore;
use crate::compiler::CompiledPolicy;
use crate::error::{AuthzError, Result};

/// Compiled rules and the documents they were compiled against
///
/// Immutable once built. The compiled rules and documents always come from
/// the same bundle.
pub struct PolicySet {
    compiled: Arc<dyn CompiledPolicy>,
    documents: Arc<DocumentStore>,
    revision: String,
    generation: u64,
    source: Option<PathBuf>,
    loaded_at: DateTime<Utc>,
}

impl PolicySet {
    pub fn new(
        compiled: Arc<dyn CompiledPolicy>,
        documents: impl Into<Arc<DocumentStore>>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            compiled,
            documents: documents.into(),
            revision: revision.into(),
            generation: 0,
            source: None,
            loaded_at: Utc::now(),
        }
    }

    /// Record the bundle directory this set was read from
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn compiled(&self) -> &dyn CompiledPolicy {
        self.compiled.as_ref()
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Bundle content digest
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Publish sequence number; 0 until published
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

impl fmt::Debug for PolicySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySet")
            .field("revision", &self.revision)
            .field("generation", &self.generation)
            .field("source", &self.source)
            .field("loaded_at", &self.loaded_at)
            .field("compiled", &self.compiled)
            .finish()
    }
}

/// Holder of the active [`PolicySet`]
#[derive(Default)]
pub struct PolicyRegister {
    active: RwLock<Option<Arc<PolicySet>>>,
    generation: AtomicU64,
}

impl PolicyRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `set` the active policy set.
    ///
    /// Returns the newly active set and the one it superseded.
    pub fn publish(&self, mut set: PolicySet) -> (Arc<PolicySet>, Option<Arc<PolicySet>>) {
        let mut active = self.active.write();

        set.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let set = Arc::new(set);
        let previous = active.replace(Arc::clone(&set));
        drop(active);

        info!(
            generation = set.generation,
            revision = %set.revision,
            previous_generation = previous.as_ref().map(|p| p.generation),
            "published policy set"
        );

        (set, previous)
    }

    /// The active set, `None` before the first publish
    pub fn snapshot(&self) -> Option<Arc<PolicySet>> {
        self.active.read().clone()
    }

    /// The active set
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::NoActivePolicy`] before the first publish.
    pub fn require_snapshot(&self) -> Result<Arc<PolicySet>> {
        self.snapshot().ok_or(AuthzError::NoActivePolicy)
    }

    pub fn is_loaded(&self) -> bool {
        self.active.read().is_some()
    }

    /// Number of publishes so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for PolicyRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegister")
            .field("generation", &self.generation())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Input, QueryResult, ResultSet};
    use serde_json::{json, Map, Value};
    use std::thread;

    /// Answers every query with the version it was built for
    #[derive(Debug)]
    struct VersionedPolicy(u64);

    impl CompiledPolicy for VersionedPolicy {
        fn evaluate(&self, query: &str, _input: &Input, _documents: &DocumentStore) -> Result<ResultSet> {
            Ok(vec![QueryResult::single(query, json!(self.0))])
        }

        fn rule_paths(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn versioned_set(version: u64) -> PolicySet {
        let mut documents = Map::new();
        documents.insert("version".to_string(), json!(version));
        PolicySet::new(
            Arc::new(VersionedPolicy(version)),
            DocumentStore::new(documents),
            format!("rev-{}", version),
        )
    }

    fn versions(set: &PolicySet) -> (Value, Value) {
        let compiled = set
            .compiled()
            .evaluate("data.version", &Input::new(), set.documents())
            .unwrap()[0]
            .expressions[0]
            .value
            .clone();
        let documents = set.documents().get(&["version"]).cloned().unwrap();
        (compiled, documents)
    }

    #[test]
    fn test_empty_register() {
        let register = PolicyRegister::new();
        assert!(register.snapshot().is_none());
        assert!(!register.is_loaded());
        assert_eq!(register.generation(), 0);
        assert!(matches!(register.require_snapshot(), Err(AuthzError::NoActivePolicy)));
    }

    #[test]
    fn test_publish_replaces_and_returns_previous() {
        let register = PolicyRegister::new();

        let (first, previous) = register.publish(versioned_set(1));
        assert!(previous.is_none());
        assert_eq!(first.generation(), 1);

        let (second, previous) = register.publish(versioned_set(2));
        assert_eq!(previous.unwrap().revision(), "rev-1");
        assert_eq!(second.generation(), 2);
        assert_eq!(register.snapshot().unwrap().revision(), "rev-2");
        assert_eq!(register.generation(), 2);
    }

    #[test]
    fn test_snapshot_outlives_publish() {
        let register = PolicyRegister::new();
        register.publish(versioned_set(1));

        let held = register.snapshot().unwrap();
        register.publish(versioned_set(2));

        assert_eq!(held.revision(), "rev-1");
        assert_eq!(versions(&held), (json!(1), json!(1)));
    }

    #[test]
    fn test_concurrent_snapshots_see_whole_sets() {
        let register = Arc::new(PolicyRegister::new());
        register.publish(versioned_set(0));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let register = Arc::clone(&register);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        let set = register.snapshot().unwrap();
                        let (compiled, documents) = versions(&set);
                        assert_eq!(compiled, documents);
                        assert!(set.generation() >= last);
                        last = set.generation();
                    }
                })
            })
            .collect();

        for version in 1..=50 {
            register.publish(versioned_set(version));
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(register.snapshot().unwrap().revision(), "rev-50");
    }
}
