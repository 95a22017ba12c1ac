//! Bundle hot-reload via the notify watcher
//!
//! Filesystem events are coalesced: a reload starts once no relevant event
//! has arrived for the debounce window, and always reloads the whole bundle.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BundleLoader, FileKind};
use crate::error::Result;

/// Watches a bundle directory and reloads it on change
///
/// Must be started from within a tokio runtime. Dropping the watcher stops it.
pub struct BundleWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl BundleWatcher {
    /// Start watching `root`, reloading through `loader`
    pub fn start(root: impl Into<PathBuf>, loader: Arc<BundleLoader>, debounce: Duration) -> Result<Self> {
        let root = root.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let filter_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) if is_relevant(&filter_root, &event) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let task = tokio::spawn(reload_loop(root.clone(), loader, rx, debounce));
        info!(path = %root.display(), debounce_ms = debounce.as_millis() as u64, "watching policy bundle for changes");

        Ok(Self {
            root,
            _watcher: watcher,
            task,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching
    pub fn stop(self) {}
}

impl Drop for BundleWatcher {
    fn drop(&mut self) {
        self.task.abort();
        debug!(path = %self.root.display(), "stopped watching policy bundle");
    }
}

impl std::fmt::Debug for BundleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleWatcher").field("root", &self.root).finish()
    }
}

async fn reload_loop(
    root: PathBuf,
    loader: Arc<BundleLoader>,
    mut events: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
) {
    while events.recv().await.is_some() {
        // Wait for the burst to settle
        loop {
            match tokio::time::timeout(debounce, events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let loader = Arc::clone(&loader);
        let path = root.clone();
        match tokio::task::spawn_blocking(move || loader.load(&path)).await {
            Ok(Ok(set)) => {
                info!(path = %root.display(), generation = set.generation(), "policy bundle hot-reloaded");
            }
            Ok(Err(e)) => {
                error!(path = %root.display(), error = %e, "policy bundle reload failed, keeping previous version");
            }
            Err(e) => {
                error!(path = %root.display(), error = %e, "policy bundle reload task failed");
            }
        }
    }
}

/// Whether `event` touches a module or document of the bundle at `root`
fn is_relevant(root: &Path, event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }

    event.paths.iter().any(|path| {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let hidden = relative.components().any(|c| match c {
            Component::Normal(name) => name.to_str().map_or(true, |n| n.starts_with('.')),
            _ => false,
        });
        // Removing a directory drops the files beneath it
        !hidden && (FileKind::of(path).is_some() || path.extension().is_none())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_relevant_events() {
        let root = Path::new("/bundle");

        assert!(is_relevant(root, &event(EventKind::Create(CreateKind::File), "/bundle/a/policy.yaml")));
        assert!(is_relevant(root, &event(EventKind::Modify(ModifyKind::Any), "/bundle/data.json")));
        assert!(is_relevant(root, &event(EventKind::Remove(notify::event::RemoveKind::Folder), "/bundle/a")));
    }

    #[test]
    fn test_irrelevant_events() {
        let root = Path::new("/bundle");

        assert!(!is_relevant(root, &event(EventKind::Access(AccessKind::Any), "/bundle/policy.yaml")));
        assert!(!is_relevant(root, &event(EventKind::Modify(ModifyKind::Any), "/bundle/README.md")));
        assert!(!is_relevant(root, &event(EventKind::Create(CreateKind::File), "/bundle/.policy.yaml.swp")));
        assert!(!is_relevant(root, &event(EventKind::Modify(ModifyKind::Any), "/bundle/.git/config")));
    }
}
