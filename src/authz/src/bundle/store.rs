//! In-memory static document store
//!
//! Holds the merged `data` tree of a bundle. The tree is immutable once the
//! store is built; the CEL form is converted once so evaluations only clone
//! reference-counted maps.

use cel_interpreter::objects::Value as CelValue;
use serde_json::{Map, Value};
use std::fmt;

use crate::cel::convert::json_to_cel;

/// Read-only tree of base documents available to every evaluation
pub struct DocumentStore {
    root: Value,
    cel_root: CelValue,
}

impl DocumentStore {
    /// Build a store from a merged document tree
    pub fn new(root: Map<String, Value>) -> Self {
        let root = Value::Object(root);
        let cel_root = json_to_cel(&root);
        Self { root, cel_root }
    }

    /// Store with no documents
    pub fn empty() -> Self {
        Self::new(Map::new())
    }

    /// The whole tree as JSON
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// The whole tree as a CEL value
    pub fn cel_root(&self) -> &CelValue {
        &self.cel_root
    }

    /// Look up a value by path segments below `data`
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.root, |node, segment| node.get(segment.as_ref()))
    }

    pub fn contains<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.get(path).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_object().map_or(true, Map::is_empty)
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("root", &self.root)
            .finish()
    }
}

/// Deep-merge `document` into `root` at `mount`.
///
/// Objects merge recursively; any other value already present at a path is a
/// conflict and the offending dotted path is returned.
pub fn merge_document(
    root: &mut Map<String, Value>,
    mount: &[String],
    document: Map<String, Value>,
) -> Result<(), String> {
    let mut node = root;
    let mut walked = Vec::with_capacity(mount.len());

    for segment in mount {
        walked.push(segment.as_str());
        let entry = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            _ => return Err(format!("data.{}", walked.join("."))),
        };
    }

    let prefix = walked.join(".");
    merge_objects(node, document, &prefix)
}

fn merge_objects(
    target: &mut Map<String, Value>,
    source: Map<String, Value>,
    prefix: &str,
) -> Result<(), String> {
    for (key, value) in source {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match target.get_mut(&key) {
            None => {
                target.insert(key, value);
            }
            Some(Value::Object(existing)) => match value {
                Value::Object(incoming) => merge_objects(existing, incoming, &path)?,
                _ => return Err(format!("data.{}", path)),
            },
            Some(_) => return Err(format!("data.{}", path)),
        }
    }
    Ok(())
}
