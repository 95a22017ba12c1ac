//! Policy bundles: discovery, static documents and loading
//!
//! A bundle is a directory tree. `data.json` / `data.yaml` / `data.yml` files
//! are static documents mounted at the path of their directory relative to the
//! bundle root; every other `*.yaml` / `*.yml` file is a policy module.
//! Entries whose name starts with `.` are skipped.

pub mod loader;
pub mod store;
#[cfg(feature = "watch")]
pub mod watcher;

pub use loader::BundleLoader;
pub use store::DocumentStore;
#[cfg(feature = "watch")]
pub use watcher::BundleWatcher;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{AuthzError, CompileError, Result};
use store::merge_document;

/// File names holding static documents
pub const DATA_FILES: [&str; 3] = ["data.json", "data.yaml", "data.yml"];

/// What a bundle file contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Document,
    Module,
}

impl FileKind {
    /// Classify a path, `None` for files the bundle ignores
    pub fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }
        if DATA_FILES.contains(&name) {
            return Some(FileKind::Document);
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(FileKind::Module),
            _ => None,
        }
    }
}

/// A bundle read from disk, not yet compiled
#[derive(Debug)]
pub struct Bundle {
    /// Directory the bundle was read from
    pub root: PathBuf,

    /// Policy module sources keyed by path relative to the root
    pub modules: BTreeMap<String, String>,

    /// Merged static documents
    pub documents: DocumentStore,

    /// BLAKE3 digest over every module and document
    pub revision: String,
}

impl Bundle {
    /// Walk `root` and gather its modules and documents.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::BundleLoad`] if the root or any entry cannot be read
    /// - [`AuthzError::InvalidDocument`] if a document does not parse, is not an
    ///   object, or conflicts with another document
    /// - [`AuthzError::Compile`] naming every module that is not valid UTF-8
    pub fn read(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let metadata = fs::metadata(root).map_err(|source| AuthzError::BundleLoad {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(AuthzError::BundleLoad {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "bundle root is not a directory"),
            });
        }

        let mut files = BTreeMap::new();
        collect_files(root, root, &mut files)?;

        let mut hasher = blake3::Hasher::new();
        let mut modules = BTreeMap::new();
        let mut documents = Map::new();
        let mut undecodable = CompileError::default();

        for (relative, (kind, path, bytes)) in files {
            hasher.update(relative.as_bytes());
            hasher.update(&[0]);
            hasher.update(&bytes);
            hasher.update(&[0]);

            match kind {
                FileKind::Module => {
                    match String::from_utf8(bytes) {
                        Ok(source) => {
                            debug!(module = %relative, "discovered policy module");
                            modules.insert(relative, source);
                        }
                        Err(e) => undecodable.push(relative, format!("parse error: {}", e.utf8_error())),
                    }
                }
                FileKind::Document => {
                    let document = parse_document(&path, &bytes)?;
                    let mount = mount_point(&relative);
                    merge_document(&mut documents, &mount, document).map_err(|conflict| {
                        AuthzError::InvalidDocument {
                            path: path.clone(),
                            message: format!("conflicting value at {}", conflict),
                        }
                    })?;
                    debug!(document = %relative, "discovered data document");
                }
            }
        }

        undecodable.into_result()?;

        Ok(Self {
            root: root.to_path_buf(),
            modules,
            documents: DocumentStore::new(documents),
            revision: hasher.finalize().to_hex().to_string(),
        })
    }
}

type FileEntry = (FileKind, PathBuf, Vec<u8>);

fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<String, FileEntry>) -> Result<()> {
    let load_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| AuthzError::BundleLoad { path, source }
    };

    let entries = fs::read_dir(dir).map_err(load_error(dir))?;
    for entry in entries {
        let entry = entry.map_err(load_error(dir))?;
        let path = entry.path();

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if hidden {
            continue;
        }

        let file_type = entry.file_type().map_err(load_error(&path))?;
        if file_type.is_dir() {
            collect_files(root, &path, files)?;
            continue;
        }

        let Some(kind) = FileKind::of(&path) else {
            continue;
        };
        let bytes = fs::read(&path).map_err(load_error(&path))?;
        files.insert(relative_name(root, &path), (kind, path, bytes));
    }
    Ok(())
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory components of a document's relative name
fn mount_point(relative: &str) -> Vec<String> {
    let mut segments: Vec<String> = relative.split('/').map(str::to_string).collect();
    segments.pop();
    segments
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<Map<String, Value>> {
    let invalid = |message: String| AuthzError::InvalidDocument {
        path: path.to_path_buf(),
        message,
    };

    let value: Value = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?
    } else if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_yaml::from_slice(bytes).map_err(|e| invalid(e.to_string()))?
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(invalid(format!(
            "document root must be an object, got {}",
            crate::cel::convert::json_type_name(&other)
        ))),
    }
}
