//! Error types for the authorization engine

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Bundle root or one of its entries could not be read
    #[error("Failed to load bundle at {path}: {source}")]
    BundleLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A static data document is malformed or conflicts with another
    #[error("Invalid document {path}: {message}")]
    InvalidDocument { path: PathBuf, message: String },

    /// Policy compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The rule engine could not execute the query
    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),

    /// The policy evaluated to something other than a boolean
    #[error("Could not authorise action, policy returned type: {0}")]
    NonBooleanDecision(&'static str),

    /// No policy set has been published yet
    #[error("No policy set is loaded")]
    NoActivePolicy,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Watcher error
    #[cfg(feature = "watch")]
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl AuthzError {
    /// Whether this error happened while loading or compiling a bundle
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            AuthzError::BundleLoad { .. } | AuthzError::InvalidDocument { .. } | AuthzError::Compile(_)
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Single compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Module the diagnostic refers to (relative path in the bundle)
    pub file: String,

    /// Human readable message
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

/// Aggregated diagnostics from one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn single(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![Diagnostic::new(file, message)])
    }

    pub fn push(&mut self, file: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(file, message));
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// `Ok(())` when nothing was reported
    pub fn into_result(self) -> std::result::Result<(), CompileError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.diagnostics.as_slice() {
            [] => write!(f, "compilation failed"),
            [only] => write!(f, "1 error occurred: {}", only),
            many => {
                write!(f, "{} errors occurred:", many.len())?;
                for diagnostic in many {
                    write!(f, "\n{}", diagnostic)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompileError {}
