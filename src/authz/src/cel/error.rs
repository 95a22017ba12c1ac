//! Error types for CEL operations

use thiserror::Error;

/// CEL operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CelError {
    #[error("CEL compilation failed: {0}")]
    CompilationError(String),

    #[error("CEL evaluation failed: {0}")]
    EvaluationError(String),

    /// The expression referenced a key or variable that does not exist.
    /// Rule evaluation treats this as "no value" rather than a failure.
    #[error("Undefined reference: {0}")]
    Undefined(String),
}

impl CelError {
    pub fn is_undefined(&self) -> bool {
        matches!(self, CelError::Undefined(_))
    }
}

/// Result type for CEL operations
pub type Result<T> = std::result::Result<T, CelError>;
