//! Core authorization types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::compiler::Input;
use crate::error::{AuthzError, Result};

/// One authorization check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Dotted rule path, e.g. `data.api.entity.object.viewField`
    pub policy_name: String,

    /// Input document for the evaluation
    #[serde(default)]
    pub input: Input,
}

impl AuthorizationRequest {
    pub fn new(policy_name: impl Into<String>, input: Input) -> Self {
        Self {
            policy_name: policy_name.into(),
            input,
        }
    }

    /// Add an input fact
    pub fn with_fact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }
}

/// Outcome of one authorization check
///
/// `allowed` is only meaningful when `error` is `None`; it is always `false`
/// alongside an error.
#[derive(Debug)]
pub struct AuthorizationResult {
    pub allowed: bool,
    pub error: Option<AuthzError>,
}

impl AuthorizationResult {
    pub fn decided(allowed: bool) -> Self {
        Self { allowed, error: None }
    }

    pub fn denied() -> Self {
        Self::decided(false)
    }

    pub fn failed(error: AuthzError) -> Self {
        Self {
            allowed: false,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<bool> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.allowed),
        }
    }
}

/// Result of one request in a batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// Position of the request in the submitted batch
    pub index: usize,

    pub policy_name: String,

    pub result: AuthorizationResult,

    /// Time from dispatch to completion, including any wait for a permit
    pub elapsed: Duration,
}
