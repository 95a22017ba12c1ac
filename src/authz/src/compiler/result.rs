//! Query result types returned by compiled policies

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cel::convert::json_type_name;

/// Ordered results of one query; empty when the query is undefined
pub type ResultSet = Vec<QueryResult>;

/// One solution of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub expressions: Vec<ExpressionValue>,
}

impl QueryResult {
    pub fn single(text: impl Into<String>, value: Value) -> Self {
        Self {
            expressions: vec![ExpressionValue {
                text: text.into(),
                value,
            }],
        }
    }
}

/// Value of one query expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionValue {
    /// Expression text as written in the query
    pub text: String,

    pub value: Value,
}

impl ExpressionValue {
    /// Interpret the value as an authorization decision
    pub fn decision(&self) -> DecisionValue {
        match self.value {
            Value::Bool(b) => DecisionValue::Bool(b),
            ref other => DecisionValue::Other(json_type_name(other)),
        }
    }
}

/// Tagged decision extracted from an expression value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionValue {
    Bool(bool),
    /// Not a boolean; carries the observed type name
    Other(&'static str),
}
