//! Policy module format

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A policy module: a package and its named rules
///
/// ```yaml
/// package: api.entity.object
/// rules:
///   viewField: input.field == "name"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyModule {
    /// Dotted package path below `data`
    pub package: String,

    /// Rule name to rule body
    #[serde(default)]
    pub rules: BTreeMap<String, RuleBody>,
}

/// Rule body as written; scalars are accepted as literal expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleBody {
    Bool(bool),
    Int(i64),
    Float(f64),
    Expression(String),
}

impl RuleBody {
    /// CEL source for this body
    pub fn source(&self) -> String {
        match self {
            RuleBody::Bool(b) => b.to_string(),
            RuleBody::Int(i) => i.to_string(),
            RuleBody::Float(f) => format!("{:?}", f),
            RuleBody::Expression(expr) => expr.clone(),
        }
    }
}

impl PolicyModule {
    /// Parse a module from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Package segments below `data`
    pub fn package_segments(&self) -> Vec<String> {
        self.package.split('.').map(str::to_string).collect()
    }

    /// `data.<package>`
    pub fn package_path(&self) -> String {
        format!("data.{}", self.package)
    }

    /// `data.<package>.<rule>`
    pub fn rule_path(&self, rule: &str) -> String {
        format!("data.{}.{}", self.package, rule)
    }

    /// Structural problems with names; empty when the module is well formed
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.package.is_empty() || !self.package.split('.').all(is_identifier) {
            problems.push(format!("invalid package name '{}'", self.package));
        }

        for (name, body) in &self.rules {
            if !is_identifier(name) {
                problems.push(format!("invalid rule name '{}'", name));
            }
            if let RuleBody::Expression(expr) = body {
                if expr.trim().is_empty() {
                    problems.push(format!("rule '{}' has an empty body", name));
                }
            }
        }

        problems
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
