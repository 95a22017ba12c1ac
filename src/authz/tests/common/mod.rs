//! Shared fixtures for integration tests

#![allow(dead_code)]

use bundle_authz::Input;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const OBJECT_MODULE: &str = r#"
package: api.entity.object
rules:
  viewField: input.field == "name"
  editField: data.api.entity.object.viewField && input.entity.owner in data.api.entity.owners
  label: '"object"'
  ownerCount: size(data.api.entity.owners)
"#;

pub const ROLES_MODULE: &str = r#"
package: roles
rules:
  admin: input.entity.owner in data.roles.admins
"#;

pub const ADMIN_MODULE: &str = r#"
package: api.admin
rules:
  delete: data.roles.admin
"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn write(dir: &Path, relative: &str, contents: &str) {
    let path = dir.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Bundle with the object, roles and admin modules plus their documents
pub fn scenario_bundle() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "api/entity/object.yaml", OBJECT_MODULE);
    write(dir.path(), "api/entity/data.json", r#"{"owners": ["alice", "bob"]}"#);
    write(dir.path(), "roles/roles.yaml", ROLES_MODULE);
    write(dir.path(), "roles/data.yaml", "admins:\n  - alice\n");
    write(dir.path(), "api/admin.yaml", ADMIN_MODULE);
    dir
}

/// Bundle whose only rule allows everything (or nothing)
pub fn constant_bundle(allow: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "policy.yaml",
        &format!("package: api.entity.object\nrules:\n  viewField: {}\n", allow),
    );
    dir
}

/// Bundle whose rule only type-checks against its own document.
///
/// The allowing variant reads a boolean flag directly; the denying variant
/// compares a numeric flag. Evaluating either rule against the other
/// variant's document is an error.
pub fn gated_bundle(allow: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    let (rule, flag) = if allow {
        ("data.gate.flag", "true")
    } else {
        ("data.gate.flag > 0", "0")
    };
    write(
        dir.path(),
        "policy.yaml",
        &format!("package: api.entity.object\nrules:\n  viewField: '{}'\n", rule),
    );
    write(dir.path(), "data.json", &format!(r#"{{"gate": {{"flag": {}}}}}"#, flag));
    dir
}

pub fn input(value: Value) -> Input {
    serde_json::from_value(value).unwrap()
}

pub fn field_input(field: &str, owner: &str) -> Input {
    input(json!({"field": field, "entity": {"owner": owner, "ID": 1}}))
}
