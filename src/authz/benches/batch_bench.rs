//! Authorization benchmarks: single checks and batch fan-out

use bundle_authz::{AuthorizationRequest, Authorizer, EngineConfig, Input};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const VIEW_FIELD: &str = "data.api.entity.object.viewField";

fn bundle() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("api/entity")).unwrap();
    fs::write(
        dir.path().join("api/entity/object.yaml"),
        r#"
package: api.entity.object
rules:
  viewField: input.field == "name"
  editField: data.api.entity.object.viewField && input.entity.owner in data.api.entity.owners
"#,
    )
    .unwrap();
    fs::write(dir.path().join("api/entity/data.json"), r#"{"owners": ["alice", "bob"]}"#).unwrap();
    dir
}

fn input(field: &str) -> Input {
    let mut input = Input::new();
    input.insert("field".to_string(), json!(field));
    input.insert("entity".to_string(), json!({"owner": "bob", "ID": 7}));
    input
}

fn bench_single_check(c: &mut Criterion) {
    let dir = bundle();
    let authorizer = Authorizer::new(EngineConfig::default().with_bundle_path(dir.path())).unwrap();
    let facts = input("name");

    let mut group = c.benchmark_group("authorised");
    for policy in [VIEW_FIELD, "data.api.entity.object.editField"] {
        group.bench_with_input(BenchmarkId::from_parameter(policy), policy, |b, policy| {
            b.iter(|| black_box(authorizer.authorised(policy, &facts).unwrap()));
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = bundle();
    let authorizer = Authorizer::new(EngineConfig::default().with_bundle_path(dir.path())).unwrap();

    let mut group = c.benchmark_group("run_batch");
    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("requests", size), &size, |b, &size| {
            b.iter(|| {
                let requests: Vec<AuthorizationRequest> = (0..size)
                    .map(|i| AuthorizationRequest::new(VIEW_FIELD, input(if i % 2 == 0 { "name" } else { "other" })))
                    .collect();
                black_box(rt.block_on(authorizer.run_batch(requests)))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_check, bench_batch);
criterion_main!(benches);
