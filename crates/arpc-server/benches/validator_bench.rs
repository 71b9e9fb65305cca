// Criterion benchmarks for atomic program validation and gate comparisons
//
// Run benchmarks with:
//   cargo bench -p arpc-server

use arpc_common::Operator;
use arpc_server::atomic::{compare, validate};
use arpc_server::{Route, RouteTree};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

async fn echo(input: Value, _user: Option<()>) -> anyhow::Result<Value> {
    Ok(input)
}

fn tree() -> RouteTree<()> {
    RouteTree::new()
        .route("echo.value", Route::new(echo).public())
        .route("echo.parallel", Route::new(echo).public().parallel())
        .route("store.get", Route::new(echo).public().query())
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_validate");
    let tree = tree();

    let small = json!([["echo.value", "hello", "result"], [["result"], "echo.value"]]);
    group.bench_function("validate_small", |b| {
        b.iter(|| validate(black_box(&small), &tree));
    });

    let mut items = Vec::new();
    for i in 0..100 {
        items.push(json!(["echo.parallel", { "n": i }, format!("v{}", i)]));
    }
    for i in 0..100 {
        items.push(json!([[format!("v{}", i), format!("v{}", i), i, ">=", ["n"]], "store.get"]));
    }
    let large = Value::Array(items);
    group.bench_function("validate_large", |b| {
        b.iter(|| validate(black_box(&large), &tree));
    });

    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate_compare");

    group.bench_function("numbers", |b| {
        b.iter(|| compare(black_box(&json!(3)), Operator::Gt, black_box(&json!(2))));
    });

    group.bench_function("loose_equality", |b| {
        b.iter(|| compare(black_box(&json!("0x10")), Operator::Eq, black_box(&json!(16))));
    });

    group.bench_function("array_render", |b| {
        let left = json!([1, [2, 3], "x"]);
        b.iter(|| compare(black_box(&left), Operator::Eq, black_box(&json!("1,2,3,x"))));
    });

    group.finish();
}

criterion_group!(benches, bench_validate, bench_compare);
criterion_main!(benches);
