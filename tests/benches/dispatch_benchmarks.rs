//! # Meshbus Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Key expressions | `matches` / `intersects` on deep and wild keys |
//! | Dispatch | fan-out of one sample to many subscriptions |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shared_bus::Dispatcher;
use shared_types::{KeyExpr, Payload, Sample};
use std::sync::Arc;

fn ke(s: &str) -> KeyExpr {
    KeyExpr::new(s).unwrap()
}

fn bench_key_expr_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("key-expr");

    let deep: String = (0..64).map(|i| format!("s{i}")).collect::<Vec<_>>().join("/");
    let deep_key = ke(&deep);
    let patterns = [
        ("literal", ke(&deep)),
        ("single", ke("s0/*/s2/**")),
        ("multi-multi", ke("**/s10/**/s63")),
        ("miss", ke("**/s10/**/nope")),
    ];
    for (name, pattern) in &patterns {
        group.bench_with_input(BenchmarkId::new("matches", name), pattern, |b, p| {
            b.iter(|| black_box(p.matches(&deep_key)))
        });
    }

    let left = ke("a/**/c/*/e/**");
    let right = ke("a/b/**/d/e");
    group.bench_function("intersects", |b| {
        b.iter(|| black_box(left.intersects(&right)))
    });
    group.finish();
}

fn bench_dispatch_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch");

    for size in [1usize, 16, 256] {
        let _guard = runtime.enter();
        let dispatcher: Dispatcher<Sample> = Dispatcher::with_capacity("bench", 1 << 16);
        for i in 0..size {
            let pattern = if i % 2 == 0 { "bench/**" } else { "bench/*/value" };
            dispatcher.register(ke(pattern), Arc::new(|sample: Sample| {
                black_box(sample);
            }));
        }
        let key = ke("bench/sensor/value");
        let sample = Sample::put(key.clone(), Payload::from("42"));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("fanout", size), &size, |b, _| {
            b.iter(|| black_box(dispatcher.dispatch(&key, sample.clone())))
        });
        dispatcher.seal();
    }
    group.finish();
}

criterion_group!(benches, bench_key_expr_matching, bench_dispatch_fanout);
criterion_main!(benches);
