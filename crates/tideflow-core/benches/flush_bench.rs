//! Benchmarks for notification fan-out and scheduler flushes.
//!
//! Run with: cargo bench -p tideflow-core -- flush

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use tideflow_core::{Config, Record, Scope, Value, runtime};

fn scope_with_keys(keys: usize) -> Scope {
    let data = Record::from_entries((0..keys).map(|i| (format!("k{i}"), Value::from(0))));
    Scope::new("bench", data)
}

// ---------------------------------------------------------------------------
// 1. One key, many subscribers
// ---------------------------------------------------------------------------

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush/fan_out");

    for count in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(count));
        runtime::reset();
        let scope = scope_with_keys(1);
        for i in 0..count {
            scope
                .node(&format!("n{i}"), |s| Ok(s.get("k0")))
                .build();
        }

        let mut tick = 0i64;
        group.bench_with_input(BenchmarkId::new("write_flush", count), &(), |b, _| {
            b.iter(|| {
                tick += 1;
                scope.set("k0", Value::from(black_box(tick)));
                runtime::tick();
            });
        });
        scope.destroy();
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Many keys, one reader, batched writes
// ---------------------------------------------------------------------------

fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush/batched");

    for keys in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(keys as u64));
        runtime::reset();
        let scope = scope_with_keys(keys);
        let names: Vec<String> = (0..keys).map(|i| format!("k{i}")).collect();
        let reads = names.clone();
        scope
            .node("sum", move |s| {
                Ok(Value::from(
                    reads.iter().map(|k| s.get(k).as_i64().unwrap_or(0)).sum::<i64>(),
                ))
            })
            .build();

        let mut tick = 0i64;
        group.bench_with_input(BenchmarkId::new("write_all_flush", keys), &(), |b, _| {
            b.iter(|| {
                tick += 1;
                for name in &names {
                    scope.set(name, Value::from(tick));
                }
                runtime::tick();
            });
        });
        scope.destroy();
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Synchronous propagation
// ---------------------------------------------------------------------------

fn bench_sync_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush/sync");
    runtime::reset();
    runtime::configure(Config::default().with_async_updates(false));
    let scope = scope_with_keys(1);
    let total = scope.computed("k0 * 2", |s| Ok(Value::from(s.get("k0").as_i64().unwrap_or(0) * 2)));
    let reader = total.clone();
    scope.node("total", move |_| Ok(reader.get())).build();

    let mut tick = 0i64;
    group.bench_function("computed_reader", |b| {
        b.iter(|| {
            tick += 1;
            scope.set("k0", Value::from(black_box(tick)));
            black_box(total.get());
        });
    });
    scope.destroy();
    runtime::reset();
    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_batched_writes, bench_sync_chain);
criterion_main!(benches);
