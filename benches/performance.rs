//! Performance benchmarks for the registry mirror.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use registry_mirror::{
    encode_instances, ChangeRecord, EventListener, EventTranslator, InMemoryRegistry, Instance,
    Reconciler, RegistryConnector, RegistryEvent, Sink,
};
use std::sync::Arc;

fn instances(count: usize) -> Vec<Instance> {
    (0..count)
        .map(|i| {
            Instance::new(format!("10.0.{}.{}", i / 256, i % 256), 8080)
                .with_metadata("zone", if i % 2 == 0 { "a" } else { "b" })
                .with_metadata("version", "1.4.2")
        })
        .collect()
}

/// Benchmark instance list encoding with varying membership sizes
fn bench_encode_instances(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_instances");

    for size in [1, 10, 100, 1000] {
        let list = instances(size);
        group.bench_with_input(BenchmarkId::new("instances", size), &list, |b, list| {
            b.iter(|| black_box(encode_instances(list).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the full notification path into a discarding sink
fn bench_translate_event(c: &mut Criterion) {
    let sink: Arc<dyn Sink> = Arc::new(|record: ChangeRecord| {
        black_box(record);
    });
    let translator = EventTranslator::new("public", sink);
    let event = RegistryEvent::instances_changed("orders", "DEFAULT_GROUP", instances(50));

    c.bench_function("translate_event_50", |b| {
        b.iter(|| translator.on_event(black_box(&event)));
    });
}

/// Benchmark a steady-state tick over a large, already-watched group
fn bench_steady_state_tick(c: &mut Criterion) {
    let registry = InMemoryRegistry::new();
    for i in 0..5000 {
        registry.create_service("public", "DEFAULT_GROUP", &format!("service-{i}"));
    }
    let client = registry.connect("127.0.0.1:8848", "public").unwrap();
    let listener: Arc<dyn EventListener> = Arc::new(|_: &RegistryEvent| {});
    let mut reconciler = Reconciler::new(client, listener, "DEFAULT_GROUP", 1000);
    reconciler.tick().unwrap();

    c.bench_function("steady_state_tick_5000", |b| {
        b.iter(|| black_box(reconciler.tick().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_encode_instances,
    bench_translate_event,
    bench_steady_state_tick
);
criterion_main!(benches);
