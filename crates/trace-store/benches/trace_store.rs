use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use router_trace_store::{TraceEventType, TraceStore, TraceStoreConfig};
use serde_json::json;

fn bench_create(c: &mut Criterion) {
    c.bench_function("trace_store_create", |b| {
        b.iter_batched(
            || TraceStore::new(TraceStoreConfig::default()),
            |store| {
                let _ = store.create();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_record(c: &mut Criterion) {
    c.bench_function("trace_store_record", |b| {
        b.iter_batched(
            || {
                let store = TraceStore::new(TraceStoreConfig::default());
                let id = store.create();
                (store, id)
            },
            |(store, id)| {
                store.record(&id, TraceEventType::Attempt, json!({"tool_id": "bench-tool"}));
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_create, bench_record);
criterion_main!(benches);
