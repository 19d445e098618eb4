// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for the Cistern store and query engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tempfile::TempDir;

use cistern_events::{Event, EventCollection, TAG_FIELD, TIMESTAMP_FIELD};
use cistern_query::{Aggregate, ColumnDesc, FilterDesc, QueryDesc, QueryEngine};
use cistern_storage::{Collection, CollectionOptions, WriteBatch};

fn flow_event(i: u64) -> Event {
    Event::new()
        .with(TIMESTAMP_FIELD, format!("2020-01-01T{:02}:{:02}:{:02}Z", i / 3600 % 24, i / 60 % 60, i % 60))
        .with(TAG_FIELD, format!("router-{}", i % 4))
        .with("source_port", [80, 443, 8080, 9090][(i % 4) as usize])
        .with("bytes", i * 10)
}

// ============================================================================
// Collection Benchmarks
// ============================================================================

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    for batch_size in [1u64, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(
            BenchmarkId::new("update", batch_size),
            &batch_size,
            |b, &batch_size| {
                let dir = TempDir::new().unwrap();
                let collection =
                    Collection::create(dir.path().join("bench.lm2"), CollectionOptions::default())
                        .unwrap();
                let mut next = 0u64;
                b.iter(|| {
                    let mut batch = WriteBatch::new();
                    for _ in 0..batch_size {
                        batch.set(format!("key-{next:012}"), format!("value-{next}"));
                        next += 1;
                    }
                    black_box(collection.update(batch).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let collection =
        Collection::create(dir.path().join("scan.lm2"), CollectionOptions::default()).unwrap();
    for chunk in 0..10u64 {
        let mut batch = WriteBatch::new();
        for i in 0..1000 {
            batch.set(format!("key-{:08}", chunk * 1000 + i), "v");
        }
        collection.update(batch).unwrap();
    }

    let mut group = c.benchmark_group("collection");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("full_scan_10k", |b| {
        b.iter(|| black_box(collection.cursor().unwrap().count()));
    });
    group.bench_function("point_get", |b| {
        b.iter(|| black_box(collection.cursor().unwrap().get(b"key-00005000").unwrap()));
    });
    group.finish();
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_query(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let events =
        EventCollection::create(dir.path().join("flows.lm2"), CollectionOptions::default()).unwrap();
    events.store_events((0..20_000).map(flow_event)).unwrap();

    let engine = QueryEngine::new();
    let mut group = c.benchmark_group("query");
    group.throughput(Throughput::Elements(20_000));

    group.bench_function("raw_filter", |b| {
        let desc = QueryDesc::new().with_filter(FilterDesc::new("source_port", "=", 443));
        b.iter(|| black_box(engine.execute(&events, desc.clone()).unwrap()));
    });

    group.bench_function("group_sum", |b| {
        let desc = QueryDesc::new()
            .with_column(ColumnDesc::aggregated(Aggregate::Sum, "bytes"))
            .with_column(ColumnDesc::aggregated(Aggregate::Count, "bytes"))
            .with_group_by("source_port");
        b.iter(|| black_box(engine.execute(&events, desc.clone()).unwrap()));
    });

    group.bench_function("bucketed_max", |b| {
        let desc = QueryDesc::new()
            .with_column(ColumnDesc::aggregated(Aggregate::Max, "bytes"))
            .with_filter(FilterDesc::new(TAG_FIELD, "matches", json!("^router-[01]$")))
            .with_point_size(60 * 1_000_000);
        b.iter(|| black_box(engine.execute(&events, desc.clone()).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_update, bench_scan, bench_query);
criterion_main!(benches);
