//! Commit pipeline benchmarks.

use bottledb_bench::{bench_schema, chain, document, DOC};
use bottledb_core::{Config, Store};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

/// Benchmark saving new documents with owned parts.
fn bench_save_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_new");

    for parts in [0usize, 8, 64] {
        group.throughput(Throughput::Elements(parts as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(parts), &parts, |b, &parts| {
            let store = Store::open_in_memory(bench_schema()).unwrap();
            b.iter(|| {
                let doc = document("new", parts, 128);
                black_box(store.save(&doc).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark rewriting an existing document, which backs up every record.
fn bench_save_update(c: &mut Criterion) {
    c.bench_function("save_update", |b| {
        let store = Store::open_in_memory(bench_schema()).unwrap();
        let doc = document("update", 8, 128);
        store.save(&doc).unwrap();
        let mut round = 0u64;

        b.iter(|| {
            round += 1;
            doc.set("title", format!("update {round}"));
            black_box(store.save(&doc).unwrap());
        });
    });
}

/// Benchmark re-saving an unchanged graph.
fn bench_save_unchanged(c: &mut Criterion) {
    c.bench_function("save_unchanged", |b| {
        let store = Store::open_in_memory(bench_schema()).unwrap();
        let doc = chain(32);
        store.save(&doc).unwrap();

        b.iter(|| {
            let report = store.save(black_box(&doc)).unwrap();
            assert!(report.is_noop());
        });
    });
}

/// Benchmark deleting a document and cascading to its parts.
fn bench_delete_cascade(c: &mut Criterion) {
    c.bench_function("delete_cascade", |b| {
        let store = Store::open_in_memory(bench_schema()).unwrap();

        b.iter_batched(
            || {
                let doc = document("doomed", 8, 64);
                store.save(&doc).unwrap();
                store.reference_of(&doc).unwrap()
            },
            |reference| black_box(store.delete(&reference).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark loading a reference chain deeply.
fn bench_load_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_chain");

    for len in [4usize, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let store = Store::open_in_memory(bench_schema()).unwrap();
            let head = chain(len);
            store.save(&head).unwrap();
            let reference = store.reference_of(&head).unwrap();

            b.iter(|| black_box(store.load(black_box(&reference)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark saves on disk with and without fsync.
fn bench_file_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store");
    group.sample_size(20);

    for sync in [false, true] {
        let name = if sync { "sync" } else { "nosync" };
        group.bench_function(name, |b| {
            let dir = tempdir().unwrap();
            let config = Config::default().sync_writes(sync);
            let store = Store::open_with_config(&dir.path().join("store"), bench_schema(), config)
                .unwrap();

            b.iter(|| {
                let doc = document("on-disk", 4, 512);
                black_box(store.save(&doc).unwrap());
            });
            assert!(store.count(DOC).unwrap() > 0);
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_save_new,
    bench_save_update,
    bench_save_unchanged,
    bench_delete_cascade,
    bench_load_chain,
    bench_file_store
);
criterion_main!(benches);
