//! Capsule codec benchmarks.

use bottledb_bench::{bench_schema, capsule_tree, document};
use bottledb_codec::{parse, Capsule, RefEntry, StoredRecord};
use bottledb_core::Store;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark writing and parsing capsule trees of growing size.
fn bench_capsule_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("capsule");

    for (depth, width) in [(2, 4), (3, 6), (4, 8)] {
        let capsule = capsule_tree(depth, width);
        let text = capsule.to_text();
        group.throughput(Throughput::Bytes(text.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("write", format!("{depth}x{width}")),
            &capsule,
            |b, capsule| {
                b.iter(|| black_box(capsule.to_text()));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("parse", format!("{depth}x{width}")),
            &text,
            |b, text| {
                b.iter(|| black_box(parse(black_box(text)).unwrap()));
            },
        );
    }
    group.finish();
}

/// Benchmark the stored-record trailer with many back-references.
fn bench_stored_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("stored_record");

    for refs in [0usize, 16, 256] {
        let mut record = StoredRecord::new(Capsule::nodes("4", vec![Capsule::text("name", "x")]));
        record.references = (0..refs)
            .map(|i| RefEntry::new(5, format!("{i:032x}")))
            .collect();
        let text = record.to_text();

        group.bench_with_input(BenchmarkId::new("parse", refs), &text, |b, text| {
            b.iter(|| black_box(StoredRecord::parse(black_box(text)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark encoding entity graphs into a bottle.
fn bench_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage");

    for parts in [1usize, 16, 128] {
        group.throughput(Throughput::Elements(parts as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(parts), &parts, |b, &parts| {
            let store = Store::open_in_memory(bench_schema()).unwrap();
            let doc = document("staged", parts, 256);
            store.save(&doc).unwrap();

            b.iter(|| black_box(store.stage(black_box(&doc)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_capsule_text, bench_stored_record, bench_stage);
criterion_main!(benches);
