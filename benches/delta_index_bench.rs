//! Throughput of the bit-packed delta index under realistic list
//! fan-out: insertion (the open-chapter admission path) and lookup
//! (the volume-index hot path), both dominated by decode/re-encode of
//! a list's entries (§3, §4.1).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use uds_index::delta_index::{DeltaEntry, DeltaIndex};

const LIST_COUNT: u32 = 1 << 10;
const ZONE_COUNT: u32 = 4;
const VALUE_BITS: u32 = 23;
const MEAN_DELTA: u32 = 4096;

fn filled_index(records: u64) -> DeltaIndex {
    let mut index = DeltaIndex::new(LIST_COUNT, ZONE_COUNT, VALUE_BITS, MEAN_DELTA);
    for i in 0..records {
        let list = (i % LIST_COUNT as u64) as u32;
        index.insert(list, DeltaEntry::plain(i * 37 + 11, i as u32)).unwrap();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_index_insert");
    for &records in &[1_000u64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &records| {
            b.iter_batched(
                || filled_index(records),
                |mut index| {
                    index
                        .insert(0, DeltaEntry::plain(records * 37 + 11, records as u32))
                        .unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_index_lookup");
    for &records in &[1_000u64, 10_000, 100_000] {
        let index = filled_index(records);
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &records| {
            let key = (records / 2) * 37 + 11;
            let list = ((records / 2) % LIST_COUNT as u64) as u32;
            b.iter(|| index.lookup(list, key));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
