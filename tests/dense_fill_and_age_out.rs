//! Scenario A (§8): dense fill and age-out. Posts fill a small volume
//! past its dense window, and we check that each record resolves
//! through the stage the geometry implies (open chapter, dense, sparse,
//! or gone) as chapters age out.

use tempfile::tempdir;
use uds_index::geometry::Geometry;
use uds_index::open_chapter::ChapterWriter;
use uds_index::pipeline::{self, Request, RequestKind};
use uds_index::record::RecordName;
use uds_index::volume::{Location, Volume};
use uds_index::volume_index::VolumeIndex;

// 4 chapters, 2 sparse, 8 records/chapter, sample rate 2 (even tails are hooks).
fn geometry() -> Geometry {
    Geometry::new(256, 4, 2, 1, 4, 2, 2).unwrap()
}

fn name(i: u32) -> RecordName {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&i.to_be_bytes());
    bytes[4..8].copy_from_slice(&i.to_be_bytes());
    bytes[12..16].copy_from_slice(&i.to_be_bytes());
    RecordName::new(bytes)
}

fn maybe_close(
    writer: &mut ChapterWriter,
    volume: &Volume,
    volume_index: &mut VolumeIndex,
) {
    if writer.is_full() {
        let closed = writer.close().unwrap();
        volume.write_chapter(&closed).unwrap();
        volume_index.set_open_chapter(closed.virtual_chapter + 1).unwrap();
    }
}

#[test]
fn records_resolve_through_the_stage_their_chapter_has_reached() {
    let dir = tempdir().unwrap();
    let geometry = geometry();
    let volume = Volume::open(&dir.path().join("v.bin"), geometry, 1, 1, 4).unwrap();
    let mut writer = ChapterWriter::new(geometry, 1, 1);
    let mut volume_index = VolumeIndex::new(geometry, 1);

    let records_per_chapter = geometry.records_per_chapter();
    // Fill chapters 0, 1, 2, 3 (closing 0..3 as each fills), then post one
    // more record to roll chapter 3 out to disk and open chapter 4.
    for i in 0..(records_per_chapter * 4 + 1) {
        maybe_close(&mut writer, &volume, &mut volume_index);
        let mut post = Request::new(name(i), RequestKind::Post).with_metadata([i as u8; 16]);
        pipeline::process(0, &mut writer, &mut volume_index, &volume, &mut post).unwrap();
    }

    // Chapter 0's records (both hook and non-hook) are gone from both
    // sub-indexes once chapter 4 opens: dense keeps only the newest two
    // chapters' worth of window, sparse keeps the newest `chapters_per_volume`.
    let mut not_found = Request::new(name(0), RequestKind::Query);
    pipeline::process(0, &mut writer, &mut volume_index, &volume, &mut not_found).unwrap();
    assert!(!not_found.found);
    assert_eq!(not_found.location, Some(Location::NotFound));

    // A hook record from chapter 2 survives in the sparse sub-index even
    // though chapter 2 has aged out of the dense window.
    let chapter2_hook = records_per_chapter * 2; // tail % 2 == 0 => hook
    let mut sparse_hit = Request::new(name(chapter2_hook), RequestKind::Query);
    pipeline::process(0, &mut writer, &mut volume_index, &volume, &mut sparse_hit).unwrap();
    assert!(sparse_hit.found);
    assert_eq!(sparse_hit.location, Some(Location::InSparse));

    // A non-hook record from chapter 2 is gone entirely.
    let chapter2_non_hook = records_per_chapter * 2 + 1;
    let mut gone = Request::new(name(chapter2_non_hook), RequestKind::Query);
    pipeline::process(0, &mut writer, &mut volume_index, &volume, &mut gone).unwrap();
    assert!(!gone.found);

    // The most recently closed chapter (3) is resolvable via the dense
    // sub-index, having been written to the volume already.
    let chapter3_record = records_per_chapter * 3 + 1;
    let mut dense_hit = Request::new(name(chapter3_record), RequestKind::Query);
    pipeline::process(0, &mut writer, &mut volume_index, &volume, &mut dense_hit).unwrap();
    assert!(dense_hit.found);
    assert_eq!(dense_hit.location, Some(Location::InDense));

    // The record just posted into chapter 4 is still in the open chapter.
    let newest = records_per_chapter * 4;
    let mut open_hit = Request::new(name(newest), RequestKind::Query);
    pipeline::process(0, &mut writer, &mut volume_index, &volume, &mut open_hit).unwrap();
    assert!(open_hit.found);
    assert_eq!(open_hit.location, Some(Location::InOpenChapter));
}
