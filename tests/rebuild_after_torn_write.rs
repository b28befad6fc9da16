//! Scenario C (§8): rebuild after a torn write. A volume with its
//! newest chapter's header corrupted on disk must rebuild to the
//! chapter before it, naming the corrupted slot as bad.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use uds_index::geometry::Geometry;
use uds_index::open_chapter::ChapterWriter;
use uds_index::record::{Record, RecordName};
use uds_index::volume::Volume;
use uds_index::volume_index::VolumeIndex;

const NONCE: u64 = 7;

fn geometry() -> Geometry {
    // 5 chapters, sparse disabled, small enough that writing all of
    // them is cheap but slot arithmetic (`vcn % chapters_per_volume`)
    // stays simple: virtual chapter N lives in physical slot N.
    Geometry::new(256, 4, 2, 1, 5, 0, 0).unwrap()
}

fn record(i: u32) -> Record {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&[i as u8; 16]);
    Record::new(RecordName::new(bytes), [0u8; 16])
}

#[test]
fn a_corrupted_newest_chapter_header_falls_back_to_the_one_before_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.bin");
    let geometry = geometry();
    let records_per_chapter = geometry.records_per_chapter();

    {
        let volume = Volume::open(&path, geometry, NONCE, 1, 4).unwrap();
        let mut writer = ChapterWriter::new(geometry, NONCE, 1);
        let mut counter = 0u32;
        for chapter in 0..geometry.chapters_per_volume {
            for _ in 0..records_per_chapter {
                writer.zone_mut(0).insert(record(counter));
                counter += 1;
            }
            assert!(writer.is_full());
            let closed = writer.close().unwrap();
            assert_eq!(closed.virtual_chapter, chapter as u64);
            volume.write_chapter(&closed).unwrap();
        }
        volume.flush().unwrap();
        // `volume` (and its mmap) is dropped here, as a real process
        // restart after an unclean shutdown would drop it.
    }

    // Corrupt the newest chapter's index-page-0 nonce field directly on
    // disk, simulating a torn write that never finished.
    let layout = uds_index::volume::Layout::new(geometry);
    let newest_slot = geometry.chapters_per_volume - 1;
    let corrupt_offset = layout.index_page(newest_slot, 0) * geometry.bytes_per_page as u64;
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(corrupt_offset)).unwrap();
        file.write_all(&(NONCE + 1).to_le_bytes()).unwrap();
    }

    let volume = Volume::open(&path, geometry, NONCE, 1, 4).unwrap();
    let report = volume.rebuild().unwrap();

    assert_eq!(report.newest_virtual_chapter, (geometry.chapters_per_volume - 2) as u64);
    assert_eq!(report.bad_physical_slots, vec![newest_slot]);
    assert_eq!(volume.newest_virtual_chapter(), report.newest_virtual_chapter);

    let mut volume_index = VolumeIndex::new(geometry, 1);
    volume_index.set_open_chapter(report.newest_virtual_chapter + 1).unwrap();
    volume.reindex(0, &mut volume_index, &report).unwrap();

    let lost_chapter = geometry.chapters_per_volume as u64 - 1;
    for i in 0..(records_per_chapter * geometry.chapters_per_volume) {
        let chapter = (i / records_per_chapter) as u64;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&[i as u8; 16]);
        let lookup = volume_index.lookup(&RecordName::new(bytes));
        if chapter == lost_chapter {
            assert!(
                !lookup.is_found,
                "record {i} lived only in the corrupted newest chapter and should be unreachable"
            );
        } else {
            assert!(lookup.is_found, "record {i} lived in a still-valid chapter and must resolve");
            assert_eq!(lookup.virtual_chapter, Some(chapter));
        }
    }
}
