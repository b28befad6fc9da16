//! Per-zone request processing: open chapter, then volume index, then
//! (on a hit) the volume's chapter index and record page (§4.6 Zone
//! processing).
//!
//! The source models this as an explicit state machine
//! (`search_open → search_volume_index → fetch_index_page →
//! fetch_record_page → complete`) because a page fetch can suspend the
//! request mid-flight and resume it later on the same zone. This
//! crate's [`Volume::fetch_chapter_index`](crate::volume::Volume::fetch_chapter_index)
//! and `fetch_record_page` already block the calling thread inside the
//! reader pool's channel `recv`, so there is no externally-visible
//! suspend point left to model: the states below still run in the
//! documented order, just as a single straight-line function instead
//! of a resumable enum.

use super::request::{Request, RequestKind};
use crate::error::Result;
use crate::open_chapter::ChapterWriter;
use crate::record::Record;
use crate::volume::{Location, Volume};
use crate::volume_index::VolumeIndex;
use tracing::{debug, info_span};

/// Run one request to completion against a single zone's state.
pub fn process(
    zone: u32,
    writer: &mut ChapterWriter,
    volume_index: &mut VolumeIndex,
    volume: &Volume,
    request: &mut Request,
) -> Result<()> {
    let span = info_span!("uds_index::pipeline::zone", zone);
    let _guard = span.enter();

    // search_open
    if let Some(record) = writer.zone(zone).find(&request.name).copied() {
        request.found = true;
        request.old_metadata = Some(record.metadata);
        request.location = Some(Location::InOpenChapter);
        apply_mutation_in_open_chapter(writer, zone, request);
        return Ok(());
    }

    // search_volume_index
    let volume_record = volume_index.lookup(&request.name);
    if !volume_record.is_found {
        request.found = false;
        request.location = Some(Location::NotFound);
        if matches!(request.kind, RequestKind::Post) {
            admit_new_record(writer, volume_index, zone, request)?;
        }
        return Ok(());
    }
    let virtual_chapter = volume_record.virtual_chapter.expect("found implies a chapter");

    // fetch_index_page, fetch_record_page
    let chapter_index = volume.fetch_chapter_index(zone, virtual_chapter)?;
    let Some(record_page) = chapter_index.lookup(&request.name) else {
        debug!(virtual_chapter, "volume index pointed at a chapter that no longer names this record");
        request.found = false;
        request.location = Some(Location::Unavailable);
        return Ok(());
    };
    let records = volume.fetch_record_page(zone, virtual_chapter, record_page)?;
    let Some(record) = records.into_iter().find(|r| r.name == request.name) else {
        request.found = false;
        request.location = Some(Location::Unavailable);
        return Ok(());
    };

    request.found = true;
    request.old_metadata = Some(record.metadata);
    request.virtual_chapter = Some(virtual_chapter);
    request.location = Some(match volume_record.sub_index {
        crate::volume_index::SubIndexKind::Dense => Location::InDense,
        crate::volume_index::SubIndexKind::Sparse => Location::InSparse,
    });

    match request.kind {
        RequestKind::Query => {
            // Dedup advice: refresh residency to the chapter under
            // construction so the next query for this name resolves
            // without a volume read.
            volume_index.put(&volume_record, writer.current_virtual_chapter())?;
        }
        RequestKind::Update => {
            // Chapters are immutable once written; an update migrates
            // the record (with its new metadata) into the open chapter.
            admit_new_record(writer, volume_index, zone, request)?;
        }
        RequestKind::Post | RequestKind::QueryNoUpdate => {}
    }
    Ok(())
}

fn apply_mutation_in_open_chapter(writer: &mut ChapterWriter, zone: u32, request: &Request) {
    if let (RequestKind::Update, Some(metadata)) = (request.kind, request.new_metadata) {
        writer.zone_mut(zone).insert(Record::new(request.name, metadata));
    }
}

fn admit_new_record(
    writer: &mut ChapterWriter,
    volume_index: &mut VolumeIndex,
    zone: u32,
    request: &mut Request,
) -> Result<()> {
    let metadata = request.new_metadata.unwrap_or([0u8; 16]);
    let record = Record::new(request.name, metadata);
    writer.zone_mut(zone).insert(record);
    let lookup = volume_index.lookup(&request.name);
    volume_index.put(&lookup, writer.current_virtual_chapter())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::record::RecordName;
    use tempfile::tempdir;

    fn geometry() -> Geometry {
        Geometry::new(512, 8, 2, 1, 4, 1, 2).unwrap()
    }

    #[test]
    fn post_then_query_resolves_within_the_open_chapter() {
        let dir = tempdir().unwrap();
        let volume = Volume::open(&dir.path().join("v.bin"), geometry(), 1, 1, 2).unwrap();
        let mut writer = ChapterWriter::new(geometry(), 1, 1);
        let mut volume_index = VolumeIndex::new(geometry(), 1);

        let name = RecordName::new([5; 16]);
        let mut post = Request::new(name, RequestKind::Post).with_metadata([9; 16]);
        process(0, &mut writer, &mut volume_index, &volume, &mut post).unwrap();
        assert!(!post.found);
        assert_eq!(post.location, Some(Location::NotFound));

        let mut query = Request::new(name, RequestKind::Query);
        process(0, &mut writer, &mut volume_index, &volume, &mut query).unwrap();
        assert!(query.found);
        assert_eq!(query.location, Some(Location::InOpenChapter));
        assert_eq!(query.old_metadata, Some([9; 16]));
    }

    #[test]
    fn query_after_chapter_close_resolves_via_the_volume() {
        let dir = tempdir().unwrap();
        let volume = Volume::open(&dir.path().join("v.bin"), geometry(), 1, 1, 2).unwrap();
        let mut writer = ChapterWriter::new(geometry(), 1, 1);
        let mut volume_index = VolumeIndex::new(geometry(), 1);

        let name = RecordName::new([6; 16]);
        let mut post = Request::new(name, RequestKind::Post).with_metadata([1; 16]);
        process(0, &mut writer, &mut volume_index, &volume, &mut post).unwrap();

        let closed = writer.close().unwrap();
        volume.write_chapter(&closed).unwrap();
        volume_index.set_open_chapter(closed.virtual_chapter + 1).unwrap();

        let mut query = Request::new(name, RequestKind::Query);
        process(0, &mut writer, &mut volume_index, &volume, &mut query).unwrap();
        assert!(query.found);
        assert_eq!(query.location, Some(Location::InDense));
        assert_eq!(query.old_metadata, Some([1; 16]));
    }
}
