//! Chapter writer: closes a full open chapter into an immutable
//! chapter index and paged, sorted record data (§4.3 Closing, Chapter
//! writer).

use super::zone::OpenChapterZone;
use crate::chapter_index::ChapterIndex;
use crate::error::Result;
use crate::geometry::Geometry;
use crate::heap_order::to_heap_order;
use crate::record::Record;
use tracing::{info, info_span};

/// One closed chapter's durable payload, ready for the volume to write.
pub struct ClosedChapter {
    /// The virtual chapter number this payload belongs to.
    pub virtual_chapter: u64,
    /// Record pages, each `records_per_page` entries long (padded with
    /// zeroed records past `live_counts[i]`), already in heap order for
    /// branchless binary search.
    pub record_pages: Vec<Vec<Record>>,
    /// Number of live (non-padding) records on each page, in page order.
    pub live_counts: Vec<usize>,
    /// The chapter's immutable name → record-page map.
    pub chapter_index: ChapterIndex,
}

/// Accumulates per-zone open chapters and closes them into durable
/// chapter payloads. A single instance serves the whole index; there
/// is exactly one chapter writer (§4.3).
pub struct ChapterWriter {
    geometry: Geometry,
    nonce: u64,
    zones: Vec<OpenChapterZone>,
    newest_virtual_chapter: u64,
}

impl ChapterWriter {
    /// Build a writer owning `zone_count` per-zone buffers sized from
    /// `geometry.records_per_chapter()`.
    pub fn new(geometry: Geometry, nonce: u64, zone_count: u32) -> Self {
        let zone_count = zone_count.max(1) as usize;
        let capacity = (geometry.records_per_chapter() as usize).div_ceil(zone_count);
        let zones = (0..zone_count).map(|_| OpenChapterZone::new(capacity)).collect();
        Self {
            geometry,
            nonce,
            zones,
            newest_virtual_chapter: 0,
        }
    }

    /// Mutable access to one zone's insertion buffer.
    pub fn zone_mut(&mut self, zone: u32) -> &mut OpenChapterZone {
        &mut self.zones[zone as usize]
    }

    /// Read-only access to one zone's insertion buffer.
    pub fn zone(&self, zone: u32) -> &OpenChapterZone {
        &self.zones[zone as usize]
    }

    /// Total live records across every zone.
    pub fn total_records(&self) -> usize {
        self.zones.iter().map(OpenChapterZone::len).sum()
    }

    /// Whether the chapter has reached the global capacity that
    /// triggers a close (§4.3 Open chapter).
    pub fn is_full(&self) -> bool {
        self.total_records() >= self.geometry.records_per_chapter() as usize
    }

    /// The virtual chapter currently accepting writes.
    pub fn current_virtual_chapter(&self) -> u64 {
        self.newest_virtual_chapter
    }

    /// Close the current chapter: interleave zone buffers round-robin,
    /// radix-sort each page-sized batch by name, pack a chapter index
    /// keyed by record page, and reset every zone for the next chapter.
    pub fn close(&mut self) -> Result<ClosedChapter> {
        let span = info_span!("uds_index::open_chapter", virtual_chapter = self.newest_virtual_chapter);
        let _guard = span.enter();

        let mut drained: Vec<Vec<Record>> = self.zones.iter_mut().map(|z| z.reset()).collect();
        let interleaved = interleave_round_robin(&mut drained);

        let records_per_page = self.geometry.records_per_page as usize;
        let mut record_pages = Vec::new();
        let mut live_counts = Vec::new();
        let mut page_of: Vec<(crate::record::RecordName, u32)> = Vec::new();

        for (page_number, chunk) in interleaved.chunks(records_per_page.max(1)).enumerate() {
            let mut batch = chunk.to_vec();
            radix_sort_records(&mut batch);
            for record in &batch {
                page_of.push((record.name, page_number as u32));
            }
            let live = batch.len();
            let mut padded = batch;
            padded.resize(
                records_per_page,
                Record::new(crate::record::PADDING_NAME, [0; 16]),
            );
            record_pages.push(to_heap_order(&padded));
            live_counts.push(live);
        }

        let chapter_index = ChapterIndex::build(
            self.nonce,
            self.newest_virtual_chapter,
            &self.geometry,
            &page_of,
        )?;

        let closed = ClosedChapter {
            virtual_chapter: self.newest_virtual_chapter,
            record_pages,
            live_counts,
            chapter_index,
        };
        info!(virtual_chapter = closed.virtual_chapter, records = page_of.len(), "closed chapter");
        self.newest_virtual_chapter += 1;
        Ok(closed)
    }

    /// Serialize every zone's live records plus the current virtual
    /// chapter number, for [`load`](Self::load) to restore the open
    /// chapter exactly as it stood (§4.6/§8 Save format).
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.newest_virtual_chapter.to_le_bytes());
        out.extend_from_slice(&(self.zones.len() as u32).to_le_bytes());
        for zone in &self.zones {
            let records = zone.records();
            out.extend_from_slice(&(records.len() as u32).to_le_bytes());
            for record in &records {
                out.extend_from_slice(&record.to_bytes());
            }
        }
        out
    }

    /// Rebuild a chapter writer from bytes previously produced by
    /// [`save`](Self::save), re-inserting every record into fresh
    /// per-zone buffers sized from `geometry`.
    pub fn load(geometry: Geometry, nonce: u64, bytes: &[u8]) -> Result<Self> {
        use crate::error::CorruptDataError;
        use crate::geometry::RECORD_SIZE;
        let record_size = RECORD_SIZE;
        if bytes.len() < 12 {
            return Err(CorruptDataError::HeaderMismatch("open chapter save truncated".into()).into());
        }
        let newest_virtual_chapter = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let zone_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let mut writer = Self::new(geometry, nonce, zone_count);
        writer.newest_virtual_chapter = newest_virtual_chapter;

        let mut pos = 12usize;
        for zone in 0..zone_count {
            if bytes.len() < pos + 4 {
                return Err(CorruptDataError::HeaderMismatch("open chapter save truncated in zone header".into()).into());
            }
            let count = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            for _ in 0..count {
                if bytes.len() < pos + record_size {
                    return Err(CorruptDataError::InvalidOffsets("open chapter save truncated in record data".into()).into());
                }
                let record = Record::from_bytes(&bytes[pos..pos + record_size]);
                pos += record_size;
                writer.zone_mut(zone).insert(record);
            }
        }
        Ok(writer)
    }
}

/// Interleave zone buffers round-robin to preserve approximate temporal
/// locality before paging and sorting (§4.3 Closing).
fn interleave_round_robin(zones: &mut [Vec<Record>]) -> Vec<Record> {
    let total: usize = zones.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut cursors = vec![0usize; zones.len()];
    loop {
        let mut advanced = false;
        for (zone, cursor) in zones.iter().zip(cursors.iter_mut()) {
            if *cursor < zone.len() {
                out.push(zone[*cursor]);
                *cursor += 1;
                advanced = true;
            }
        }
        if !advanced {
            break;
        }
    }
    out
}

/// LSD radix sort over a record's 16-byte name, most-significant byte
/// last so the final pass leaves the array in ascending name order.
fn radix_sort_records(records: &mut [Record]) {
    if records.len() < 2 {
        return;
    }
    let mut buf = records.to_vec();
    let (mut src, mut dst) = (records, buf.as_mut_slice());
    for byte_index in (0..16).rev() {
        let mut counts = [0usize; 257];
        for r in src.iter() {
            counts[r.name.0[byte_index] as usize + 1] += 1;
        }
        for i in 1..257 {
            counts[i] += counts[i - 1];
        }
        for r in src.iter() {
            let bucket = r.name.0[byte_index] as usize;
            dst[counts[bucket]] = *r;
            counts[bucket] += 1;
        }
        std::mem::swap(&mut src, &mut dst);
    }
    // After 16 passes (even), `src` holds the result in the original
    // `records` buffer since we started with src = records.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordName;

    fn geometry() -> Geometry {
        Geometry::new(4096, 8, 4, 2, 16, 4, 2).unwrap()
    }

    #[test]
    fn close_packs_all_records_and_resets_zones() {
        let mut writer = ChapterWriter::new(geometry(), 42, 2);
        for i in 0..20u8 {
            let zone = (i % 2) as u32;
            let mut bytes = [0u8; 16];
            bytes[0] = i;
            bytes[4] = i.wrapping_mul(3);
            writer
                .zone_mut(zone)
                .insert(Record::new(RecordName::new(bytes), [i; 16]));
        }
        assert_eq!(writer.total_records(), 20);

        let closed = writer.close().unwrap();
        assert_eq!(closed.virtual_chapter, 0);
        assert_eq!(writer.total_records(), 0);
        assert_eq!(writer.current_virtual_chapter(), 1);

        let total_live: usize = closed.live_counts.iter().sum();
        assert_eq!(total_live, 20);

        for i in 0..20u8 {
            let mut bytes = [0u8; 16];
            bytes[0] = i;
            bytes[4] = i.wrapping_mul(3);
            let name = RecordName::new(bytes);
            assert!(closed.chapter_index.lookup(&name).is_some());
        }
    }

    #[test]
    fn save_and_load_round_trip_preserves_every_zone_and_the_virtual_chapter() {
        let mut writer = ChapterWriter::new(geometry(), 42, 2);
        for i in 0..10u8 {
            let zone = (i % 2) as u32;
            let mut bytes = [0u8; 16];
            bytes[0] = i;
            writer
                .zone_mut(zone)
                .insert(Record::new(RecordName::new(bytes), [i; 16]));
        }
        writer.close().unwrap();
        for i in 10..14u8 {
            let zone = (i % 2) as u32;
            let mut bytes = [0u8; 16];
            bytes[0] = i;
            writer
                .zone_mut(zone)
                .insert(Record::new(RecordName::new(bytes), [i; 16]));
        }

        let bytes = writer.save();
        let loaded = ChapterWriter::load(geometry(), 42, &bytes).unwrap();
        assert_eq!(loaded.current_virtual_chapter(), writer.current_virtual_chapter());
        assert_eq!(loaded.total_records(), writer.total_records());
        for i in 10..14u8 {
            let mut bytes = [0u8; 16];
            bytes[0] = i;
            let name = RecordName::new(bytes);
            let zone = (i % 2) as u32;
            assert!(loaded.zone(zone).find(&name).is_some());
        }
    }

    #[test]
    fn radix_sort_orders_records_by_full_name() {
        let mut records = vec![
            Record::new(RecordName::new([3; 16]), [0; 16]),
            Record::new(RecordName::new([1; 16]), [0; 16]),
            Record::new(RecordName::new([2; 16]), [0; 16]),
        ];
        radix_sort_records(&mut records);
        assert_eq!(records[0].name, RecordName::new([1; 16]));
        assert_eq!(records[1].name, RecordName::new([2; 16]));
        assert_eq!(records[2].name, RecordName::new([3; 16]));
    }
}
