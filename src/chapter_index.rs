//! Chapter index: an immutable per-chapter map from record address to
//! the record page within that chapter holding the record (§4.3, §4.1
//! Immutable pages). Built once by the chapter writer when a chapter
//! closes; read-only for the rest of its life.

use crate::delta_index::{encode_list_bytes, Cursor, DeltaEntry, HuffmanParams, ImmutablePage};
use crate::error::Result;
use crate::geometry::{bits_for, mean_delta_for, Geometry};
use crate::record::RecordName;

/// Derive the list count, value width, and Huffman mean delta used to
/// pack one chapter's worth of records into a chapter index.
fn chapter_index_params(geometry: &Geometry) -> (u32, u32, u32) {
    let records = geometry.records_per_chapter().max(1);
    // A handful of lists per index page keeps each list's bit-packed
    // size well away from the 65535-bit overflow limit while still
    // giving the offset table a modest number of entries.
    let list_count = (geometry.index_pages_per_chapter.max(1) * 4).max(1);
    let value_bits = bits_for(geometry.record_pages_per_chapter.max(1));
    let mean_delta = mean_delta_for(records as u64);
    (list_count, value_bits, mean_delta)
}

fn list_for(name: &RecordName, list_count: u32) -> u32 {
    ((name.address_prefix() as u64 * list_count as u64) >> 32) as u32
}

/// An immutable map from record name to record-page number, covering
/// exactly one chapter's worth of records.
pub struct ChapterIndex {
    virtual_chapter: u64,
    list_count: u32,
    value_bits: u32,
    huffman: HuffmanParams,
    /// One entry per physical index page, each owning a contiguous
    /// range of lists.
    pages: Vec<ImmutablePage>,
}

impl ChapterIndex {
    /// Pack `records` (name, record_page) into a chapter index for
    /// `virtual_chapter`, split across `geometry.index_pages_per_chapter`
    /// physical pages.
    pub fn build(
        nonce: u64,
        virtual_chapter: u64,
        geometry: &Geometry,
        records: &[(RecordName, u32)],
    ) -> Result<Self> {
        let (list_count, value_bits, mean_delta) = chapter_index_params(geometry);
        let huffman = HuffmanParams::from_mean_delta(mean_delta);

        let mut buckets: Vec<Vec<DeltaEntry>> = vec![Vec::new(); list_count as usize];
        for (name, page) in records {
            let list = list_for(name, list_count) as usize;
            buckets[list].push(DeltaEntry {
                key: name.delta_key() as u64,
                value: *page,
                name: Some(name.0),
            });
        }
        for bucket in &mut buckets {
            bucket.sort_by_key(|e| e.key);
            // Mark every entry after the first sharing a key as a
            // collision; the first of a run stays a plain entry.
            let mut prev_key: Option<u64> = None;
            for entry in bucket.iter_mut() {
                if prev_key == Some(entry.key) {
                    // Already carries `name`; collision-ness is implied
                    // by delta==0 at encode time, so nothing to change here.
                } else {
                    entry.name = None;
                }
                prev_key = Some(entry.key);
            }
        }

        let encoded: Vec<Vec<u8>> = buckets
            .iter()
            .map(|b| encode_list_bytes(b, value_bits, &huffman))
            .collect();

        let page_count = geometry.index_pages_per_chapter.max(1);
        let lists_per_page = list_count.div_ceil(page_count);
        let mut pages = Vec::new();
        let mut first_list = 0u32;
        while first_list < list_count {
            let this_count = lists_per_page.min(list_count - first_list);
            let slice = &encoded[first_list as usize..(first_list + this_count) as usize];
            pages.push(ImmutablePage::build(
                nonce,
                virtual_chapter,
                first_list,
                value_bits,
                huffman,
                slice,
            )?);
            first_list += this_count;
        }

        Ok(Self {
            virtual_chapter,
            list_count,
            value_bits,
            huffman,
            pages,
        })
    }

    /// Reconstruct a chapter index from its on-disk pages.
    pub fn from_pages(
        virtual_chapter: u64,
        geometry: &Geometry,
        nonce: u64,
        raw_pages: &[Vec<u8>],
    ) -> Result<Self> {
        let (list_count, value_bits, mean_delta) = chapter_index_params(geometry);
        let huffman = HuffmanParams::from_mean_delta(mean_delta);
        let mut pages = Vec::with_capacity(raw_pages.len());
        for raw in raw_pages {
            pages.push(ImmutablePage::from_bytes(raw, nonce, value_bits, huffman)?);
        }
        Ok(Self {
            virtual_chapter,
            list_count,
            value_bits,
            huffman,
            pages,
        })
    }

    /// Virtual chapter number this index covers.
    pub fn virtual_chapter(&self) -> u64 {
        self.virtual_chapter
    }

    fn page_for_list(&self, list: u32) -> Option<&ImmutablePage> {
        self.pages
            .iter()
            .find(|p| list >= p.first_list() && list < p.first_list() + p.list_count())
    }

    /// Look up `name`, returning the record page it resides on within
    /// this chapter, if present.
    pub fn lookup(&self, name: &RecordName) -> Option<u32> {
        let list = list_for(name, self.list_count);
        let page = self.page_for_list(list)?;
        let cursor = page.lookup(list, name.delta_key() as u64);
        disambiguate(page, &cursor, name)
    }

    /// Raw page bytes, for handing to the volume's write path.
    pub fn page_bytes(&self) -> Vec<Vec<u8>> {
        self.pages.iter().map(ImmutablePage::to_bytes).collect()
    }

    pub(crate) fn list_count(&self) -> u32 {
        self.list_count
    }

    pub(crate) fn value_bits(&self) -> u32 {
        self.value_bits
    }

    pub(crate) fn huffman(&self) -> HuffmanParams {
        self.huffman
    }
}

fn disambiguate(page: &ImmutablePage, cursor: &Cursor, name: &RecordName) -> Option<u32> {
    let entry = cursor.entry?;
    if entry.name.is_none() || entry.name == Some(name.0) {
        return Some(entry.value);
    }
    // Walk the run of entries sharing this key to find the matching name.
    let entries = page.entries(cursor.list);
    entries
        .iter()
        .skip(cursor.index)
        .take_while(|e| e.key == entry.key)
        .find(|e| e.name == Some(name.0) || (e.name.is_none() && e.key == entry.key))
        .map(|e| e.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(4096, 32, 4, 2, 16, 4, 2).unwrap()
    }

    #[test]
    fn packs_and_looks_up_records() {
        let geometry = geometry();
        let names: Vec<RecordName> = (0..200u8)
            .map(|i| {
                let mut bytes = [0u8; 16];
                bytes[0] = i;
                bytes[15] = i.wrapping_mul(7);
                RecordName::new(bytes)
            })
            .collect();
        let records: Vec<(RecordName, u32)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, (i % 4) as u32))
            .collect();

        let index = ChapterIndex::build(42, 3, &geometry, &records).unwrap();
        for (name, page) in &records {
            assert_eq!(index.lookup(name), Some(*page));
        }
        let missing = RecordName::new([0xEE; 16]);
        assert_eq!(index.lookup(&missing), None);
    }

    #[test]
    fn round_trips_through_page_bytes() {
        let geometry = geometry();
        let records = vec![
            (RecordName::new([1; 16]), 0u32),
            (RecordName::new([2; 16]), 1u32),
        ];
        let index = ChapterIndex::build(7, 5, &geometry, &records).unwrap();
        let bytes = index.page_bytes();
        let reloaded = ChapterIndex::from_pages(5, &geometry, 7, &bytes).unwrap();
        for (name, page) in &records {
            assert_eq!(reloaded.lookup(name), Some(*page));
        }
    }
}
