//! The volume: a circular log of chapters over a memory-mapped backing
//! file, fronted by a page cache and reader pool (§4.4).

use super::layout::{Layout, SuperBlock};
use super::page_cache::PageCache;
use super::reader::{PageSource, ReaderPool};
use super::rebuild::{rebuild_scan, RebuildReport};
use crate::chapter_index::ChapterIndex;
use crate::error::{CorruptDataError, Result};
use crate::geometry::Geometry;
use crate::open_chapter::ClosedChapter;
use crate::record::{Record, PADDING_NAME};
use crate::volume_index::VolumeIndex;
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, info_span};

/// Where a lookup found a record, or why it didn't (§6 `location`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Resolved within the in-RAM open chapter.
    InOpenChapter,
    /// Resolved within the dense volume-index sub-index.
    InDense,
    /// Resolved within the sparse volume-index sub-index.
    InSparse,
    /// A candidate chapter was named but its pages could not be read.
    Unavailable,
    /// No candidate chapter at all.
    NotFound,
}

struct MmapSource {
    mmap: Mutex<MmapMut>,
    bytes_per_page: u32,
}

impl PageSource for MmapSource {
    fn read_page(&self, physical_page: u64) -> Result<Vec<u8>> {
        let bytes_per_page = self.bytes_per_page as usize;
        let start = physical_page as usize * bytes_per_page;
        let mmap = self.mmap.lock();
        if start + bytes_per_page > mmap.len() {
            return Err(CorruptDataError::HeaderMismatch(format!(
                "physical page {physical_page} out of range"
            ))
            .into());
        }
        Ok(mmap[start..start + bytes_per_page].to_vec())
    }
}

/// The on-disk circular chapter log: physical layout, page cache,
/// reader pool, and the write path for newly-closed chapters.
pub struct Volume {
    geometry: Geometry,
    layout: Layout,
    nonce: u64,
    source: Arc<MmapSource>,
    cache: PageCache,
    readers: ReaderPool,
    newest_virtual_chapter: Mutex<u64>,
}

impl Volume {
    /// Format (or reopen) a backing file at `path` sized for `geometry`.
    pub fn open(path: &Path, geometry: Geometry, nonce: u64, read_threads: u32, cache_chapters: u32) -> Result<Self> {
        let span = info_span!("uds_index::volume");
        let _guard = span.enter();

        let layout = Layout::new(geometry);
        let total_bytes = layout.total_pages() * geometry.bytes_per_page as u64;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(total_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let source = Arc::new(MmapSource {
            mmap: Mutex::new(mmap),
            bytes_per_page: geometry.bytes_per_page,
        });

        let superblock_bytes = &source.mmap.lock()[0..geometry.bytes_per_page as usize];
        let is_fresh = superblock_bytes.iter().all(|&b| b == 0);
        if is_fresh {
            let sb = SuperBlock::new(nonce, geometry);
            let bytes = sb.to_bytes(geometry.bytes_per_page);
            source.mmap.lock()[0..bytes.len()].copy_from_slice(&bytes);
            info!("formatted new volume");
        } else {
            SuperBlock::from_bytes(superblock_bytes, nonce)?;
        }

        let cache_pages = (cache_chapters.max(1) * geometry.pages_per_chapter()) as usize;
        let cache = PageCache::new(cache_pages.max(1), read_threads.max(1));
        let readers = ReaderPool::new(read_threads, source.clone());

        Ok(Self {
            geometry,
            layout,
            nonce,
            source,
            cache,
            readers,
            newest_virtual_chapter: Mutex::new(0),
        })
    }

    /// Run a rebuild scan and adopt its `newest_virtual_chapter`.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let report = rebuild_scan(self.source.as_ref(), &self.layout, &self.geometry, self.nonce)?;
        *self.newest_virtual_chapter.lock() = report.newest_virtual_chapter;
        Ok(report)
    }

    /// The newest virtual chapter this volume believes it holds.
    pub fn newest_virtual_chapter(&self) -> u64 {
        *self.newest_virtual_chapter.lock()
    }

    /// Repopulate `volume_index` from every chapter a rebuild scan found
    /// intact. Chapter indexes only carry full record names for
    /// collision entries (§4.1), so this reads straight through each
    /// chapter's record pages instead, where every live record's full
    /// name is always present, and `put`s each one back in (§4.6 Rebuild).
    pub fn reindex(&self, zone: u32, volume_index: &mut VolumeIndex, report: &RebuildReport) -> Result<()> {
        for &(_, virtual_chapter) in &report.valid_chapters {
            for page in 0..self.geometry.record_pages_per_chapter {
                let records = self.fetch_record_page(zone, virtual_chapter, page)?;
                for record in records {
                    if record.name == PADDING_NAME {
                        continue;
                    }
                    let lookup = volume_index.lookup(&record.name);
                    volume_index.put(&lookup, virtual_chapter)?;
                }
            }
        }
        info!(chapters = report.valid_chapters.len(), "reindexed volume index from rebuild");
        Ok(())
    }

    /// Write a freshly-closed chapter's index and record pages to their
    /// physical slot, then donate the freshly-written bytes to the page
    /// cache (freshly written pages are likely to be reread soon).
    pub fn write_chapter(&self, closed: &ClosedChapter) -> Result<()> {
        let slot = self.layout.physical_slot_for(closed.virtual_chapter);
        for (i, page_bytes) in closed.chapter_index.page_bytes().into_iter().enumerate() {
            let physical = self.layout.index_page(slot, i as u32);
            self.write_physical_page(physical, pad_to_page(page_bytes, self.geometry.bytes_per_page))?;
        }
        for (i, records) in closed.record_pages.iter().enumerate() {
            let physical = self.layout.record_page(slot, i as u32);
            let bytes = encode_record_page(records, self.geometry.bytes_per_page);
            self.write_physical_page(physical, bytes)?;
        }
        *self.newest_virtual_chapter.lock() = closed.virtual_chapter;
        info!(virtual_chapter = closed.virtual_chapter, physical_slot = slot, "wrote chapter to volume");
        Ok(())
    }

    fn write_physical_page(&self, physical_page: u64, bytes: Vec<u8>) -> Result<()> {
        let bytes_per_page = self.geometry.bytes_per_page as usize;
        let start = physical_page as usize * bytes_per_page;
        {
            let mut mmap = self.source.mmap.lock();
            mmap[start..start + bytes_per_page].copy_from_slice(&bytes);
        }
        self.cache.invalidate(physical_page);
        self.cache.insert(physical_page, bytes);
        Ok(())
    }

    /// Fetch the chapter index covering `virtual_chapter`, reading
    /// through the cache (and, on miss, the reader pool) for every
    /// configured index page.
    pub fn fetch_chapter_index(&self, zone: u32, virtual_chapter: u64) -> Result<ChapterIndex> {
        let slot = self.layout.physical_slot_for(virtual_chapter);
        let mut pages = Vec::with_capacity(self.geometry.index_pages_per_chapter as usize);
        for i in 0..self.geometry.index_pages_per_chapter {
            let physical = self.layout.index_page(slot, i);
            pages.push(self.fetch_page(zone, physical)?);
        }
        ChapterIndex::from_pages(virtual_chapter, &self.geometry, self.nonce, &pages)
    }

    /// Fetch one record page of `virtual_chapter`, already in heap
    /// order as written.
    pub fn fetch_record_page(&self, zone: u32, virtual_chapter: u64, record_page: u32) -> Result<Vec<Record>> {
        let slot = self.layout.physical_slot_for(virtual_chapter);
        let physical = self.layout.record_page(slot, record_page);
        let bytes = self.fetch_page(zone, physical)?;
        Ok(decode_record_page(&bytes, self.geometry.records_per_page as usize))
    }

    fn fetch_page(&self, zone: u32, physical_page: u64) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.get(zone, physical_page) {
            return Ok(bytes);
        }
        let bytes = self.readers.submit(physical_page).recv().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "reader pool channel closed")
        })??;
        self.cache.insert(physical_page, bytes.clone());
        Ok(bytes)
    }

    /// Persist a save-state blob (open chapter bytes plus volume-index
    /// bytes, already framed by the caller) into the volume's reserved
    /// saved-state region (§4.6/§6 Save). Writes go straight to the
    /// mapping, bypassing the chapter page cache.
    pub fn save_state(&self, bytes: &[u8]) -> Result<()> {
        let capacity = self.layout.saved_state_byte_capacity();
        if bytes.len() as u64 > capacity {
            return Err(CorruptDataError::SavedStateTooLarge {
                needed: bytes.len() as u64,
                capacity,
            }
            .into());
        }
        let start = self.layout.saved_state_base_page() as usize * self.geometry.bytes_per_page as usize;
        let mut mmap = self.source.mmap.lock();
        mmap[start..start + bytes.len()].copy_from_slice(bytes);
        // Zero the rest of the region so a shorter save never leaves a
        // longer prior save's tail bytes behind for `load_state` to misread.
        let region_end = start + capacity as usize;
        mmap[start + bytes.len()..region_end].fill(0);
        Ok(())
    }

    /// Read back whatever is currently in the saved-state region, or
    /// `None` if it has never been written (all zero bytes).
    pub fn load_state(&self) -> Result<Option<Vec<u8>>> {
        let capacity = self.layout.saved_state_byte_capacity() as usize;
        let start = self.layout.saved_state_base_page() as usize * self.geometry.bytes_per_page as usize;
        let mmap = self.source.mmap.lock();
        let region = &mmap[start..start + capacity];
        if region.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        Ok(Some(region.to_vec()))
    }

    /// Flush the backing mapping to disk.
    pub fn flush(&self) -> Result<()> {
        self.source.mmap.lock().flush()?;
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn reader_thread_count(&self) -> usize {
        self.readers.thread_count()
    }
}

fn pad_to_page(mut bytes: Vec<u8>, bytes_per_page: u32) -> Vec<u8> {
    bytes.resize(bytes_per_page as usize, 0xFF);
    bytes
}

fn encode_record_page(records: &[Record], bytes_per_page: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bytes_per_page as usize);
    for record in records {
        bytes.extend_from_slice(&record.to_bytes());
    }
    bytes.resize(bytes_per_page as usize, 0);
    bytes
}

fn decode_record_page(bytes: &[u8], records_per_page: usize) -> Vec<Record> {
    let record_size = crate::geometry::RECORD_SIZE;
    (0..records_per_page)
        .map(|i| Record::from_bytes(&bytes[i * record_size..(i + 1) * record_size]))
        .collect()
}
