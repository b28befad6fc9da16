//! On-disk region map: super block, volume region, saved-state region
//! (§6 On-disk layout).

use crate::error::{CorruptDataError, Result};
use crate::geometry::Geometry;

const SUPERBLOCK_MAGIC: &[u8; 8] = b"UDSSB001";
const SUPERBLOCK_BYTES: usize = 64;

/// The fixed header occupying physical page 0: magic, version, nonce,
/// and the geometry needed to interpret every other page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Anti-rollback nonce, echoed in every page header.
    pub nonce: u64,
    /// On-disk geometry this volume was formatted with.
    pub geometry: Geometry,
}

impl SuperBlock {
    /// Build a fresh superblock for a newly formatted volume.
    pub fn new(nonce: u64, geometry: Geometry) -> Self {
        Self { nonce, geometry }
    }

    /// Serialize into one `bytes_per_page`-sized page.
    pub fn to_bytes(&self, bytes_per_page: u32) -> Vec<u8> {
        let mut buf = vec![0u8; bytes_per_page as usize];
        buf[0..8].copy_from_slice(SUPERBLOCK_MAGIC);
        buf[8..16].copy_from_slice(&self.nonce.to_le_bytes());
        buf[16..20].copy_from_slice(&self.geometry.bytes_per_page.to_le_bytes());
        buf[20..24].copy_from_slice(&self.geometry.records_per_page.to_le_bytes());
        buf[24..28].copy_from_slice(&self.geometry.record_pages_per_chapter.to_le_bytes());
        buf[28..32].copy_from_slice(&self.geometry.index_pages_per_chapter.to_le_bytes());
        buf[32..36].copy_from_slice(&self.geometry.chapters_per_volume.to_le_bytes());
        buf[36..40].copy_from_slice(&self.geometry.sparse_chapters_per_volume.to_le_bytes());
        buf[40..44].copy_from_slice(&self.geometry.sparse_sample_rate.to_le_bytes());
        buf
    }

    /// Parse a superblock page, validating the magic and `expected_nonce`.
    pub fn from_bytes(bytes: &[u8], expected_nonce: u64) -> Result<Self> {
        if bytes.len() < SUPERBLOCK_BYTES {
            return Err(CorruptDataError::HeaderMismatch("superblock page truncated".into()).into());
        }
        if &bytes[0..8] != SUPERBLOCK_MAGIC {
            return Err(CorruptDataError::HeaderMismatch("bad superblock magic".into()).into());
        }
        let nonce = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        if nonce != expected_nonce {
            return Err(CorruptDataError::NonceMismatch {
                expected: expected_nonce,
                found: nonce,
            }
            .into());
        }
        let bytes_per_page = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let records_per_page = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        let record_pages_per_chapter = u32::from_le_bytes(bytes[24..28].try_into().unwrap());
        let index_pages_per_chapter = u32::from_le_bytes(bytes[28..32].try_into().unwrap());
        let chapters_per_volume = u32::from_le_bytes(bytes[32..36].try_into().unwrap());
        let sparse_chapters_per_volume = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
        let sparse_sample_rate = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        let geometry = Geometry::new(
            bytes_per_page,
            records_per_page,
            record_pages_per_chapter,
            index_pages_per_chapter,
            chapters_per_volume,
            sparse_chapters_per_volume,
            sparse_sample_rate,
        )?;
        Ok(Self { nonce, geometry })
    }
}

/// Physical page numbering for a formatted volume: page 0 is the
/// superblock, followed by `chapters_per_volume` contiguous chapters of
/// `pages_per_chapter` pages each (index pages first, then record pages).
pub struct Layout {
    geometry: Geometry,
}

impl Layout {
    /// Build a layout calculator over `geometry`.
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }

    /// First physical page of the given physical chapter slot.
    pub fn chapter_base_page(&self, physical_slot: u32) -> u64 {
        1 + physical_slot as u64 * self.geometry.pages_per_chapter() as u64
    }

    /// Physical page of index page `index_page` within the chapter at
    /// `physical_slot`.
    pub fn index_page(&self, physical_slot: u32, index_page: u32) -> u64 {
        self.chapter_base_page(physical_slot) + index_page as u64
    }

    /// Physical page of record page `record_page` within the chapter at
    /// `physical_slot`.
    pub fn record_page(&self, physical_slot: u32, record_page: u32) -> u64 {
        self.chapter_base_page(physical_slot)
            + self.geometry.index_pages_per_chapter as u64
            + record_page as u64
    }

    /// Physical slot a virtual chapter number maps to, honoring a
    /// configured remap of one historical reshape.
    pub fn physical_slot_for(&self, virtual_chapter: u64) -> u32 {
        if let (Some(physical), Some(remapped_virtual)) =
            (self.geometry.remapped_physical, self.geometry.remapped_virtual)
        {
            if virtual_chapter == remapped_virtual {
                return physical;
            }
        }
        self.geometry.slot_for(virtual_chapter)
    }

    /// First physical page of the saved-state region, immediately past
    /// the last chapter.
    pub fn saved_state_base_page(&self) -> u64 {
        self.geometry.total_pages()
    }

    /// Pages reserved for a serialized open-chapter-plus-volume-index
    /// blob. Sized against the on-disk chapter indexes themselves (one
    /// index page's worth of bytes per chapter slot), which is generous
    /// relative to the RAM-resident state being saved.
    pub fn saved_state_page_count(&self) -> u64 {
        self.geometry.chapters_per_volume as u64 * self.geometry.index_pages_per_chapter as u64
    }

    /// Byte capacity of the saved-state region.
    pub fn saved_state_byte_capacity(&self) -> u64 {
        self.saved_state_page_count() * self.geometry.bytes_per_page as u64
    }

    /// Total number of physical pages the volume occupies, superblock,
    /// chapters, and saved-state region included.
    pub fn total_pages(&self) -> u64 {
        self.geometry.total_pages() + self.saved_state_page_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(4096, 32, 4, 2, 8, 2, 2).unwrap()
    }

    #[test]
    fn superblock_round_trips_through_bytes() {
        let sb = SuperBlock::new(77, geometry());
        let bytes = sb.to_bytes(4096);
        let back = SuperBlock::from_bytes(&bytes, 77).unwrap();
        assert_eq!(back.geometry, sb.geometry);
    }

    #[test]
    fn nonce_mismatch_is_rejected() {
        let sb = SuperBlock::new(77, geometry());
        let bytes = sb.to_bytes(4096);
        assert!(SuperBlock::from_bytes(&bytes, 1).is_err());
    }

    #[test]
    fn chapter_pages_are_contiguous_and_non_overlapping() {
        let layout = Layout::new(geometry());
        for slot in 0..geometry().chapters_per_volume {
            let base = layout.chapter_base_page(slot);
            assert_eq!(layout.index_page(slot, 0), base);
            assert_eq!(
                layout.record_page(slot, 0),
                base + geometry().index_pages_per_chapter as u64
            );
        }
        // Chapter bases never collide.
        let base0 = layout.chapter_base_page(0);
        let base1 = layout.chapter_base_page(1);
        assert_eq!(base1 - base0, geometry().pages_per_chapter() as u64);
    }

    #[test]
    fn saved_state_region_sits_past_the_last_chapter_and_grows_total_pages() {
        let layout = Layout::new(geometry());
        assert_eq!(layout.saved_state_base_page(), geometry().total_pages());
        assert!(layout.saved_state_page_count() > 0);
        assert_eq!(
            layout.total_pages(),
            layout.saved_state_base_page() + layout.saved_state_page_count()
        );
    }
}
