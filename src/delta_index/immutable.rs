//! Immutable delta memory: the read-only, page-packed form written for
//! closed chapters (§4.1 Immutable storage management).
//!
//! A page holds a contiguous run of delta lists behind a fixed-width
//! offset table. Offsets are 19 bits wide, giving a maximum of 512 KiB
//! of list data per page — comfortably above any configured page size
//! in this implementation.

use super::bitstream::{append_guard, BitReader, BitWriter};
use super::entry::{decode_list_bytes, Cursor, DeltaEntry};
use super::huffman::HuffmanParams;
use crate::error::{CorruptDataError, Error, Result};

/// Width in bits of each offset table entry.
const OFFSET_BITS: u32 = 19;
/// Largest byte offset an offset table entry can hold.
const MAX_OFFSET: u32 = (1 << OFFSET_BITS) - 1;
/// Byte size of the fixed header preceding the offset table.
const HEADER_BYTES: usize = 24;

/// A closed chapter's delta lists, packed read-only into one page.
pub struct ImmutablePage {
    nonce: u64,
    virtual_chapter: u64,
    first_list: u32,
    list_count: u32,
    /// Cumulative byte offsets into `data`, one more than `list_count`.
    offsets: Vec<u32>,
    data: Vec<u8>,
    value_bits: u32,
    huffman: HuffmanParams,
}

/// Parse the fixed 24-byte header as either little- or big-endian.
fn parse_header(bytes: &[u8], little_endian: bool) -> (u64, u64, u32, u32) {
    if little_endian {
        (
            u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        )
    } else {
        (
            u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            u64::from_be_bytes(bytes[8..16].try_into().unwrap()),
            u32::from_be_bytes(bytes[16..20].try_into().unwrap()),
            u32::from_be_bytes(bytes[20..24].try_into().unwrap()),
        )
    }
}

impl ImmutablePage {
    /// Pack `lists` (already-encoded, byte-aligned list bodies, in list
    /// order starting at `first_list`) into a page.
    pub fn build(
        nonce: u64,
        virtual_chapter: u64,
        first_list: u32,
        value_bits: u32,
        huffman: HuffmanParams,
        lists: &[Vec<u8>],
    ) -> Result<Self> {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let mut data = Vec::new();
        offsets.push(0u32);
        for list in lists {
            data.extend_from_slice(list);
            let offset = data.len() as u32;
            if offset > MAX_OFFSET {
                return Err(CorruptDataError::InvalidOffsets(format!(
                    "page data size {offset} exceeds {OFFSET_BITS}-bit offset range"
                ))
                .into());
            }
            offsets.push(offset);
        }
        Ok(Self {
            nonce,
            virtual_chapter,
            first_list,
            list_count: lists.len() as u32,
            offsets,
            data,
            value_bits,
            huffman,
        })
    }

    /// Serialize to bytes: header, bit-packed offset table, list data,
    /// then guard bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES + self.data.len());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.virtual_chapter.to_le_bytes());
        out.extend_from_slice(&self.first_list.to_le_bytes());
        out.extend_from_slice(&self.list_count.to_le_bytes());

        let mut writer = BitWriter::new();
        for &offset in &self.offsets {
            writer.write_bits(offset as u64, OFFSET_BITS);
        }
        out.extend_from_slice(writer.as_bytes());
        out.extend_from_slice(&self.data);
        append_guard(&mut out);
        out
    }

    /// Parse a page previously written by [`to_bytes`](Self::to_bytes),
    /// verifying it against the volume's configured nonce.
    pub fn from_bytes(
        bytes: &[u8],
        expected_nonce: u64,
        value_bits: u32,
        huffman: HuffmanParams,
    ) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(CorruptDataError::HeaderMismatch("page shorter than header".into()).into());
        }
        // A little-endian header is tried first, since every writer in
        // this implementation only ever emits one; big-endian is a
        // fallback for a page written by a differently-endianed peer
        // sharing the same volume.
        let le = parse_header(bytes, true);
        let (nonce, virtual_chapter, first_list, list_count) = if le.0 == expected_nonce {
            le
        } else {
            let be = parse_header(bytes, false);
            if be.0 == expected_nonce {
                be
            } else {
                le
            }
        };

        if nonce != expected_nonce {
            return Err(CorruptDataError::NonceMismatch {
                expected: expected_nonce,
                found: nonce,
            }
            .into());
        }

        let offset_table_bits = (list_count as u64 + 1) * OFFSET_BITS as u64;
        let offset_table_bytes = offset_table_bits.div_ceil(8) as usize;
        let table_start = HEADER_BYTES;
        if bytes.len() < table_start + offset_table_bytes {
            return Err(
                CorruptDataError::InvalidOffsets("offset table truncated".into()).into(),
            );
        }

        let mut reader = BitReader::new(bytes, (table_start * 8) as u64);
        let mut offsets = Vec::with_capacity(list_count as usize + 1);
        for _ in 0..=list_count {
            offsets.push(reader.read_bits(OFFSET_BITS) as u32);
        }
        for w in offsets.windows(2) {
            if w[1] < w[0] {
                return Err(CorruptDataError::InvalidOffsets(
                    "offset table is not non-decreasing".into(),
                )
                .into());
            }
        }

        let data_start = table_start + offset_table_bytes;
        let data_len = *offsets.last().unwrap_or(&0) as usize;
        if bytes.len() < data_start + data_len {
            return Err(
                CorruptDataError::InvalidOffsets("list data truncated".into()).into(),
            );
        }
        let data = bytes[data_start..data_start + data_len].to_vec();

        Ok(Self {
            nonce,
            virtual_chapter,
            first_list,
            list_count,
            offsets,
            data,
            value_bits,
            huffman,
        })
    }

    /// Virtual chapter number this page was written for.
    pub fn virtual_chapter(&self) -> u64 {
        self.virtual_chapter
    }

    /// Global index of the first list held by this page.
    pub fn first_list(&self) -> u32 {
        self.first_list
    }

    /// Number of lists held by this page.
    pub fn list_count(&self) -> u32 {
        self.list_count
    }

    #[inline]
    fn list_bytes(&self, list: u32) -> &[u8] {
        let local = (list - self.first_list) as usize;
        let start = self.offsets[local] as usize;
        let end = self.offsets[local + 1] as usize;
        &self.data[start..end]
    }

    /// Decode every entry in `list`.
    pub fn entries(&self, list: u32) -> Vec<DeltaEntry> {
        decode_list_bytes(self.list_bytes(list), self.value_bits, &self.huffman)
    }

    /// Look up `key` in `list`. Immutable pages are read-only; the
    /// returned cursor can be used for `contains`/fetch but never
    /// passed to a mutating operation.
    pub fn lookup(&self, list: u32, key: u64) -> Cursor {
        let entries = self.entries(list);
        match entries.binary_search_by_key(&key, |e| e.key) {
            Ok(mut idx) => {
                while idx > 0 && entries[idx - 1].key == key {
                    idx -= 1;
                }
                Cursor::found(list, idx, entries[idx])
            }
            Err(idx) => Cursor::not_found(list, idx),
        }
    }
}

/// Attempting to mutate an immutable page is a programmer error.
pub fn reject_mutation() -> Error {
    Error::BadState(crate::error::BadStateError::ImmutablePage)
}
