//! Entry and cursor types shared by the mutable and immutable delta
//! index forms.

use super::bitstream::{BitReader, BitWriter};
use super::huffman::{decode_delta, encode_delta, HuffmanParams};

/// One decoded entry in a delta list: an address, its payload, and
/// (only for collisions) the full record name that disambiguates it
/// from the entry sharing its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaEntry {
    /// The address this entry is keyed by. Addresses are non-decreasing
    /// within a list except at collisions.
    pub key: u64,
    /// Opaque payload carried alongside the key.
    pub value: u32,
    /// Present only on collision entries: the full name that broke the
    /// address tie with the previous entry.
    pub name: Option<[u8; 16]>,
}

impl DeltaEntry {
    /// A plain (non-collision) entry.
    pub fn plain(key: u64, value: u32) -> Self {
        Self {
            key,
            value,
            name: None,
        }
    }

    /// A collision entry carrying the full name.
    pub fn collision(key: u64, value: u32, name: [u8; 16]) -> Self {
        Self {
            key,
            value,
            name: Some(name),
        }
    }

    /// Whether this entry is a collision entry.
    #[inline]
    pub fn is_collision(&self) -> bool {
        self.name.is_some()
    }
}

/// A cursor bound to a specific position in a specific delta list.
///
/// Returned by `lookup`, consumed by at most one of `insert`, `remove`,
/// or `set_value`. `found` distinguishes a cursor positioned exactly on
/// a matching key from one positioned at the first entry with a greater
/// key (or at the end of the list).
#[derive(Debug, Clone)]
pub struct Cursor {
    /// List this cursor is positioned in.
    pub list: u32,
    /// Position within the list's decoded entry sequence. Equal to
    /// `len()` when positioned at the end.
    pub index: usize,
    /// Whether `index` refers to an entry whose key equals the queried key.
    pub found: bool,
    /// The entry at `index`, if `found` and within bounds.
    pub entry: Option<DeltaEntry>,
}

impl Cursor {
    /// Cursor positioned at the end of a list (key greater than every
    /// entry present, or the list is empty).
    pub fn end(list: u32, index: usize) -> Self {
        Self {
            list,
            index,
            found: false,
            entry: None,
        }
    }

    /// Cursor positioned on a found entry.
    pub fn found(list: u32, index: usize, entry: DeltaEntry) -> Self {
        Self {
            list,
            index,
            found: true,
            entry: Some(entry),
        }
    }

    /// Cursor positioned at the first entry greater than the queried key.
    pub fn not_found(list: u32, index: usize) -> Self {
        Self {
            list,
            index,
            found: false,
            entry: None,
        }
    }

    /// True if this cursor is at the end-of-list sentinel position.
    pub fn is_end(&self, list_len: usize) -> bool {
        self.index >= list_len
    }
}

/// Decode a contiguous run of entries from a byte-aligned list, shared
/// by the mutable and immutable storage forms. `BitReader` synthesizes
/// one-bits past the end of `bytes`, so no explicit guard is required
/// here; the `end_bit` stop condition is what keeps decoding within the
/// list's real content.
pub(crate) fn decode_list_bytes(
    bytes: &[u8],
    value_bits: u32,
    huffman: &HuffmanParams,
) -> Vec<DeltaEntry> {
    let mut reader = BitReader::new(bytes, 0);
    let end_bit = bytes.len() as u64 * 8;
    let mut entries = Vec::new();
    let mut prev_key: u64 = 0;
    while reader.position() < end_bit {
        let value = reader.read_bits(value_bits) as u32;
        let delta = decode_delta(&mut reader, huffman).unwrap_or(0);
        let is_collision = delta == 0 && !entries.is_empty();
        let key = if is_collision { prev_key } else { prev_key + delta };
        let name = if is_collision {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&reader.read_bytes_unaligned(16));
            Some(buf)
        } else {
            None
        };
        entries.push(DeltaEntry { key, value, name });
        prev_key = key;
    }
    entries
}

/// Encode entries (sorted, collisions already flagged via `name`) into a
/// byte-aligned list, the inverse of [`decode_list_bytes`].
pub(crate) fn encode_list_bytes(
    entries: &[DeltaEntry],
    value_bits: u32,
    huffman: &HuffmanParams,
) -> Vec<u8> {
    let mut writer = BitWriter::new();
    let mut prev_key: u64 = 0;
    for (i, e) in entries.iter().enumerate() {
        writer.write_bits(e.value as u64, value_bits);
        let delta = if i == 0 {
            e.key
        } else if e.is_collision() {
            0
        } else {
            e.key - prev_key
        };
        encode_delta(&mut writer, huffman, delta);
        if let Some(name) = e.name {
            writer.write_bytes_unaligned(&name);
        }
        prev_key = e.key;
    }
    writer.into_bytes()
}
