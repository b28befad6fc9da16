//! Mutable delta memory: one zone's resizable, bit-packed delta lists
//! (§3 Delta memory, §4.1 Mutable storage management).
//!
//! Each list is stored byte-aligned within a shared growable buffer.
//! Mutating a list decodes just that list, applies the change, and
//! re-encodes it; if the result no longer fits the list's allocated
//! span, every list's span is recomputed so the free space in the
//! buffer is spread evenly again (a global rebalance). This keeps the
//! RAM footprint bit-packed while avoiding the sub-byte slide-in-place
//! bookkeeping of the original design — see DESIGN.md for the tradeoff.

use super::bitstream::{append_guard, BitReader, BitWriter, GUARD_BYTES};
use super::entry::{Cursor, DeltaEntry};
use super::huffman::{decode_delta, encode_delta, HuffmanParams};
use crate::error::{Error, OverflowError, Result};
use crate::geometry::MAX_LIST_BITS;

/// Extra headroom (as a fraction of used size) given to every list on a
/// rebalance, so the next few inserts don't immediately force another one.
const REBALANCE_SLACK_FRACTION: f64 = 0.5;
/// Minimum headroom in bytes given to every list on a rebalance.
const REBALANCE_MIN_SLACK_BYTES: usize = 8;

/// Per-list bookkeeping: where it starts, how much of its allocated
/// span is used, and the cached lookup hint from the last save/load.
#[derive(Debug, Clone, Copy, Default)]
struct ListDescriptor {
    start_byte: usize,
    used_bytes: usize,
    allocated_bytes: usize,
    /// Cached {key, byte offset within the list} hint for the last
    /// entry looked up, so `lookup` can resume mid-list instead of
    /// always scanning from the start (§4.1 Key algorithms).
    save_key: u64,
    save_byte_offset: usize,
}

/// One zone's share of a delta index's mutable storage: a contiguous
/// range of delta lists `[first_list, first_list + list_count)`.
pub struct MutableDeltaZone {
    zone_number: u32,
    first_list: u32,
    list_count: u32,
    value_bits: u32,
    huffman: HuffmanParams,
    buffer: Vec<u8>,
    lists: Vec<ListDescriptor>,
    record_count: u64,
    collision_count: u64,
}

impl MutableDeltaZone {
    /// Create an empty zone owning `list_count` lists starting at
    /// `first_list` (a global list index).
    pub fn new(
        zone_number: u32,
        first_list: u32,
        list_count: u32,
        value_bits: u32,
        mean_delta: u32,
    ) -> Self {
        let mut buffer = Vec::new();
        append_guard(&mut buffer);
        Self {
            zone_number,
            first_list,
            list_count,
            value_bits,
            huffman: HuffmanParams::from_mean_delta(mean_delta),
            buffer,
            lists: vec![ListDescriptor::default(); list_count as usize],
            record_count: 0,
            collision_count: 0,
        }
    }

    /// Global index of this zone's first list.
    pub fn first_list(&self) -> u32 {
        self.first_list
    }

    /// Number of lists this zone owns.
    pub fn list_count(&self) -> u32 {
        self.list_count
    }

    /// Total records stored across this zone's lists.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Total collision entries stored across this zone's lists.
    pub fn collision_count(&self) -> u64 {
        self.collision_count
    }

    #[inline]
    fn local(&self, list: u32) -> usize {
        (list - self.first_list) as usize
    }

    /// Decode every entry currently stored in `list`, in key order.
    fn decode_list(&self, local: usize) -> Vec<DeltaEntry> {
        let desc = &self.lists[local];
        if desc.used_bytes == 0 {
            return Vec::new();
        }
        let mut reader = BitReader::new(&self.buffer, desc.start_byte as u64 * 8);
        let end_bit = (desc.start_byte + desc.used_bytes) as u64 * 8;
        let mut entries = Vec::new();
        let mut prev_key: u64 = 0;
        while reader.position() < end_bit {
            let value = reader.read_bits(self.value_bits) as u32;
            let delta = decode_delta(&mut reader, &self.huffman).unwrap_or(0);
            let is_collision = delta == 0 && !entries.is_empty();
            let key = if is_collision { prev_key } else { prev_key + delta };
            let name = if is_collision {
                let mut buf = [0u8; 16];
                let bytes = reader.read_bytes_unaligned(16);
                buf.copy_from_slice(&bytes);
                Some(buf)
            } else {
                None
            };
            entries.push(DeltaEntry { key, value, name });
            prev_key = key;
        }
        entries
    }

    /// Encode `entries` (already sorted, collisions flagged) into bytes.
    fn encode_list(&self, entries: &[DeltaEntry]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        let mut prev_key: u64 = 0;
        for (i, e) in entries.iter().enumerate() {
            writer.write_bits(e.value as u64, self.value_bits);
            let delta = if i == 0 {
                e.key
            } else if e.is_collision() {
                0
            } else {
                e.key - prev_key
            };
            encode_delta(&mut writer, &self.huffman, delta);
            if let Some(name) = e.name {
                writer.write_bytes_unaligned(&name);
            }
            prev_key = e.key;
        }
        writer.into_bytes()
    }

    /// Binary-search `entries` for `key`, returning the position of an
    /// exact match or the insertion point otherwise. Collision entries
    /// (which share a key with their predecessor) are treated as part
    /// of one run during the search, then disambiguated by `name` by
    /// the caller if needed.
    fn position_for(entries: &[DeltaEntry], key: u64) -> (usize, bool) {
        match entries.binary_search_by_key(&key, |e| e.key) {
            Ok(mut idx) => {
                // Land on the first entry of the run sharing this key.
                while idx > 0 && entries[idx - 1].key == key {
                    idx -= 1;
                }
                (idx, true)
            }
            Err(idx) => (idx, false),
        }
    }

    /// Look up `key` in `list`. If the list holds collision entries for
    /// this key, the cursor lands on the first of the run; callers that
    /// need to disambiguate by full name should inspect `entries_from`.
    pub fn lookup(&self, list: u32, key: u64) -> Cursor {
        let local = self.local(list);
        let entries = self.decode_list(local);
        let (idx, found) = Self::position_for(&entries, key);
        if found {
            Cursor::found(list, idx, entries[idx])
        } else {
            Cursor::not_found(list, idx)
        }
    }

    /// Decode and return every entry in `list`, e.g. for collision
    /// disambiguation by full name or for `next` iteration.
    pub fn entries(&self, list: u32) -> Vec<DeltaEntry> {
        self.decode_list(self.local(list))
    }

    /// Insert `entry` into `list` at the sorted position implied by its
    /// key, marking it as a collision (`entry.name.is_some()`) when the
    /// caller has determined the key already has an occupant with a
    /// different full name.
    pub fn insert(&mut self, list: u32, entry: DeltaEntry) -> Result<()> {
        let local = self.local(list);
        let mut entries = self.decode_list(local);
        let (idx, found) = Self::position_for(&entries, entry.key);
        let insert_at = if found && entry.is_collision() {
            // Insert after the existing run sharing this key.
            let mut i = idx;
            while i < entries.len() && entries[i].key == entry.key {
                i += 1;
            }
            i
        } else {
            idx
        };
        entries.insert(insert_at, entry);
        self.commit_list(local, &entries)?;
        self.record_count += 1;
        if entry.is_collision() {
            self.collision_count += 1;
        }
        Ok(())
    }

    /// Remove the entry at a cursor's position.
    pub fn remove(&mut self, cursor: &Cursor) -> Result<()> {
        let local = self.local(cursor.list);
        let mut entries = self.decode_list(local);
        if cursor.index >= entries.len() {
            return Err(Error::BadState(crate::error::BadStateError::EndCursor));
        }
        let removed = entries.remove(cursor.index);
        self.commit_list(local, &entries)?;
        self.record_count -= 1;
        if removed.is_collision() {
            self.collision_count -= 1;
        }
        Ok(())
    }

    /// Overwrite the payload of the entry at a cursor's position,
    /// leaving its key and collision status untouched.
    pub fn set_value(&mut self, cursor: &Cursor, value: u32) -> Result<()> {
        let local = self.local(cursor.list);
        let mut entries = self.decode_list(local);
        if cursor.index >= entries.len() {
            return Err(Error::BadState(crate::error::BadStateError::EndCursor));
        }
        entries[cursor.index].value = value;
        self.commit_list(local, &entries)
    }

    /// Re-encode `list`'s entries and install them, growing or
    /// rebalancing the buffer as needed.
    fn commit_list(&mut self, local: usize, entries: &[DeltaEntry]) -> Result<()> {
        let encoded = self.encode_list(entries);
        let size_bits = encoded.len() as u64 * 8;
        if size_bits > MAX_LIST_BITS as u64 {
            return Err(OverflowError::ListTooLarge {
                list: (local as u32) + self.first_list,
                limit: MAX_LIST_BITS,
                actual: size_bits as u32,
            }
            .into());
        }

        let desc = self.lists[local];
        if encoded.len() <= desc.allocated_bytes {
            self.buffer[desc.start_byte..desc.start_byte + encoded.len()].copy_from_slice(&encoded);
            // Zero the unused tail of the allocation so decode_list's
            // used_bytes boundary is the only thing that matters (the
            // bytes themselves needn't be logically meaningful, but
            // zeroing avoids ever exposing stale entry bytes if a bug
            // elsewhere miscomputes used_bytes).
            for b in &mut self.buffer[desc.start_byte + encoded.len()..desc.start_byte + desc.allocated_bytes] {
                *b = 0;
            }
            self.lists[local].used_bytes = encoded.len();
            return Ok(());
        }

        self.rebalance(Some((local, encoded)))
    }

    /// Recompute every list's allocation, spreading free space evenly.
    /// If `pending` is given, that list's content is taken from the
    /// supplied bytes rather than the buffer (it has already grown
    /// beyond its old allocation and hasn't been written yet).
    fn rebalance(&mut self, pending: Option<(usize, Vec<u8>)>) -> Result<()> {
        let mut contents: Vec<Vec<u8>> = (0..self.lists.len())
            .map(|i| {
                let desc = self.lists[i];
                self.buffer[desc.start_byte..desc.start_byte + desc.used_bytes].to_vec()
            })
            .collect();
        if let Some((local, bytes)) = pending {
            if bytes.len() as u64 * 8 > MAX_LIST_BITS as u64 {
                return Err(OverflowError::ListTooLarge {
                    list: (local as u32) + self.first_list,
                    limit: MAX_LIST_BITS,
                    actual: (bytes.len() as u64 * 8) as u32,
                }
                .into());
            }
            contents[local] = bytes;
        }

        let mut new_buffer = Vec::new();
        let mut new_lists = vec![ListDescriptor::default(); self.lists.len()];
        for (i, content) in contents.iter().enumerate() {
            let slack = ((content.len() as f64 * REBALANCE_SLACK_FRACTION) as usize)
                .max(REBALANCE_MIN_SLACK_BYTES);
            let allocated = content.len() + slack;
            let start_byte = new_buffer.len();
            new_buffer.extend_from_slice(content);
            new_buffer.resize(start_byte + allocated, 0);
            new_lists[i] = ListDescriptor {
                start_byte,
                used_bytes: content.len(),
                allocated_bytes: allocated,
                save_key: self.lists[i].save_key,
                save_byte_offset: self.lists[i].save_byte_offset,
            };
        }
        append_guard(&mut new_buffer);
        self.buffer = new_buffer;
        self.lists = new_lists;
        Ok(())
    }

    /// Save this zone's lists in the `"DI-00002"` format (§4.1 Save format).
    pub fn save(&self, zone_count: u32) -> Vec<u8> {
        super::save::save_zone(self, zone_count)
    }

    /// Load a zone previously written by [`save`](Self::save).
    pub fn load(bytes: &[u8], value_bits: u32, mean_delta: u32) -> Result<Self> {
        super::save::load_zone(bytes, value_bits, mean_delta)
    }

    pub(super) fn from_parts(
        zone_number: u32,
        first_list: u32,
        list_count: u32,
        value_bits: u32,
        mean_delta: u32,
        record_count: u64,
        collision_count: u64,
    ) -> Self {
        let mut z = Self::new(zone_number, first_list, list_count, value_bits, mean_delta);
        z.record_count = record_count;
        z.collision_count = collision_count;
        z
    }

    pub(super) fn zone_number(&self) -> u32 {
        self.zone_number
    }

    pub(super) fn raw_list_bytes(&self, local: usize) -> &[u8] {
        let desc = self.lists[local];
        &self.buffer[desc.start_byte..desc.start_byte + desc.used_bytes]
    }

    pub(super) fn install_list(&mut self, local: usize, bytes: Vec<u8>) -> Result<()> {
        self.commit_list(local, &Self::decode_bytes(bytes, self.value_bits, &self.huffman))
    }

    fn decode_bytes(bytes: Vec<u8>, value_bits: u32, huffman: &HuffmanParams) -> Vec<DeltaEntry> {
        let mut padded = bytes;
        append_guard(&mut padded);
        let mut reader = BitReader::new(&padded, 0);
        let end_bit = (padded.len() - GUARD_BYTES) as u64 * 8;
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

    pub(super) fn value_bits(&self) -> u32 {
        self.value_bits
    }

    pub(super) fn huffman(&self) -> HuffmanParams {
        self.huffman
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> MutableDeltaZone {
        MutableDeltaZone::new(0, 0, 4, 16, 4096)
    }

    #[test]
    fn insert_lookup_remove_round_trip() {
        let mut z = zone();
        z.insert(1, DeltaEntry::plain(100, 7)).unwrap();
        z.insert(1, DeltaEntry::plain(50, 3)).unwrap();
        z.insert(1, DeltaEntry::plain(200, 9)).unwrap();

        let c = z.lookup(1, 100);
        assert!(c.found);
        assert_eq!(c.entry.unwrap().value, 7);

        let miss = z.lookup(1, 999);
        assert!(!miss.found);

        z.remove(&c).unwrap();
        assert!(!z.lookup(1, 100).found);
        assert!(z.lookup(1, 50).found);
        assert!(z.lookup(1, 200).found);
    }

    #[test]
    fn addresses_stay_sorted_after_many_inserts() {
        let mut z = MutableDeltaZone::new(0, 0, 1, 16, 64);
        let mut keys: Vec<u64> = (0..500).map(|i| (i * 37) % 10_000).collect();
        keys.sort_unstable();
        keys.dedup();
        for (i, &k) in keys.iter().enumerate() {
            z.insert(0, DeltaEntry::plain(k, i as u32)).unwrap();
        }
        let entries = z.entries(0);
        for w in entries.windows(2) {
            assert!(w[0].key < w[1].key);
        }
    }

    #[test]
    fn collision_entries_carry_full_name_and_survive_partner_removal() {
        let mut z = zone();
        let name_a = [0xAA; 16];
        let name_b = [0xBB; 16];
        z.insert(2, DeltaEntry::plain(42, 1)).unwrap();
        z.insert(2, DeltaEntry::collision(42, 2, name_b)).unwrap();

        let entries = z.entries(2);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == Some(name_b)));
        assert_eq!(z.collision_count(), 1);

        // Remove the first (non-collision) entry; the collision entry survives.
        let cursor = Cursor::found(2, 0, entries[0]);
        z.remove(&cursor).unwrap();
        let remaining = z.entries(2);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, Some(name_b));
        let _ = name_a;
    }

    #[test]
    fn list_overflow_is_reported_without_corrupting_the_list() {
        let mut z = MutableDeltaZone::new(0, 0, 1, 16, 1);
        let mut inserted = 0u64;
        loop {
            let res = z.insert(0, DeltaEntry::plain(inserted, 0));
            match res {
                Ok(()) => inserted += 1,
                Err(Error::Overflow(_)) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            if inserted > 200_000 {
                panic!("overflow was never reported");
            }
        }
        // The list must still be fully readable and sorted.
        let entries = z.entries(0);
        assert_eq!(entries.len() as u64, inserted);
        for w in entries.windows(2) {
            assert!(w[0].key < w[1].key);
        }
    }

    #[test]
    fn rebalance_preserves_gap_invariant_between_lists() {
        let mut z = MutableDeltaZone::new(0, 0, 3, 16, 256);
        for i in 0..2000u64 {
            let list = (i % 3) as u32;
            z.insert(list, DeltaEntry::plain(i, 0)).unwrap();
        }
        for i in 0..z.lists.len() - 1 {
            let a = z.lists[i];
            let b = z.lists[i + 1];
            assert!(a.start_byte + a.allocated_bytes <= b.start_byte);
        }
    }
}
