//! The delta index proper: an aggregate of per-zone mutable delta
//! memories addressed by a single flat list-number space (§3, §4.1).

use super::entry::{Cursor, DeltaEntry};
use super::mutable::MutableDeltaZone;
use crate::error::Result;

/// A bit-packed, delta-encoded sorted key-value store split across
/// zones, each zone owning a contiguous range of delta lists.
pub struct DeltaIndex {
    list_count: u32,
    value_bits: u32,
    mean_delta: u32,
    zones: Vec<MutableDeltaZone>,
}

impl DeltaIndex {
    /// Build an empty delta index with `list_count` lists split evenly
    /// across `zone_count` zones.
    pub fn new(list_count: u32, zone_count: u32, value_bits: u32, mean_delta: u32) -> Self {
        let zone_count = zone_count.max(1);
        let mut zones = Vec::with_capacity(zone_count as usize);
        let mut first_list = 0u32;
        for zone_number in 0..zone_count {
            let remaining_zones = zone_count - zone_number;
            let remaining_lists = list_count - first_list;
            let this_zone_lists = remaining_lists / remaining_zones
                + if remaining_lists % remaining_zones != 0 { 1 } else { 0 };
            let this_zone_lists = this_zone_lists.min(remaining_lists);
            zones.push(MutableDeltaZone::new(
                zone_number,
                first_list,
                this_zone_lists,
                value_bits,
                mean_delta,
            ));
            first_list += this_zone_lists;
        }
        Self {
            list_count,
            value_bits,
            mean_delta,
            zones,
        }
    }

    /// Total number of delta lists.
    pub fn list_count(&self) -> u32 {
        self.list_count
    }

    /// Number of zones this index is split across.
    pub fn zone_count(&self) -> u32 {
        self.zones.len() as u32
    }

    /// Bits used to encode a stored value (chapter slot, record page...).
    pub(crate) fn value_bits(&self) -> u32 {
        self.value_bits
    }

    /// Configured mean delta between consecutive keys in a list.
    pub(crate) fn mean_delta(&self) -> u32 {
        self.mean_delta
    }

    /// Records stored across every zone.
    pub fn record_count(&self) -> u64 {
        self.zones.iter().map(MutableDeltaZone::record_count).sum()
    }

    /// Collision entries stored across every zone.
    pub fn collision_count(&self) -> u64 {
        self.zones.iter().map(MutableDeltaZone::collision_count).sum()
    }

    #[inline]
    fn zone_for(&self, list: u32) -> &MutableDeltaZone {
        self.zones
            .iter()
            .find(|z| list >= z.first_list() && list < z.first_list() + z.list_count())
            .expect("list index out of range for this delta index")
    }

    #[inline]
    fn zone_for_mut(&mut self, list: u32) -> &mut MutableDeltaZone {
        self.zones
            .iter_mut()
            .find(|z| list >= z.first_list() && list < z.first_list() + z.list_count())
            .expect("list index out of range for this delta index")
    }

    /// Zone number that owns `list`, for callers routing work to the
    /// zone thread that owns this index's data (§5 Zone sharding).
    pub fn zone_number_for(&self, list: u32) -> u32 {
        self.zones
            .iter()
            .position(|z| list >= z.first_list() && list < z.first_list() + z.list_count())
            .expect("list index out of range for this delta index") as u32
    }

    /// Look up `key` in `list`.
    pub fn lookup(&self, list: u32, key: u64) -> Cursor {
        self.zone_for(list).lookup(list, key)
    }

    /// All entries currently stored in `list`, in key order.
    pub fn entries(&self, list: u32) -> Vec<DeltaEntry> {
        self.zone_for(list).entries(list)
    }

    /// Insert `entry` into `list`.
    pub fn insert(&mut self, list: u32, entry: DeltaEntry) -> Result<()> {
        self.zone_for_mut(list).insert(list, entry)
    }

    /// Remove the entry at a cursor previously returned by [`lookup`](Self::lookup).
    pub fn remove(&mut self, cursor: &Cursor) -> Result<()> {
        self.zone_for_mut(cursor.list).remove(cursor)
    }

    /// Overwrite the value at a cursor previously returned by [`lookup`](Self::lookup).
    pub fn set_value(&mut self, cursor: &Cursor, value: u32) -> Result<()> {
        self.zone_for_mut(cursor.list).set_value(cursor, value)
    }

    /// Advance a cursor to the next entry in the same list, or an
    /// end-of-list cursor if none remain.
    pub fn next(&self, cursor: &Cursor) -> Cursor {
        let entries = self.entries(cursor.list);
        let next_index = cursor.index + 1;
        if next_index < entries.len() {
            Cursor::found(cursor.list, next_index, entries[next_index])
        } else {
            Cursor::end(cursor.list, entries.len())
        }
    }

    /// Save every zone's delta lists, one blob per zone in zone order.
    pub fn save(&self) -> Vec<Vec<u8>> {
        let zone_count = self.zone_count();
        self.zones.iter().map(|z| z.save(zone_count)).collect()
    }

    /// Restore from blobs previously produced by [`save`](Self::save),
    /// which must be presented in the same zone order.
    pub fn load(
        list_count: u32,
        value_bits: u32,
        mean_delta: u32,
        saved_zones: &[Vec<u8>],
    ) -> Result<Self> {
        let mut zones = Vec::with_capacity(saved_zones.len());
        for bytes in saved_zones {
            zones.push(MutableDeltaZone::load(bytes, value_bits, mean_delta)?);
        }
        Ok(Self {
            list_count,
            value_bits,
            mean_delta,
            zones,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_partitioned_without_gaps_or_overlap() {
        let index = DeltaIndex::new(100, 7, 16, 256);
        let mut covered = vec![false; 100];
        for zone in &index.zones {
            for list in zone.first_list()..zone.first_list() + zone.list_count() {
                assert!(!covered[list as usize], "list {list} covered twice");
                covered[list as usize] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn insert_lookup_and_next_walk_a_list_in_order() {
        let mut index = DeltaIndex::new(10, 2, 16, 64);
        for key in [30u64, 10, 20] {
            index.insert(3, DeltaEntry::plain(key, key as u32)).unwrap();
        }
        let first = index.lookup(3, 10);
        assert!(first.found);
        let second = index.next(&first);
        assert_eq!(second.entry.unwrap().key, 20);
        let third = index.next(&second);
        assert_eq!(third.entry.unwrap().key, 30);
        let past_end = index.next(&third);
        assert!(past_end.entry.is_none());
    }

    #[test]
    fn save_and_load_round_trip_preserves_all_zones() {
        let mut index = DeltaIndex::new(20, 3, 16, 512);
        for i in 0..50u64 {
            let list = (i % 20) as u32;
            index.insert(list, DeltaEntry::plain(i * 7, i as u32)).unwrap();
        }
        let saved = index.save();
        let loaded = DeltaIndex::load(20, 16, 512, &saved).unwrap();
        assert_eq!(loaded.record_count(), index.record_count());
        for i in 0..50u64 {
            let list = (i % 20) as u32;
            assert!(loaded.lookup(list, i * 7).found);
        }
    }
}
