//! Per-zone open-chapter insertion buffer (§4.3 Open chapter).

use crate::record::{Record, RecordName};
use ahash::RandomState;
use std::hash::BuildHasher;

#[derive(Clone, Copy)]
struct Slot {
    occupied: bool,
    deleted: bool,
    record: Record,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            occupied: false,
            deleted: false,
            record: Record::new(RecordName::new([0; 16]), [0; 16]),
        }
    }
}

/// A zone's share of the currently-open chapter: a flat array of
/// records plus an open-addressed hash table (linear probing) from
/// name to slot, and a deletion mark that keeps a probe chain intact
/// until the chapter resets.
pub struct OpenChapterZone {
    capacity: usize,
    slots: Vec<Slot>,
    live_count: usize,
    hasher: RandomState,
}

impl OpenChapterZone {
    /// Build an empty zone sized for `capacity` live records
    /// (`records_per_chapter / zone_count`). The backing table is
    /// oversized to keep linear probing short under load.
    pub fn new(capacity: usize) -> Self {
        let table_size = (capacity.max(1) * 2).next_power_of_two();
        Self {
            capacity: capacity.max(1),
            slots: vec![Slot::default(); table_size],
            live_count: 0,
            hasher: RandomState::with_seeds(0x5a4a_4b4c, 0x1234_5678, 0x9abc_def0, 0x1122_3344),
        }
    }

    #[inline]
    fn slot_index(&self, name: &RecordName) -> usize {
        (self.hasher.hash_one(name.0) as usize) & (self.slots.len() - 1)
    }

    /// Whether the zone has reached its record-count capacity.
    pub fn is_full(&self) -> bool {
        self.live_count >= self.capacity
    }

    /// Number of live (non-deleted) records held.
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Whether the zone currently holds no live records.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Find a record by name, skipping deleted slots but continuing
    /// the probe past them (deletion marks stay in place for probe
    /// chain consistency until the chapter resets).
    pub fn find(&self, name: &RecordName) -> Option<&Record> {
        let mut idx = self.slot_index(name);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            if !slot.occupied {
                return None;
            }
            if !slot.deleted && slot.record.name == *name {
                return Some(&slot.record);
            }
            idx = (idx + 1) & (self.slots.len() - 1);
        }
        None
    }

    /// Insert or overwrite a record. Returns `false` if the zone is
    /// already at capacity and `name` is not already present.
    pub fn insert(&mut self, record: Record) -> bool {
        let mut idx = self.slot_index(&record.name);
        for _ in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            if !slot.occupied {
                if self.live_count >= self.capacity {
                    return false;
                }
                *slot = Slot {
                    occupied: true,
                    deleted: false,
                    record,
                };
                self.live_count += 1;
                return true;
            }
            if !slot.deleted && slot.record.name == record.name {
                slot.record = record;
                return true;
            }
            idx = (idx + 1) & (self.slots.len() - 1);
        }
        false
    }

    /// Mark `name`'s slot unavailable for search while retaining its
    /// presence in the probe chain.
    pub fn remove(&mut self, name: &RecordName) -> bool {
        let mut idx = self.slot_index(name);
        for _ in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            if !slot.occupied {
                return false;
            }
            if !slot.deleted && slot.record.name == *name {
                slot.deleted = true;
                self.live_count -= 1;
                return true;
            }
            idx = (idx + 1) & (self.slots.len() - 1);
        }
        false
    }

    /// All live records, in no particular order.
    pub fn records(&self) -> Vec<Record> {
        self.slots
            .iter()
            .filter(|s| s.occupied && !s.deleted)
            .map(|s| s.record)
            .collect()
    }

    /// Drain and reset the zone for the next chapter.
    pub fn reset(&mut self) -> Vec<Record> {
        let records = self.records();
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
        self.live_count = 0;
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(b: u8) -> RecordName {
        RecordName::new([b; 16])
    }

    #[test]
    fn insert_find_remove_round_trip() {
        let mut zone = OpenChapterZone::new(8);
        assert!(zone.insert(Record::new(name(1), [1; 16])));
        assert!(zone.insert(Record::new(name(2), [2; 16])));
        assert!(zone.find(&name(1)).is_some());
        assert!(zone.remove(&name(1)));
        assert!(zone.find(&name(1)).is_none());
        assert!(zone.find(&name(2)).is_some());
        assert_eq!(zone.len(), 1);
    }

    #[test]
    fn insert_refuses_past_capacity() {
        let mut zone = OpenChapterZone::new(2);
        assert!(zone.insert(Record::new(name(1), [0; 16])));
        assert!(zone.insert(Record::new(name(2), [0; 16])));
        assert!(!zone.insert(Record::new(name(3), [0; 16])));
        assert!(zone.is_full());
    }

    #[test]
    fn reset_clears_all_records() {
        let mut zone = OpenChapterZone::new(4);
        zone.insert(Record::new(name(1), [0; 16]));
        zone.insert(Record::new(name(2), [0; 16]));
        let drained = zone.reset();
        assert_eq!(drained.len(), 2);
        assert!(zone.is_empty());
        assert!(zone.find(&name(1)).is_none());
    }
}
