//! A single dense-or-sparse delta index inside the volume index, keyed
//! by address prefix and storing the chapter slot a name was last seen
//! in (§4.2, §3 Volume index).

use crate::delta_index::{Cursor, DeltaEntry, DeltaIndex};
use crate::error::Result;
use crate::geometry::{bits_for, mean_delta_for};
use crate::record::RecordName;

pub(crate) fn list_for(name: &RecordName, list_count: u32) -> u32 {
    ((name.address_prefix() as u64 * list_count as u64) >> 32) as u32
}

/// Everything needed to restore one [`SubIndex`] (§4.2 Save format).
pub(crate) struct SavedSubIndex {
    pub(crate) list_count: u32,
    pub(crate) zone_count: u32,
    pub(crate) value_bits: u32,
    pub(crate) mean_delta: u32,
    pub(crate) chapters_per_volume: u32,
    pub(crate) newest_virtual_chapter: u64,
    pub(crate) zones: Vec<Vec<u8>>,
}

/// One of the volume index's two delta indexes (dense or sparse).
pub(crate) struct SubIndex {
    delta: DeltaIndex,
    chapters_per_volume: u32,
    newest_virtual_chapter: u64,
}

impl SubIndex {
    pub(crate) fn new(
        zone_count: u32,
        expected_entries: u64,
        chapters_per_volume: u32,
    ) -> Self {
        // A handful of lists per zone is enough for lock-free sharding
        // without fragmenting small chapters into too many tiny lists.
        let list_count = (zone_count * 64).max(zone_count).max(1);
        let value_bits = bits_for(chapters_per_volume.max(1));
        let mean_delta = mean_delta_for(expected_entries);
        Self {
            delta: DeltaIndex::new(list_count, zone_count, value_bits, mean_delta),
            chapters_per_volume: chapters_per_volume.max(1),
            newest_virtual_chapter: 0,
        }
    }

    pub(crate) fn list_count(&self) -> u32 {
        self.delta.list_count()
    }

    pub(crate) fn zone_number_for(&self, list: u32) -> u32 {
        self.delta.zone_number_for(list)
    }

    pub(crate) fn lookup(&self, name: &RecordName) -> Cursor {
        let list = list_for(name, self.list_count());
        self.delta.lookup(list, name.delta_key() as u64)
    }

    pub(crate) fn virtual_chapter_of(&self, cursor: &Cursor) -> Option<u64> {
        let entry = cursor.entry?;
        Some(self.reconstruct(entry.value))
    }

    /// Record that `name` now resolves to `virtual_chapter`. Returns
    /// whether this overwrote an entry already present at this name's
    /// address and key (an *alias*: the volume index keeps only a
    /// truncated prefix, so this may be the same name being re-put or a
    /// different name sharing that prefix — either way, a later record
    /// page fetch is what actually confirms identity, per §1).
    pub(crate) fn put(&mut self, name: &RecordName, virtual_chapter: u64) -> Result<bool> {
        let list = list_for(name, self.list_count());
        let slot = (virtual_chapter % self.chapters_per_volume as u64) as u32;
        let cursor = self.delta.lookup(list, name.delta_key() as u64);
        if cursor.found {
            self.delta.set_value(&cursor, slot)?;
            Ok(true)
        } else {
            self.delta
                .insert(list, DeltaEntry::plain(name.delta_key() as u64, slot))?;
            Ok(false)
        }
    }

    pub(crate) fn remove(&mut self, cursor: &Cursor) -> Result<()> {
        self.delta.remove(cursor)
    }

    pub(crate) fn set_chapter(&mut self, cursor: &Cursor, virtual_chapter: u64) -> Result<()> {
        let slot = (virtual_chapter % self.chapters_per_volume as u64) as u32;
        self.delta.set_value(cursor, slot)
    }

    pub(crate) fn record_count(&self) -> u64 {
        self.delta.record_count()
    }

    /// Everything needed to restore this sub-index byte-for-byte via
    /// [`load`](Self::load).
    pub(crate) fn save(&self) -> SavedSubIndex {
        SavedSubIndex {
            list_count: self.delta.list_count(),
            zone_count: self.delta.zone_count(),
            value_bits: self.delta.value_bits(),
            mean_delta: self.delta.mean_delta(),
            chapters_per_volume: self.chapters_per_volume,
            newest_virtual_chapter: self.newest_virtual_chapter,
            zones: self.delta.save(),
        }
    }

    /// Restore a sub-index previously captured by [`save`](Self::save).
    pub(crate) fn load(saved: SavedSubIndex) -> Result<Self> {
        let delta = DeltaIndex::load(saved.list_count, saved.value_bits, saved.mean_delta, &saved.zones)?;
        Ok(Self {
            delta,
            chapters_per_volume: saved.chapters_per_volume,
            newest_virtual_chapter: saved.newest_virtual_chapter,
        })
    }

    /// Reconstruct a full virtual chapter number from a stored slot,
    /// given `newest_virtual_chapter`: within a window of
    /// `chapters_per_volume` chapters, exactly one virtual chapter maps
    /// to any given slot.
    fn reconstruct(&self, slot: u32) -> u64 {
        let c = self.chapters_per_volume as u64;
        let newest_slot = self.newest_virtual_chapter % c;
        let back = (newest_slot + c - slot as u64) % c;
        self.newest_virtual_chapter.saturating_sub(back)
    }

    /// Advance the open-chapter marker and drop entries whose
    /// reconstructed virtual chapter has aged out of the volume's
    /// retention window (§4.2 Advancing the open chapter).
    pub(crate) fn set_open_chapter(&mut self, virtual_chapter: u64) -> Result<u32> {
        self.newest_virtual_chapter = virtual_chapter;
        let oldest = virtual_chapter.saturating_sub(self.chapters_per_volume as u64 - 1);
        let mut removed = 0u32;
        for list in 0..self.list_count() {
            loop {
                let entries = self.delta.entries(list);
                let stale = entries
                    .iter()
                    .enumerate()
                    .find(|(_, e)| self.reconstruct(e.value) < oldest);
                match stale {
                    Some((idx, entry)) => {
                        let cursor = Cursor::found(list, idx, *entry);
                        self.delta.remove(&cursor)?;
                        removed += 1;
                    }
                    None => break,
                }
            }
        }
        Ok(removed)
    }

    /// Evict up to `max_entries` of the globally-oldest entries,
    /// regardless of whether they've aged out of the window yet (§4.2
    /// Early flushes, a memory-pressure valve).
    pub(crate) fn early_flush(&mut self, max_entries: u32) -> Result<u32> {
        let mut aged: Vec<(u32, usize, u64, DeltaEntry)> = Vec::new();
        for list in 0..self.list_count() {
            for (idx, entry) in self.delta.entries(list).into_iter().enumerate() {
                aged.push((list, idx, self.reconstruct(entry.value), entry));
            }
        }
        aged.sort_by_key(|(_, _, vc, _)| *vc);
        let mut removed = 0u32;
        for (list, _, _, entry) in aged.into_iter().take(max_entries as usize) {
            let cursor = self.delta.lookup(list, entry.key);
            if cursor.found {
                self.delta.remove(&cursor)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_with_prefix(prefix: u32, key: u32) -> RecordName {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&prefix.to_be_bytes());
        bytes[4..8].copy_from_slice(&key.to_be_bytes());
        RecordName::new(bytes)
    }

    #[test]
    fn put_lookup_and_reconstruct_virtual_chapter() {
        let mut sub = SubIndex::new(2, 1000, 8);
        sub.newest_virtual_chapter = 20;
        let name = name_with_prefix(12345, 1);
        sub.put(&name, 17).unwrap();
        let cursor = sub.lookup(&name);
        assert!(cursor.found);
        assert_eq!(sub.virtual_chapter_of(&cursor), Some(17));
    }

    #[test]
    fn set_open_chapter_ages_out_old_entries_when_advanced_one_chapter_at_a_time() {
        // The reconstruction scheme only stores `vc mod chapters_per_volume`,
        // so it relies on `set_open_chapter` being called for every single
        // chapter close (never skipping ahead) to keep the window
        // unambiguous; that's how the chapter writer actually drives it
        // (§4.2 Advancing the open chapter).
        let mut sub = SubIndex::new(1, 100, 4);
        let name0 = name_with_prefix(1000, 1);
        sub.newest_virtual_chapter = 0;
        sub.put(&name0, 0).unwrap();

        for vc in 1..=4u64 {
            sub.set_open_chapter(vc).unwrap();
        }
        // After advancing one chapter at a time up to vc=4, chapter 0 has
        // fallen outside the 4-chapter window [1, 4] and must be gone.
        assert_eq!(sub.record_count(), 0);
    }
}
