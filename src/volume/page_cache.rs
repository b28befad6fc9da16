//! Clock-LRU page cache with a per-zone invalidate-counter read
//! protocol (§4.4 Page cache, Lockless read path).
//!
//! Each cached page is guarded by its own `RwLock` rather than raw
//! pointers and manual memory fences: safe Rust gives us the same
//! freedom-from-torn-reads the source's invalidate-counter dance buys,
//! at the cost of an uncontended lock acquisition per read. The
//! per-zone invalidate counters are kept anyway, not for memory safety
//! but because the sparse cache barrier (§4.5) and tests key off the
//! same `(page, pending)` contract the original protocol exposes.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// One cached physical page: its raw bytes and a clock timestamp.
struct CachedPage {
    physical_page: u64,
    data: Vec<u8>,
    last_used: u64,
}

/// A zone's invalidate counter: `sequence` is odd while a read of
/// `page` is in flight, even otherwise (§4.4 Lockless read path).
struct ZoneCounter {
    page: AtomicU64,
    sequence: AtomicU64,
}

impl ZoneCounter {
    fn new() -> Self {
        Self {
            page: AtomicU64::new(u64::MAX),
            sequence: AtomicU64::new(0),
        }
    }

    fn begin_read(&self, physical_page: u64) {
        self.page.store(physical_page, Ordering::Release);
        self.sequence.fetch_add(1, Ordering::AcqRel);
    }

    fn end_read(&self) {
        self.sequence.fetch_add(1, Ordering::AcqRel);
    }

    fn is_pending_on(&self, physical_page: u64) -> bool {
        self.sequence.load(Ordering::Acquire) % 2 == 1
            && self.page.load(Ordering::Acquire) == physical_page
    }
}

/// A fixed-capacity clock-LRU cache of physical pages.
pub struct PageCache {
    slots: Vec<RwLock<Option<CachedPage>>>,
    index: Mutex<HashMap<u64, usize>>,
    clock: AtomicU64,
    zone_counters: Vec<ZoneCounter>,
}

impl PageCache {
    /// Build an empty cache with `capacity` page slots, serving
    /// `zone_count` zones' invalidate counters.
    pub fn new(capacity: usize, zone_count: u32) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| RwLock::new(None)).collect(),
            index: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            zone_counters: (0..zone_count.max(1)).map(|_| ZoneCounter::new()).collect(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up `physical_page` under `zone`'s invalidate counter,
    /// returning a cloned copy of its bytes on a hit.
    pub fn get(&self, zone: u32, physical_page: u64) -> Option<Vec<u8>> {
        let counter = &self.zone_counters[zone as usize];
        counter.begin_read(physical_page);
        let slot_id = *self.index.lock().get(&physical_page)?;
        let result = self.slots[slot_id].read().as_ref().and_then(|p| {
            if p.physical_page == physical_page {
                Some(p.data.clone())
            } else {
                None
            }
        });
        counter.end_read();
        if result.is_some() {
            if let Some(mut guard) = self.slots[slot_id].try_write() {
                if let Some(p) = guard.as_mut() {
                    p.last_used = self.tick();
                }
            }
        }
        result
    }

    /// Insert or overwrite `physical_page`'s bytes, evicting the
    /// oldest unpinned slot if the cache is full.
    pub fn insert(&self, physical_page: u64, data: Vec<u8>) {
        let mut index = self.index.lock();
        if let Some(&slot_id) = index.get(&physical_page) {
            self.write_slot(slot_id, physical_page, data);
            return;
        }
        let slot_id = self.choose_victim(&index);
        if let Some(old) = self.slots[slot_id].read().as_ref().map(|p| p.physical_page) {
            self.wait_for_readers(old);
            index.remove(&old);
        }
        index.insert(physical_page, slot_id);
        drop(index);
        self.write_slot(slot_id, physical_page, data);
    }

    fn write_slot(&self, slot_id: usize, physical_page: u64, data: Vec<u8>) {
        let last_used = self.tick();
        *self.slots[slot_id].write() = Some(CachedPage {
            physical_page,
            data,
            last_used,
        });
    }

    fn choose_victim(&self, index: &HashMap<u64, usize>) -> usize {
        if index.len() < self.slots.len() {
            return (0..self.slots.len())
                .find(|i| !index.values().any(|v| v == i))
                .unwrap_or(0);
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.read().as_ref().map_or(0, |p| p.last_used))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Explicitly drop `physical_page` from the cache, spinning until
    /// every zone's invalidate counter clears its pending read on it
    /// (§4.4: "spins (cond_resched) until the counter changes").
    pub fn invalidate(&self, physical_page: u64) {
        let mut index = self.index.lock();
        if let Some(slot_id) = index.remove(&physical_page) {
            drop(index);
            self.wait_for_readers(physical_page);
            *self.slots[slot_id].write() = None;
        }
    }

    fn wait_for_readers(&self, physical_page: u64) {
        let mut spins = 0u32;
        while self.zone_counters.iter().any(|c| c.is_pending_on(physical_page)) {
            std::thread::yield_now();
            spins += 1;
            if spins % 10_000 == 0 {
                debug!(physical_page, spins, "page cache eviction waiting on readers");
            }
        }
    }

    /// Current occupancy, for stats/tests.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = PageCache::new(4, 2);
        cache.insert(10, vec![1, 2, 3]);
        assert_eq!(cache.get(0, 10), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(1, 99), None);
    }

    #[test]
    fn eviction_picks_least_recently_used_when_full() {
        let cache = PageCache::new(2, 1);
        cache.insert(1, vec![1]);
        cache.insert(2, vec![2]);
        // touch page 1 so it's more recently used than page 2
        assert_eq!(cache.get(0, 1), Some(vec![1]));
        cache.insert(3, vec![3]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(0, 1), Some(vec![1]));
        assert_eq!(cache.get(0, 3), Some(vec![3]));
        assert_eq!(cache.get(0, 2), None);
    }

    #[test]
    fn invalidate_removes_a_page() {
        let cache = PageCache::new(4, 1);
        cache.insert(5, vec![9]);
        cache.invalidate(5);
        assert_eq!(cache.get(0, 5), None);
    }
}
