//! Sparse chapter cache: an LRU of whole chapter indexes for the
//! sparse region, coordinated across zones by a two-phase barrier with
//! zone zero as captain (§4.5).

use crate::chapter_index::ChapterIndex;
use crate::error::Result;
use crate::record::RecordName;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use tracing::{debug, info};

/// Skip-search threshold base; the effective threshold is this divided
/// by the zone count (§4.5 Skip-search heuristic).
const SKIP_SEARCH_BASE: u32 = 20_000;

struct Slot {
    virtual_chapter: u64,
    chapter_index: Option<ChapterIndex>,
    consecutive_misses: u32,
}

impl Slot {
    fn dead() -> Self {
        Self {
            virtual_chapter: u64::MAX,
            chapter_index: None,
            consecutive_misses: 0,
        }
    }

    fn is_dead(&self) -> bool {
        self.virtual_chapter == u64::MAX
    }
}

/// A fixed-capacity cache of sparse chapter indexes, shared by all
/// zones. `search` and `contains` are read-only from any zone; `update`
/// mutates membership and must be driven through the barrier protocol
/// below by every zone with the same `virtual_chapter` argument.
pub struct SparseCache {
    capacity: usize,
    zone_count: u32,
    slots: Mutex<Vec<Slot>>,
    /// Per-zone private copies of the most-recently-used slot ordering.
    /// Zone zero's copy is authoritative for eviction decisions.
    search_lists: Mutex<Vec<Vec<usize>>>,
    skip_search_threshold: u32,
    oldest_virtual_chapter: AtomicU64,
}

impl SparseCache {
    /// Build an empty cache with `capacity` chapter slots, serving
    /// `zone_count` zones.
    pub fn new(capacity: usize, zone_count: u32) -> Self {
        let capacity = capacity.max(1);
        let zone_count = zone_count.max(1);
        Self {
            capacity,
            zone_count,
            slots: Mutex::new((0..capacity).map(|_| Slot::dead()).collect()),
            search_lists: Mutex::new(vec![(0..capacity).collect(); zone_count as usize]),
            skip_search_threshold: (SKIP_SEARCH_BASE / zone_count).max(1),
            oldest_virtual_chapter: AtomicU64::new(0),
        }
    }

    /// Whether `virtual_chapter` is a cache member (independent of the
    /// skip-search flag, which only affects general search, not
    /// membership per the §4.5 membership invariant).
    pub fn contains(&self, virtual_chapter: u64) -> bool {
        self.slots.lock().iter().any(|s| s.virtual_chapter == virtual_chapter)
    }

    /// Record the zone's current aging boundary; entries older than
    /// this are treated as absent for `search` without being evicted.
    pub fn set_oldest_virtual_chapter(&self, oldest: u64) {
        self.oldest_virtual_chapter.store(oldest, Ordering::Relaxed);
    }

    /// Look up `name` within chapter `virtual_chapter` specifically,
    /// bypassing the skip-search flag (direct lookups of a named
    /// chapter are always honored per §4.5).
    pub fn search_chapter(&self, name: &RecordName, virtual_chapter: u64) -> Option<u32> {
        let slots = self.slots.lock();
        let slot = slots.iter().find(|s| s.virtual_chapter == virtual_chapter)?;
        slot.chapter_index.as_ref()?.lookup(name)
    }

    /// General search across every member chapter in `zone`'s private
    /// most-recently-used order, skipping aged-out and skip-flagged
    /// entries, recording a miss against zone zero's copy of the entry
    /// when nothing is found.
    pub fn search(&self, zone: u32, name: &RecordName) -> Option<(u64, u32)> {
        let oldest = self.oldest_virtual_chapter.load(Ordering::Relaxed);
        let order = self.search_lists.lock()[zone as usize].clone();
        let mut slots = self.slots.lock();
        for &slot_id in &order {
            let slot = &slots[slot_id];
            if slot.is_dead() || slot.virtual_chapter < oldest {
                continue;
            }
            if slot.consecutive_misses >= self.skip_search_threshold {
                continue;
            }
            if let Some(page) = slot.chapter_index.as_ref().and_then(|ci| ci.lookup(name)) {
                slots[slot_id].consecutive_misses = 0;
                return Some((slot.virtual_chapter, page));
            }
        }
        for &slot_id in &order {
            if !slots[slot_id].is_dead() {
                slots[slot_id].consecutive_misses = slots[slot_id].consecutive_misses.saturating_add(1);
            }
        }
        None
    }

    /// Barrier-coordinated admission of `virtual_chapter`. Every zone
    /// must call this with the same `virtual_chapter`, passing a
    /// `fetch` closure that reads the chapter's index pages from the
    /// volume; only zone zero (the captain) ever invokes it. Returns
    /// once both phases of the barrier have released every caller.
    pub fn update(
        &self,
        zone: u32,
        virtual_chapter: u64,
        barrier: &Barrier,
        fetch: impl FnOnce() -> Result<ChapterIndex>,
    ) -> Result<()> {
        barrier.wait(); // begin_cache_update

        let mut captain_error = None;
        if zone == 0 {
            if let Err(e) = self.captain_admit(virtual_chapter, fetch) {
                captain_error = Some(e);
            }
        }

        barrier.wait(); // end_cache_update
        match captain_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn captain_admit(&self, virtual_chapter: u64, fetch: impl FnOnce() -> Result<ChapterIndex>) -> Result<()> {
        if self.contains(virtual_chapter) {
            debug!(virtual_chapter, "sparse cache already holds chapter");
            self.sync_search_lists();
            return Ok(());
        }

        let mut order = self.search_lists.lock()[0].clone();
        // Move dead and skip-flagged entries to the tail so eviction
        // prefers them over live, actively-searched ones.
        {
            let slots = self.slots.lock();
            order.sort_by_key(|&id| {
                let slot = &slots[id];
                (slot.is_dead(), slot.consecutive_misses >= self.skip_search_threshold)
            });
        }
        let victim = *order.first().expect("capacity >= 1");

        let chapter_index = fetch()?;
        {
            let mut slots = self.slots.lock();
            slots[victim] = Slot {
                virtual_chapter,
                chapter_index: Some(chapter_index),
                consecutive_misses: 0,
            };
        }

        // Zone zero's list now has the freshly admitted chapter at the
        // front; every other zone adopts an identical copy.
        order.retain(|&id| id != victim);
        order.insert(0, victim);
        self.search_lists.lock()[0] = order;
        self.sync_search_lists();

        info!(virtual_chapter, "admitted chapter into sparse cache");
        Ok(())
    }

    fn sync_search_lists(&self) {
        let mut lists = self.search_lists.lock();
        let authoritative = lists[0].clone();
        for zone_list in lists.iter_mut().skip(1) {
            *zone_list = authoritative.clone();
        }
    }

    /// Capacity in chapters.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of zones this cache serves.
    pub fn zone_count(&self) -> u32 {
        self.zone_count
    }
}
