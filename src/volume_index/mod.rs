//! Volume index: the RAM top-level map from record name to the chapter
//! last known to hold it, split into a dense and an optional sparse
//! sub-index and sharded across zones (§3, §4.2).

mod cursor;
mod save;
mod sub_index;

pub use cursor::{SubIndexKind, VolumeIndexRecord};

use crate::error::Result;
use crate::geometry::{bits_for, Geometry};
use crate::record::RecordName;
use sub_index::SubIndex;

/// The RAM-resident name → chapter map.
pub struct VolumeIndex {
    geometry: Geometry,
    zone_count: u32,
    zone_bits: u32,
    dense: SubIndex,
    sparse: Option<SubIndex>,
}

impl VolumeIndex {
    /// Build an empty volume index for the given geometry, sharded
    /// across `zone_count` zones.
    pub fn new(geometry: Geometry, zone_count: u32) -> Self {
        let zone_count = zone_count.max(1);
        let zone_bits = bits_for(zone_count);
        let dense_entries =
            geometry.dense_chapters_per_volume() as u64 * geometry.records_per_chapter() as u64;
        // The dense sub-index ages on its own, narrower window (just the
        // newest dense chapters); the sparse sub-index ages on the full
        // volume window, since it's meant to outlive dense residency.
        // Hook names are written to both at `put` time, so there is no
        // separate migration step when a chapter falls out of dense.
        let dense = SubIndex::new(
            zone_count,
            dense_entries.max(1),
            geometry.dense_chapters_per_volume(),
        );
        let sparse = if geometry.is_sparse() {
            let sparse_entries = (geometry.sparse_chapters_per_volume as u64
                * geometry.records_per_chapter() as u64)
                / geometry.sparse_sample_rate.max(1) as u64;
            Some(SubIndex::new(
                zone_count,
                sparse_entries.max(1),
                geometry.chapters_per_volume,
            ))
        } else {
            None
        };
        Self {
            geometry,
            zone_count,
            zone_bits,
            dense,
            sparse,
        }
    }

    /// Zone a name is routed to, derived from its top bits independent
    /// of the list-selection bits each sub-index uses internally.
    pub fn zone_of(&self, name: &RecordName) -> u32 {
        if self.zone_count <= 1 {
            0
        } else {
            name.zone_selector(self.zone_bits) % self.zone_count
        }
    }

    /// Whether `name` is a hook eligible for the sparse sub-index.
    pub fn is_sample(&self, name: &RecordName) -> bool {
        self.sparse.is_some() && name.is_hook(self.geometry.sparse_sample_rate)
    }

    /// Look up `name`: dense first, then sparse when `name` is a hook
    /// and the dense lookup missed.
    pub fn lookup(&self, name: &RecordName) -> VolumeIndexRecord {
        let zone = self.zone_of(name);
        let dense_cursor = self.dense.lookup(name);
        if dense_cursor.found {
            return VolumeIndexRecord {
                name: *name,
                zone,
                sub_index: SubIndexKind::Dense,
                is_found: true,
                is_collision: false,
                virtual_chapter: self.dense.virtual_chapter_of(&dense_cursor),
                delta_cursor: dense_cursor,
            };
        }
        if self.is_sample(name) {
            if let Some(sparse) = &self.sparse {
                let sparse_cursor = sparse.lookup(name);
                if sparse_cursor.found {
                    return VolumeIndexRecord {
                        name: *name,
                        zone,
                        sub_index: SubIndexKind::Sparse,
                        is_found: true,
                        is_collision: false,
                        virtual_chapter: sparse.virtual_chapter_of(&sparse_cursor),
                        delta_cursor: sparse_cursor,
                    };
                }
            }
        }
        VolumeIndexRecord {
            name: *name,
            zone,
            sub_index: SubIndexKind::Dense,
            is_found: false,
            is_collision: false,
            virtual_chapter: None,
            delta_cursor: dense_cursor,
        }
    }

    fn sub_index_mut(&mut self, kind: SubIndexKind) -> &mut SubIndex {
        match kind {
            SubIndexKind::Dense => &mut self.dense,
            SubIndexKind::Sparse => self.sparse.as_mut().expect("sparse sub-index not enabled"),
        }
    }

    /// Record that `record.name` resolves to `virtual_chapter`. Always
    /// updates dense; additionally updates sparse when the name is a
    /// hook, so hook names stay resolvable after they age out of dense
    /// residency without a separate migration step.
    pub fn put(&mut self, record: &VolumeIndexRecord, virtual_chapter: u64) -> Result<bool> {
        let name = record.name;
        let mut collided = self.dense.put(&name, virtual_chapter)?;
        if self.is_sample(&name) {
            if let Some(sparse) = &mut self.sparse {
                collided |= sparse.put(&name, virtual_chapter)?;
            }
        }
        Ok(collided)
    }

    /// Remove the entry a cursor is bound to.
    pub fn remove(&mut self, record: &VolumeIndexRecord) -> Result<()> {
        self.sub_index_mut(record.sub_index).remove(&record.delta_cursor)
    }

    /// Overwrite the chapter a cursor resolves to.
    pub fn set_chapter(&mut self, record: &VolumeIndexRecord, virtual_chapter: u64) -> Result<()> {
        self.sub_index_mut(record.sub_index).set_chapter(&record.delta_cursor, virtual_chapter)
    }

    /// Advance the open-chapter marker on every sub-index, expiring
    /// entries that have aged out of the retention window. Returns the
    /// total number of entries removed, for the `early_flushes`-adjacent
    /// aging-out metric.
    pub fn set_open_chapter(&mut self, virtual_chapter: u64) -> Result<u32> {
        let mut removed = self.dense.set_open_chapter(virtual_chapter)?;
        if let Some(sparse) = &mut self.sparse {
            removed += sparse.set_open_chapter(virtual_chapter)?;
        }
        Ok(removed)
    }

    /// Eagerly evict up to `max_entries` of the oldest dense entries
    /// under memory pressure (§4.2 Early flushes).
    pub fn early_flush(&mut self, max_entries: u32) -> Result<u32> {
        self.dense.early_flush(max_entries)
    }

    /// Total records tracked across both sub-indexes.
    pub fn record_count(&self) -> u64 {
        self.dense.record_count() + self.sparse.as_ref().map_or(0, SubIndex::record_count)
    }

    /// Number of parallel zones this volume index is sharded across.
    pub fn zone_count(&self) -> u32 {
        self.zone_count
    }

    /// Serialize the full volume index (dense plus, when enabled,
    /// sparse) to bytes suitable for [`load`](Self::load) (§4.2/§6 Save
    /// format).
    pub fn save(&self) -> Vec<u8> {
        let dense = self.dense.save();
        let sparse = self.sparse.as_ref().map(SubIndex::save);
        save::encode(&dense, sparse.as_ref())
    }

    /// Restore a volume index previously captured by [`save`](Self::save)
    /// for a volume of the given geometry. `geometry` must match the
    /// geometry the index was saved under; sub-index shapes are taken
    /// from the saved bytes themselves, not re-derived from geometry.
    pub fn load(geometry: Geometry, bytes: &[u8]) -> Result<Self> {
        let decoded = save::decode(bytes)?;
        let zone_count = decoded.dense.zone_count.max(1);
        let zone_bits = bits_for(zone_count);
        let dense = SubIndex::load(decoded.dense)?;
        let sparse = decoded.sparse.map(SubIndex::load).transpose()?;
        Ok(Self {
            geometry,
            zone_count,
            zone_bits,
            dense,
            sparse,
        })
    }
}
