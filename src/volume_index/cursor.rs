//! The volume index's lookup cursor (§3 Volume index record).

use crate::delta_index::Cursor;
use crate::record::RecordName;

/// Which sub-index a [`VolumeIndexRecord`] was found in (or would be
/// inserted into).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubIndexKind {
    /// The full-residency, newest-chapters sub-index.
    Dense,
    /// The hook-names-only sub-index for aged-out chapters.
    Sparse,
}

/// A transient cursor bound to one delta-index entry inside the volume
/// index. Created by `lookup`, consumed by at most one of `remove`,
/// `set_chapter`, or `put` (§3).
#[derive(Debug, Clone)]
pub struct VolumeIndexRecord {
    /// The name this cursor was looked up for.
    pub name: RecordName,
    /// Zone owning the delta list this name hashes to.
    pub zone: u32,
    /// Which sub-index this cursor is bound to.
    pub sub_index: SubIndexKind,
    /// Whether an entry for this name was found.
    pub is_found: bool,
    /// Whether the found entry required full-name disambiguation
    /// (shared its delta-list address and key with another name).
    pub is_collision: bool,
    /// The virtual chapter this name currently resolves to, if found.
    pub virtual_chapter: Option<u64>,
    pub(crate) delta_cursor: Cursor,
}
