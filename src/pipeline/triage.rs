//! Triage: assigns each request to a zone by hashing its name, and
//! decides whether a sparse-cache barrier update must run first (§4.6).

use super::request::Request;
use crate::sparse_cache::SparseCache;
use crate::volume_index::VolumeIndex;

/// The result of triaging one request: which zone it's bound for, and
/// (when its sparse lookup names a chapter the cache doesn't hold yet)
/// the virtual chapter a barrier update must admit first.
pub struct TriageDecision {
    /// Zone the request is now bound to.
    pub zone: u32,
    /// Set when the sparse cache must admit this chapter before the
    /// zone can resolve the request (§4.6 Triage).
    pub needs_barrier_for: Option<u64>,
}

/// Single-threaded triage: hashes names to zones and flags sparse
/// cache barrier needs. In the real pipeline this runs on its own
/// dedicated thread ahead of the per-zone queues (§5 Scheduling
/// model); this crate's `Session` calls it inline per request instead
/// of running a background triage thread (see DESIGN.md).
pub struct Triage<'a> {
    volume_index: &'a VolumeIndex,
    sparse_cache: Option<&'a SparseCache>,
}

impl<'a> Triage<'a> {
    /// Build a triage stage over the index's volume index and, if
    /// sparse residency is enabled, its sparse cache.
    pub fn new(volume_index: &'a VolumeIndex, sparse_cache: Option<&'a SparseCache>) -> Self {
        Self { volume_index, sparse_cache }
    }

    /// Route `request`, flagging a sparse-cache admission if needed.
    pub fn route(&self, request: &mut Request) -> TriageDecision {
        let zone = self.volume_index.zone_of(&request.name);
        request.zone = Some(zone);

        let needs_barrier_for = if self.volume_index.is_sample(&request.name) {
            self.sparse_cache.and_then(|cache| {
                let hint = self.volume_index.lookup(&request.name);
                hint.virtual_chapter.filter(|vc| !cache.contains(*vc))
            })
        } else {
            None
        };

        TriageDecision { zone, needs_barrier_for }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::pipeline::request::RequestKind;
    use crate::record::RecordName;

    fn geometry() -> Geometry {
        Geometry::new(4096, 32, 4, 2, 16, 4, 2).unwrap()
    }

    #[test]
    fn routes_to_a_zone_within_range() {
        let volume_index = VolumeIndex::new(geometry(), 4);
        let triage = Triage::new(&volume_index, None);
        let mut request = Request::new(RecordName::new([7; 16]), RequestKind::Query);
        let decision = triage.route(&mut request);
        assert!(decision.zone < 4);
        assert_eq!(request.zone, Some(decision.zone));
    }
}
