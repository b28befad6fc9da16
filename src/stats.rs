//! Aggregated, point-in-time index statistics (§6 `get_stats`), derived
//! from the live [`Metrics`](crate::metrics::Metrics) counters and the
//! volume index's own bookkeeping.

use crate::metrics::Metrics;
use crate::volume_index::VolumeIndex;

/// A snapshot of counters useful to an operator or test assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Records currently tracked across the open chapter and volume index.
    pub record_count: u64,
    /// Total requests processed since the index opened.
    pub requests_total: u64,
    /// Chapters written to the volume.
    pub chapters_written_total: u64,
    /// Volume-index entries evicted early under memory pressure.
    pub early_flushes_total: u64,
    /// Delta-list overflow events.
    pub overflow_total: u64,
    /// I/O failures observed against the backing volume.
    pub io_failures_total: u64,
    /// Page cache hits.
    pub page_cache_hits_total: u64,
    /// Page cache misses.
    pub page_cache_misses_total: u64,
}

impl Stats {
    /// Snapshot the current counters.
    pub fn collect(metrics: &Metrics, volume_index: &VolumeIndex) -> Self {
        Self {
            record_count: volume_index.record_count(),
            requests_total: ["post", "update", "query", "query_no_update"]
                .iter()
                .map(|kind| metrics.requests_total.with_label_values(&[kind]).get() as u64)
                .sum(),
            chapters_written_total: metrics.chapters_written_total.get() as u64,
            early_flushes_total: metrics.early_flushes_total.get() as u64,
            overflow_total: metrics.overflow_total.get() as u64,
            io_failures_total: metrics.io_failures_total.get() as u64,
            page_cache_hits_total: metrics.page_cache_hits_total.get() as u64,
            page_cache_misses_total: metrics.page_cache_misses_total.get() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    #[test]
    fn collects_zero_counters_for_a_fresh_index() {
        let metrics = Metrics::new().unwrap();
        let volume_index = VolumeIndex::new(Geometry::new(4096, 32, 4, 2, 16, 4, 2).unwrap(), 1);
        let stats = Stats::collect(&metrics, &volume_index);
        assert_eq!(stats.record_count, 0);
        assert_eq!(stats.requests_total, 0);
    }
}
