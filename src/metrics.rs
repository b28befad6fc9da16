//! Prometheus metrics for the index (§13). One [`Metrics`] is built per
//! [`Session`](crate::pipeline::Session) and shared by `Arc` with every
//! zone, reader, and writer thread.

use crate::error::Result;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
};
use std::time::Instant;

/// Centralized metrics collection for one index instance.
pub struct Metrics {
    /// Requests processed, labelled by kind (post/update/query/query_no_update).
    pub requests_total: IntCounterVec,
    /// Per-stage request latency (triage/zone/page_fetch).
    pub request_duration_seconds: HistogramVec,
    /// Page cache hits.
    pub page_cache_hits_total: IntCounter,
    /// Page cache misses.
    pub page_cache_misses_total: IntCounter,
    /// Sparse cache hits.
    pub sparse_cache_hits_total: IntCounter,
    /// Sparse cache misses.
    pub sparse_cache_misses_total: IntCounter,
    /// Chapters written to the volume.
    pub chapters_written_total: IntCounter,
    /// Zone entries evicted early under memory pressure.
    pub early_flushes_total: IntCounter,
    /// Delta-list overflow events.
    pub overflow_total: IntCounter,
    /// I/O failures observed against the backing volume.
    pub io_failures_total: IntCounter,
    /// Current record count held in the open chapter.
    pub open_chapter_records: IntGauge,
    registry: Registry,
}

impl Metrics {
    /// Create a fresh, independent metrics registry (one per index
    /// instance, so unit tests constructing multiple indexes do not
    /// collide on metric names).
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            requests_total: register_int_counter_vec_with_registry!(
                "uds_requests_total",
                "Total number of requests processed, by kind",
                &["kind"],
                registry
            )
            .map_err(prometheus_err)?,
            request_duration_seconds: register_histogram_vec_with_registry!(
                "uds_request_duration_seconds",
                "Request latency by pipeline stage",
                &["stage"],
                vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0],
                registry
            )
            .map_err(prometheus_err)?,
            page_cache_hits_total: register_int_counter_with_registry!(
                "uds_page_cache_hits_total",
                "Page cache hits",
                registry
            )
            .map_err(prometheus_err)?,
            page_cache_misses_total: register_int_counter_with_registry!(
                "uds_page_cache_misses_total",
                "Page cache misses",
                registry
            )
            .map_err(prometheus_err)?,
            sparse_cache_hits_total: register_int_counter_with_registry!(
                "uds_sparse_cache_hits_total",
                "Sparse chapter cache hits",
                registry
            )
            .map_err(prometheus_err)?,
            sparse_cache_misses_total: register_int_counter_with_registry!(
                "uds_sparse_cache_misses_total",
                "Sparse chapter cache misses",
                registry
            )
            .map_err(prometheus_err)?,
            chapters_written_total: register_int_counter_with_registry!(
                "uds_chapters_written_total",
                "Chapters written to the volume",
                registry
            )
            .map_err(prometheus_err)?,
            early_flushes_total: register_int_counter_with_registry!(
                "uds_early_flushes_total",
                "Volume-index entries evicted early under memory pressure",
                registry
            )
            .map_err(prometheus_err)?,
            overflow_total: register_int_counter_with_registry!(
                "uds_overflow_total",
                "Delta-list overflow events",
                registry
            )
            .map_err(prometheus_err)?,
            io_failures_total: register_int_counter_with_registry!(
                "uds_io_failures_total",
                "I/O failures observed against the backing volume",
                registry
            )
            .map_err(prometheus_err)?,
            open_chapter_records: register_int_gauge_with_registry!(
                "uds_open_chapter_records",
                "Records currently held in the open chapter",
                registry
            )
            .map_err(prometheus_err)?,
            registry,
        })
    }

    /// Render all metrics in Prometheus text exposition format. Serving
    /// this over HTTP is an external-collaborator concern (§13); this
    /// crate only produces the text.
    pub fn collect(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}

fn prometheus_err(e: prometheus::Error) -> crate::error::Error {
    crate::error::Error::config(format!("metrics registration failed: {e}"))
}

/// Timer for measuring a request's duration against a histogram.
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start timing against the given histogram.
    pub fn start(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Record elapsed time and consume the timer.
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_construct_and_collect() {
        let metrics = Metrics::new().expect("metrics construct");
        metrics.requests_total.with_label_values(&["post"]).inc();
        let text = metrics.collect();
        assert!(text.contains("uds_requests_total"));
    }
}
