//! A high-throughput deduplication fingerprint index.
//!
//! Records map a fixed-width content name to small metadata payload,
//! organised as a memory-resident [`volume_index`] pointing into an
//! on-disk sequence of immutable chapters ([`volume`]). New records
//! accumulate in an [`open_chapter`] until it fills, at which point it
//! is sorted, indexed ([`chapter_index`]), and written to the volume.
//! A [`sparse_cache`] holds a working set of sparse chapter indexes for
//! volumes too large to keep every chapter's index resident. All of the
//! above is driven through the [`pipeline`] module's `Session`.

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

pub mod chapter_index;
pub mod config;
pub mod delta_index;
pub mod error;
pub mod geometry;
pub mod heap_order;
pub mod logging;
pub mod metrics;
pub mod open_chapter;
pub mod pipeline;
pub mod record;
pub mod sparse_cache;
pub mod stats;
pub mod volume;
pub mod volume_index;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Request, RequestKind, Session, SessionState};
pub use record::RecordName;
