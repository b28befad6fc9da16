//! The volume: circular on-disk chapter log, page cache, reader pool,
//! physical layout, and rebuild scan (§4.4).

mod layout;
mod page_cache;
mod reader;
mod rebuild;
mod volume;

pub use layout::{Layout, SuperBlock};
pub use page_cache::PageCache;
pub use reader::{PageSource, ReaderPool};
pub use rebuild::{rebuild_scan, RebuildReport};
pub use volume::{Location, Volume};
