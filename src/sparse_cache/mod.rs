//! Sparse chapter cache: an LRU of whole chapter indexes for the
//! sparse region, barrier-coordinated across zones (§4.5).

mod cache;

pub use cache::SparseCache;
