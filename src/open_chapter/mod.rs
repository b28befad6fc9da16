//! The open chapter: the newest chapter's records, still mutable and
//! held entirely in RAM across per-zone buffers, plus the writer that
//! closes a full one into durable, immutable form (§4.3).

mod writer;
mod zone;

pub use writer::{ChapterWriter, ClosedChapter};
pub use zone::OpenChapterZone;
