//! Request and completion types for the request pipeline (§4.6, §6).

use crate::record::RecordName;
use crate::volume::Location;

/// The operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Record a new name, establishing residency if not already present.
    Post,
    /// Overwrite a known name's metadata.
    Update,
    /// Ask whether a name is known, advancing its chapter on a hit.
    Query,
    /// Ask whether a name is known, without advancing its chapter.
    QueryNoUpdate,
}

/// A single operation carried through triage, a zone, and (on a hit)
/// the volume's page-fetch path.
#[derive(Debug, Clone)]
pub struct Request {
    /// The name this request concerns.
    pub name: RecordName,
    /// What kind of operation this is.
    pub kind: RequestKind,
    /// Metadata to record, for `Post`/`Update`.
    pub new_metadata: Option<[u8; 16]>,
    /// Metadata found at the existing entry, if any, filled in on completion.
    pub old_metadata: Option<[u8; 16]>,
    /// Where the name was found (or why it wasn't), filled in on completion.
    pub location: Option<Location>,
    /// Whether the name was already known.
    pub found: bool,
    /// The virtual chapter the name resolved to, if found.
    pub virtual_chapter: Option<u64>,
    /// Zone this request was routed to by triage.
    pub zone: Option<u32>,
}

impl Request {
    /// Build a fresh, unrouted request.
    pub fn new(name: RecordName, kind: RequestKind) -> Self {
        Self {
            name,
            kind,
            new_metadata: None,
            old_metadata: None,
            location: None,
            found: false,
            virtual_chapter: None,
            zone: None,
        }
    }

    /// Attach metadata for a `Post` or `Update` request.
    pub fn with_metadata(mut self, metadata: [u8; 16]) -> Self {
        self.new_metadata = Some(metadata);
        self
    }
}
