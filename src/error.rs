//! Error types for the deduplication index.
//!
//! Error kinds mirror the taxonomy of the on-disk format: corruption is
//! always surfaced, programmer misuse never retried, and I/O failures
//! degrade the affected page rather than crash the engine.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the index.
#[derive(Error, Debug)]
pub enum Error {
    /// On-disk structure failed validation: header mismatch, decode past
    /// list end, or impossible geometry. The index refuses to open.
    #[error("corrupt data: {0}")]
    CorruptData(#[from] CorruptDataError),

    /// A delta list's bit-packed size exceeds the 65535-bit limit.
    /// Local to the affected list; the index remains consistent.
    #[error("delta list overflow: {0}")]
    Overflow(#[from] OverflowError),

    /// API misuse: mutating an immutable page, removing at an end
    /// cursor, operating on a suspended session. Never retried.
    #[error("bad state: {0}")]
    BadState(#[from] BadStateError),

    /// Allocation failure. During open this causes open to fail cleanly
    /// after freeing prior allocations.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Transport error from the backing block device.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// Cancellation during suspend.
    #[error("request aborted during suspend")]
    Aborted,

    /// Configuration was rejected at construction time.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Corruption detected in persisted state.
#[derive(Error, Debug)]
pub enum CorruptDataError {
    /// A delta index page's nonce did not match the configured nonce.
    #[error("delta page nonce mismatch: expected {expected}, found {found}")]
    NonceMismatch {
        /// Nonce configured for this volume.
        expected: u64,
        /// Nonce found in the page header.
        found: u64,
    },

    /// A delta page's list offsets were not non-decreasing, or ran past
    /// the guard boundary.
    #[error("delta page offsets invalid: {0}")]
    InvalidOffsets(String),

    /// A bit decode walked past the end of a list without finding a
    /// terminating one bit.
    #[error("delta decode overran list {list} at bit {bit}")]
    DecodeOverrun {
        /// Index of the list being decoded.
        list: u32,
        /// Bit offset at which the overrun was detected.
        bit: u32,
    },

    /// The on-disk save header used the legacy "DI-00001" magic string.
    /// This implementation accepts only "DI-00002"; legacy saves must be
    /// rebuilt rather than silently reinterpreted.
    #[error("legacy delta-index save format is not supported")]
    LegacyFormat,

    /// A save/volume header's magic or version did not match.
    #[error("header mismatch: {0}")]
    HeaderMismatch(String),

    /// More than the tolerated number of contiguous bad chapters were
    /// found during a rebuild scan.
    #[error("rebuild found {found} contiguous bad chapters, exceeding tolerance of {tolerance}")]
    TooManyBadChapters {
        /// Contiguous bad chapters found.
        found: u32,
        /// Maximum tolerated before failing open.
        tolerance: u32,
    },

    /// A chapter index page could not be validated during rebuild.
    #[error("chapter {virtual_chapter} is unreadable: {reason}")]
    BadChapter {
        /// The virtual chapter number that failed validation.
        virtual_chapter: u64,
        /// Human-readable reason.
        reason: String,
    },

    /// A serialized save-state blob does not fit the volume's reserved
    /// saved-state region.
    #[error("saved state ({needed} bytes) exceeds the reserved region ({capacity} bytes)")]
    SavedStateTooLarge {
        /// Bytes the serialized state actually occupies.
        needed: u64,
        /// Bytes the volume's saved-state region can hold.
        capacity: u64,
    },
}

/// A delta list exceeded its maximum bit-packed size.
#[derive(Error, Debug)]
pub enum OverflowError {
    /// The named list exceeded `MAX_LIST_BITS`.
    #[error("list {list} exceeded {limit} bits (has {actual})")]
    ListTooLarge {
        /// Index of the offending list.
        list: u32,
        /// Size limit in bits.
        limit: u32,
        /// Actual size in bits.
        actual: u32,
    },
}

/// Programmer-error conditions: API misuse that is never retried.
#[derive(Error, Debug)]
pub enum BadStateError {
    /// A mutation was attempted through a cursor into an immutable page.
    #[error("cannot mutate an immutable delta-index page")]
    ImmutablePage,

    /// An operation that requires a found entry was invoked on a cursor
    /// positioned at the end-of-list sentinel.
    #[error("operation invalid at end-of-list cursor")]
    EndCursor,

    /// A session operation was attempted while the index was not online.
    #[error("session is not online (state: {0})")]
    SessionNotOnline(String),

    /// A cursor was used on a zone thread that does not own it.
    #[error("cursor for zone {owner} used from zone {caller}")]
    WrongZone {
        /// Zone that owns the cursor.
        owner: u32,
        /// Zone that attempted to use it.
        caller: u32,
    },
}

/// Configuration validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `zone_count` was zero or exceeded `MAX_ZONES`.
    #[error("zone_count {0} must be in 1..={1}")]
    InvalidZoneCount(u32, u32),

    /// Geometry produced a chapter with zero records.
    #[error("records_per_chapter must be greater than zero")]
    EmptyChapter,

    /// `sparse_chapters_per_volume` exceeded `chapters_per_volume`.
    #[error("sparse_chapters_per_volume ({sparse}) exceeds chapters_per_volume ({total})")]
    SparseExceedsTotal {
        /// Configured sparse chapter count.
        sparse: u32,
        /// Configured total chapter count.
        total: u32,
    },

    /// The computed on-disk size does not fit the configured memory budget.
    #[error("computed index size {computed} exceeds memory_size {budget}")]
    DoesNotFitBudget {
        /// Bytes required by the derived geometry.
        computed: u64,
        /// Bytes the caller offered.
        budget: u64,
    },

    /// A raw value (e.g. from a TOML file) failed to parse or deserialize.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl Error {
    /// Construct a `BadState::SessionNotOnline` error from a session state label.
    pub fn session_not_online(state: impl Into<String>) -> Self {
        Error::BadState(BadStateError::SessionNotOnline(state.into()))
    }

    /// Construct a `Config` error carrying a free-form parse failure.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(ConfigError::Parse(msg.into()))
    }
}
