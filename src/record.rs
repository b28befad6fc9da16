//! Record names and the derived fields used to route them through the
//! index: address prefix, delta key, zone selector, and hook sampling.

use crate::geometry::{METADATA_SIZE, RECORD_NAME_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 16-byte opaque cryptographic chunk fingerprint, assumed uniformly
/// distributed. This is the key the whole index is built around.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordName(pub [u8; RECORD_NAME_SIZE]);

/// Sentinel name a closed chapter pads its record pages with past the
/// last live record; never a name a caller can post, since real names
/// are assumed uniformly distributed across the full 16-byte range.
pub(crate) const PADDING_NAME: RecordName = RecordName([0xFF; RECORD_NAME_SIZE]);

impl RecordName {
    /// Wrap a raw 16-byte fingerprint.
    #[inline]
    pub fn new(bytes: [u8; RECORD_NAME_SIZE]) -> Self {
        Self(bytes)
    }

    /// The high 32 bits of the name, used to pick a delta list address.
    #[inline]
    pub fn address_prefix(&self) -> u32 {
        u32::from_be_bytes(self.0[0..4].try_into().unwrap())
    }

    /// The next 32 bits of the name, stored as the delta key (the
    /// "remainder" once the address prefix has selected a list).
    #[inline]
    pub fn delta_key(&self) -> u32 {
        u32::from_be_bytes(self.0[4..8].try_into().unwrap())
    }

    /// Zone selector: top `zone_bits` bits of the name, reserved for
    /// sharding and disjoint from the bits `address_prefix` consumes for
    /// list selection within a zone's range.
    #[inline]
    pub fn zone_selector(&self, zone_bits: u32) -> u32 {
        if zone_bits == 0 {
            return 0;
        }
        let top = u64::from_be_bytes(self.0[0..8].try_into().unwrap());
        (top >> (64 - zone_bits)) as u32
    }

    /// Sampling predicate: true when this name is a "hook" eligible for
    /// the sparse sub-index. A `sample_rate` of 0 means no name is ever
    /// a hook (sparse disabled); a rate of 1 makes every name a hook.
    #[inline]
    pub fn is_hook(&self, sample_rate: u32) -> bool {
        if sample_rate == 0 {
            return false;
        }
        if sample_rate == 1 {
            return true;
        }
        let tail = u32::from_be_bytes(self.0[12..16].try_into().unwrap());
        tail % sample_rate == 0
    }
}

impl fmt::Debug for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordName({})", hex::encode(self.0))
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A record name plus its opaque metadata payload. Fixed on-disk size.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The fingerprint this record is keyed by.
    pub name: RecordName,
    /// Opaque caller-supplied metadata (e.g. the block location sharing this chunk).
    pub metadata: [u8; METADATA_SIZE],
}

impl Record {
    /// Build a record from a name and metadata payload.
    pub fn new(name: RecordName, metadata: [u8; METADATA_SIZE]) -> Self {
        Self { name, metadata }
    }

    /// Serialize this record into a fixed-size on-disk buffer: name
    /// followed by metadata, name at offset 0 as required by the record
    /// page format.
    pub fn to_bytes(&self) -> [u8; RECORD_NAME_SIZE + METADATA_SIZE] {
        let mut buf = [0u8; RECORD_NAME_SIZE + METADATA_SIZE];
        buf[..RECORD_NAME_SIZE].copy_from_slice(&self.name.0);
        buf[RECORD_NAME_SIZE..].copy_from_slice(&self.metadata);
        buf
    }

    /// Parse a record from a fixed-size on-disk buffer.
    pub fn from_bytes(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= RECORD_NAME_SIZE + METADATA_SIZE);
        let mut name = [0u8; RECORD_NAME_SIZE];
        name.copy_from_slice(&buf[..RECORD_NAME_SIZE]);
        let mut metadata = [0u8; METADATA_SIZE];
        metadata.copy_from_slice(&buf[RECORD_NAME_SIZE..RECORD_NAME_SIZE + METADATA_SIZE]);
        Self {
            name: RecordName(name),
            metadata,
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("name", &self.name)
            .field("metadata", &hex::encode(self.metadata))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_selector_is_stable_across_calls() {
        let name = RecordName([0xAB; 16]);
        assert_eq!(name.zone_selector(2), name.zone_selector(2));
    }

    #[test]
    fn sample_rate_zero_disables_hooks() {
        for b in 0..=255u8 {
            let name = RecordName([b; 16]);
            assert!(!name.is_hook(0));
        }
    }

    #[test]
    fn sample_rate_one_makes_every_name_a_hook() {
        for b in 0..=255u8 {
            let name = RecordName([b; 16]);
            assert!(name.is_hook(1));
        }
    }

    #[test]
    fn record_round_trips_through_bytes() {
        let rec = Record::new(RecordName([7u8; 16]), [9u8; 16]);
        let bytes = rec.to_bytes();
        let back = Record::from_bytes(&bytes);
        assert_eq!(rec, back);
    }
}
