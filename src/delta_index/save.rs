//! On-disk save/restore format for a delta memory zone (§4.1 Save format).
//!
//! The format carries the magic string `"DI-00002"`. An earlier format
//! tagged `"DI-00001"` existed upstream and is deliberately rejected
//! rather than reinterpreted — callers that hit
//! [`CorruptDataError::LegacyFormat`] need to rebuild the volume index
//! from the volume rather than trust a save written by the old layout.

use super::mutable::MutableDeltaZone;
use crate::error::{CorruptDataError, Result};

const MAGIC_CURRENT: &[u8; 8] = b"DI-00002";
const MAGIC_LEGACY: &[u8; 8] = b"DI-00001";

pub(super) fn save_zone(zone: &MutableDeltaZone, zone_count: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC_CURRENT);
    out.extend_from_slice(&zone_count.to_le_bytes());
    out.extend_from_slice(&zone.zone_number().to_le_bytes());
    out.extend_from_slice(&zone.first_list().to_le_bytes());
    out.extend_from_slice(&zone.list_count().to_le_bytes());
    out.extend_from_slice(&zone.value_bits().to_le_bytes());
    out.extend_from_slice(&zone.record_count().to_le_bytes());
    out.extend_from_slice(&zone.collision_count().to_le_bytes());

    let list_bytes: Vec<&[u8]> = (0..zone.list_count() as usize)
        .map(|local| zone.raw_list_bytes(local))
        .collect();
    for bytes in &list_bytes {
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    }
    for bytes in &list_bytes {
        out.extend_from_slice(bytes);
    }
    out
}

pub(super) fn load_zone(bytes: &[u8], value_bits: u32, mean_delta: u32) -> Result<MutableDeltaZone> {
    if bytes.len() < 8 {
        return Err(CorruptDataError::HeaderMismatch("save shorter than magic".into()).into());
    }
    let magic: &[u8; 8] = bytes[0..8].try_into().unwrap();
    if magic == MAGIC_LEGACY {
        return Err(CorruptDataError::LegacyFormat.into());
    }
    if magic != MAGIC_CURRENT {
        return Err(CorruptDataError::HeaderMismatch(format!(
            "unrecognized save magic {:?}",
            String::from_utf8_lossy(magic)
        ))
        .into());
    }

    const FIXED_HEADER: usize = 8 + 4 * 5 + 8 * 2;
    if bytes.len() < FIXED_HEADER {
        return Err(CorruptDataError::HeaderMismatch("save truncated in header".into()).into());
    }

    let mut pos = 8;
    let read_u32 = |bytes: &[u8], pos: &mut usize| -> u32 {
        let v = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        v
    };
    let read_u64 = |bytes: &[u8], pos: &mut usize| -> u64 {
        let v = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
        *pos += 8;
        v
    };

    let _zone_count = read_u32(bytes, &mut pos);
    let zone_number = read_u32(bytes, &mut pos);
    let first_list = read_u32(bytes, &mut pos);
    let list_count = read_u32(bytes, &mut pos);
    let saved_value_bits = read_u32(bytes, &mut pos);
    let record_count = read_u64(bytes, &mut pos);
    let collision_count = read_u64(bytes, &mut pos);

    if saved_value_bits != value_bits {
        return Err(CorruptDataError::HeaderMismatch(format!(
            "save value_bits {saved_value_bits} does not match configured {value_bits}"
        ))
        .into());
    }

    let lengths_end = pos + list_count as usize * 4;
    if bytes.len() < lengths_end {
        return Err(CorruptDataError::InvalidOffsets("save list-length table truncated".into()).into());
    }
    let mut lengths = Vec::with_capacity(list_count as usize);
    for _ in 0..list_count {
        lengths.push(read_u32(bytes, &mut pos) as usize);
    }

    let mut zone = MutableDeltaZone::from_parts(
        zone_number,
        first_list,
        list_count,
        value_bits,
        mean_delta,
        0,
        0,
    );

    for (local, &len) in lengths.iter().enumerate() {
        if bytes.len() < pos + len {
            return Err(CorruptDataError::InvalidOffsets("save list data truncated".into()).into());
        }
        let list_bytes = bytes[pos..pos + len].to_vec();
        pos += len;
        zone.install_list(local, list_bytes)?;
    }

    debug_assert_eq!(zone.record_count(), record_count);
    debug_assert_eq!(zone.collision_count(), collision_count);
    Ok(zone)
}

#[cfg(test)]
mod tests {
    use super::super::entry::DeltaEntry;
    use super::super::mutable::MutableDeltaZone;

    #[test]
    fn save_and_load_round_trip_preserves_entries() {
        let mut zone = MutableDeltaZone::new(1, 10, 3, 16, 128);
        zone.insert(10, DeltaEntry::plain(5, 1)).unwrap();
        zone.insert(10, DeltaEntry::plain(500, 2)).unwrap();
        zone.insert(11, DeltaEntry::plain(3, 9)).unwrap();

        let bytes = zone.save(4);
        let loaded = MutableDeltaZone::load(&bytes, 16, 128).unwrap();

        assert_eq!(loaded.first_list(), 10);
        assert_eq!(loaded.list_count(), 3);
        assert!(loaded.lookup(10, 5).found);
        assert!(loaded.lookup(10, 500).found);
        assert!(loaded.lookup(11, 3).found);
        assert!(!loaded.lookup(12, 1).found);
    }

    #[test]
    fn legacy_magic_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DI-00001");
        bytes.extend_from_slice(&[0u8; 40]);
        let err = MutableDeltaZone::load(&bytes, 16, 128).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::CorruptData(crate::error::CorruptDataError::LegacyFormat)
        ));
    }
}
