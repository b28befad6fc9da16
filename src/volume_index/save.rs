//! On-disk save/restore format for the volume index: the dense
//! sub-index, followed by the sparse sub-index when enabled (§4.2 Save
//! format). Mirrors the delta-index save framing one level up.

use super::sub_index::SavedSubIndex;
use crate::error::{CorruptDataError, Result};

const MAGIC: &[u8; 8] = b"VIDX0001";

pub(super) fn encode(dense: &SavedSubIndex, sparse: Option<&SavedSubIndex>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(sparse.is_some() as u8);
    out.extend_from_slice(&[0u8; 3]);
    encode_sub_index(dense, &mut out);
    if let Some(sparse) = sparse {
        encode_sub_index(sparse, &mut out);
    }
    out
}

fn encode_sub_index(sub: &SavedSubIndex, out: &mut Vec<u8>) {
    out.extend_from_slice(&sub.list_count.to_le_bytes());
    out.extend_from_slice(&sub.zone_count.to_le_bytes());
    out.extend_from_slice(&sub.value_bits.to_le_bytes());
    out.extend_from_slice(&sub.mean_delta.to_le_bytes());
    out.extend_from_slice(&sub.chapters_per_volume.to_le_bytes());
    out.extend_from_slice(&sub.newest_virtual_chapter.to_le_bytes());
    for zone in &sub.zones {
        out.extend_from_slice(&(zone.len() as u32).to_le_bytes());
    }
    for zone in &sub.zones {
        out.extend_from_slice(zone);
    }
}

pub(super) struct Decoded {
    pub(super) dense: SavedSubIndex,
    pub(super) sparse: Option<SavedSubIndex>,
}

pub(super) fn decode(bytes: &[u8]) -> Result<Decoded> {
    if bytes.len() < 12 || &bytes[0..8] != MAGIC {
        return Err(CorruptDataError::HeaderMismatch("unrecognized volume-index save magic".into()).into());
    }
    let has_sparse = bytes[8] != 0;
    let mut pos = 12;
    let dense = decode_sub_index(bytes, &mut pos)?;
    let sparse = if has_sparse { Some(decode_sub_index(bytes, &mut pos)?) } else { None };
    Ok(Decoded { dense, sparse })
}

fn decode_sub_index(bytes: &[u8], pos: &mut usize) -> Result<SavedSubIndex> {
    const FIXED: usize = 4 * 5 + 8;
    if bytes.len() < *pos + FIXED {
        return Err(CorruptDataError::HeaderMismatch("volume-index save truncated in sub-index header".into()).into());
    }
    let read_u32 = |bytes: &[u8], pos: &mut usize| -> u32 {
        let v = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        v
    };
    let list_count = read_u32(bytes, pos);
    let zone_count = read_u32(bytes, pos);
    let value_bits = read_u32(bytes, pos);
    let mean_delta = read_u32(bytes, pos);
    let chapters_per_volume = read_u32(bytes, pos);
    let newest_virtual_chapter = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;

    let lengths_end = *pos + zone_count as usize * 4;
    if bytes.len() < lengths_end {
        return Err(CorruptDataError::InvalidOffsets("volume-index save zone-length table truncated".into()).into());
    }
    let mut lengths = Vec::with_capacity(zone_count as usize);
    for _ in 0..zone_count {
        lengths.push(read_u32(bytes, pos) as usize);
    }

    let mut zones = Vec::with_capacity(zone_count as usize);
    for len in lengths {
        if bytes.len() < *pos + len {
            return Err(CorruptDataError::InvalidOffsets("volume-index save zone data truncated".into()).into());
        }
        zones.push(bytes[*pos..*pos + len].to_vec());
        *pos += len;
    }

    Ok(SavedSubIndex {
        list_count,
        zone_count,
        value_bits,
        mean_delta,
        chapters_per_volume,
        newest_virtual_chapter,
        zones,
    })
}
