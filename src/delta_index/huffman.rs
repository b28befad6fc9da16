//! Huffman coding of list-local address deltas (§4.1 Encoding).
//!
//! Deltas are exponentially distributed around a configured mean, so a
//! small number of Huffman parameters derived from that mean give a code
//! close to optimal without building an explicit tree: short codes for
//! small deltas, a unary-terminated escape for the long tail.

use super::bitstream::{BitReader, BitWriter};

/// Huffman coding parameters derived from a configured mean delta.
///
/// `incr_keys ≈ ln(2) · mean`, `min_bits = ceil(log2(incr_keys + 1))`,
/// `min_keys = 2^min_bits − incr_keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HuffmanParams {
    /// Number of bits in the fixed-width prefix of every delta code.
    pub min_bits: u32,
    /// Deltas below this value are encoded directly in `min_bits` bits.
    pub min_keys: u64,
    /// Span of the first unary "rung"; see [`encode_delta`].
    pub incr_keys: u64,
}

impl HuffmanParams {
    /// Derive parameters from the configured mean delta between
    /// consecutive entries in a list.
    pub fn from_mean_delta(mean_delta: u32) -> Self {
        let mean = mean_delta.max(1) as f64;
        let incr_keys = (std::f64::consts::LN_2 * mean).round().max(1.0) as u64;
        let min_bits = (64 - (incr_keys + 1).leading_zeros()).max(1);
        let min_keys = (1u64 << min_bits).saturating_sub(incr_keys);
        Self {
            min_bits,
            min_keys,
            incr_keys,
        }
    }
}

/// Encode a non-negative delta between consecutive list entries.
///
/// If `delta < min_keys`, write `min_bits` bits holding `delta` directly.
/// Otherwise write `min_bits` bits holding
/// `((delta - min_keys) mod incr_keys) + min_keys`, followed by
/// `(delta - min_keys) / incr_keys` zero bits and a terminating one bit.
pub fn encode_delta(writer: &mut BitWriter, params: &HuffmanParams, delta: u64) {
    if delta < params.min_keys {
        writer.write_bits(delta, params.min_bits);
        return;
    }
    let over = delta - params.min_keys;
    let rung = over / params.incr_keys;
    let remainder = over % params.incr_keys;
    writer.write_bits(remainder + params.min_keys, params.min_bits);
    for _ in 0..rung {
        writer.push_bit(false);
    }
    writer.push_bit(true);
}

/// Maximum unary rungs tolerated before a decode is treated as an
/// overrun rather than legitimate (very large) delta. Bounds the cost of
/// a corrupt stream that never terminates its unary suffix.
const MAX_UNARY_RUNGS: u32 = 1 << 20;

/// Decode a delta previously written by [`encode_delta`]. Returns `None`
/// if the unary suffix never terminates within `MAX_UNARY_RUNGS` bits,
/// the caller's signal for `CorruptData`.
pub fn decode_delta(reader: &mut BitReader, params: &HuffmanParams) -> Option<u64> {
    let prefix = reader.read_bits(params.min_bits);
    if prefix < params.min_keys {
        return Some(prefix);
    }
    let rung = reader.read_unary(MAX_UNARY_RUNGS)? as u64;
    let remainder = prefix - params.min_keys;
    Some(params.min_keys + rung * params.incr_keys + remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(params: HuffmanParams, deltas: &[u64]) {
        let mut w = BitWriter::new();
        for &d in deltas {
            encode_delta(&mut w, &params, d);
        }
        let mut bytes = w.into_bytes();
        super::super::bitstream::append_guard(&mut bytes);
        let mut r = BitReader::new(&bytes, 0);
        for &d in deltas {
            assert_eq!(decode_delta(&mut r, &params), Some(d));
        }
    }

    #[test]
    fn small_and_large_deltas_round_trip() {
        let params = HuffmanParams::from_mean_delta(4096);
        round_trip(params, &[0, 1, 2, 100, 4096, 1_000_000, 50_000_000]);
    }

    #[test]
    fn params_satisfy_their_own_invariant() {
        for mean in [1u32, 4, 64, 4096, 1 << 20] {
            let p = HuffmanParams::from_mean_delta(mean);
            assert_eq!(p.min_keys + p.incr_keys, 1u64 << p.min_bits);
        }
    }

    #[test]
    fn zero_prefix_below_min_keys_decodes_without_consulting_unary_suffix() {
        let params = HuffmanParams::from_mean_delta(16);
        assert!(params.min_keys > 0, "test assumes a nonzero min_keys band");
        let mut bytes = vec![0u8; 4];
        super::super::bitstream::append_guard(&mut bytes);
        let mut r = BitReader::new(&bytes, 0);
        // An all-zero prefix is < min_keys, so this must decode as
        // delta 0 without reading a unary suffix at all.
        assert_eq!(decode_delta(&mut r, &params), Some(0));
    }
}
