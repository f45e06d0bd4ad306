//! Layout of the header extra-data field.
//!
//! The extra-data of a sealed header is `vanity || payload || seal`:
//! a fixed 32-byte vanity prefix, an RLP-encoded application payload
//! and a fixed 65-byte seal suffix. The payload carries the validator
//! bytes of checkpoint blocks and the inter-transaction dependency
//! matrix consumed by parallel executors.

use alloy_primitives::Bytes;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use thiserror::Error;

/// Fixed number of extra-data prefix bytes reserved for sealer vanity.
pub const EXTRA_VANITY: usize = 32;

/// Fixed number of extra-data suffix bytes reserved for the seal
/// (65-byte signature).
pub const EXTRA_SEAL: usize = 65;

/// Errors raised while reading or writing the extra-data payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtraDataError {
    /// The extra-data field cannot hold vanity and seal regions.
    #[error("extra-data too short: {0} bytes, need at least {min}", min = EXTRA_VANITY + EXTRA_SEAL)]
    TooShort(usize),

    /// The payload between vanity and seal failed to decode.
    #[error("malformed extra-data payload: {0}")]
    Malformed(alloy_rlp::Error),
}

/// Structured payload stored between the vanity prefix and the seal
/// suffix of the header extra-data.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockExtraData {
    /// Consensus validator bytes, present on checkpoint blocks.
    pub validator_bytes: Bytes,
    /// Per-transaction dependency lists: row `i` holds the indices of
    /// earlier transactions whose writes transaction `i` reads.
    pub tx_dependency: Vec<Vec<u64>>,
}

/// Decode the structured payload out of a formatted extra-data field.
/// An empty middle region decodes to the default payload.
pub fn decode_extra_data(extra: &[u8]) -> Result<BlockExtraData, ExtraDataError> {
    if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Err(ExtraDataError::TooShort(extra.len()));
    }
    let payload = &extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL];
    if payload.is_empty() {
        return Ok(BlockExtraData::default());
    }
    let mut buf = payload;
    alloy_rlp::Decodable::decode(&mut buf).map_err(ExtraDataError::Malformed)
}

/// Re-encode `data` into the middle region of `extra`, preserving the
/// vanity prefix and seal suffix byte-for-byte.
pub fn encode_extra_data(extra: &[u8], data: &BlockExtraData) -> Result<Bytes, ExtraDataError> {
    if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Err(ExtraDataError::TooShort(extra.len()));
    }
    let vanity = &extra[..EXTRA_VANITY];
    let seal = &extra[extra.len() - EXTRA_SEAL..];

    let mut out = Vec::with_capacity(EXTRA_VANITY + EXTRA_SEAL + 64);
    out.extend_from_slice(vanity);
    alloy_rlp::Encodable::encode(data, &mut out);
    out.extend_from_slice(seal);
    Ok(Bytes::from(out))
}
