//! Chunk Encoder
//!
//! Splits a sub-flag into the fixed-width numeric chunks the `SubFlagCheck`
//! circuit takes as input. The secret is hex-encoded, cut into `k` contiguous
//! pieces of `ceil(len / k)` digits, and each piece is right-padded with `'0'` to
//! one 64-bit chunk.
//!
//! A piece wider than a chunk cannot be represented, so secrets longer than
//! [`max_secret_len`] bytes are rejected instead of being truncated.

use crate::consts::circuit::CHUNK_HEX_WIDTH;
use serde::{Serialize, Serializer};
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("chunk count must be positive, got {0}")]
    InvalidChunkCount(usize),

    #[error(
        "secret encodes to {hex_len} hex digits but {chunk_count} chunks of {width} digits hold at most {capacity}"
    )]
    Overflow {
        hex_len: usize,
        chunk_count: usize,
        width: usize,
        capacity: usize,
    },

    #[error("chunk {digits:?} is not a 64-bit hex value: {reason}")]
    InvalidChunk { digits: String, reason: String },
}

/// Ordered circuit inputs for one secret. Serializes as decimal strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSet(Vec<u64>);

impl ChunkSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn to_decimal_strings(&self) -> Vec<String> {
        self.0.iter().map(|c| c.to_string()).collect()
    }
}

impl Serialize for ChunkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|c| c.to_string()))
    }
}

impl Display for ChunkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.to_decimal_strings().join(", "))
    }
}

/// Longest secret, in bytes, that `chunk_count` chunks can carry losslessly.
pub fn max_secret_len(chunk_count: usize) -> usize {
    chunk_count * CHUNK_HEX_WIDTH / 2
}

fn piece_len(hex_len: usize, chunk_count: usize) -> usize {
    hex_len.div_ceil(chunk_count)
}

pub fn encode(secret: &str, chunk_count: usize) -> Result<ChunkSet, EncodingError> {
    if chunk_count == 0 {
        return Err(EncodingError::InvalidChunkCount(chunk_count));
    }

    let hex_string = hex::encode(secret.as_bytes());
    let size = piece_len(hex_string.len(), chunk_count);
    if size > CHUNK_HEX_WIDTH {
        return Err(EncodingError::Overflow {
            hex_len: hex_string.len(),
            chunk_count,
            width: CHUNK_HEX_WIDTH,
            capacity: chunk_count * CHUNK_HEX_WIDTH,
        });
    }

    let mut chunks = Vec::with_capacity(chunk_count);
    for i in 0..chunk_count {
        let start = (i * size).min(hex_string.len());
        let end = (start + size).min(hex_string.len());
        let padded = format!("{:0<width$}", &hex_string[start..end], width = CHUNK_HEX_WIDTH);
        chunks.push(parse_chunk(&padded)?);
    }

    Ok(ChunkSet(chunks))
}

fn parse_chunk(digits: &str) -> Result<u64, EncodingError> {
    let mut bytes = [0u8; 8];
    hex::decode_to_slice(digits, &mut bytes).map_err(|e| EncodingError::InvalidChunk {
        digits: digits.to_string(),
        reason: e.to_string(),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Recovers the hex string of a secret from its chunks, given the original hex length.
pub fn reconstruct_hex(chunks: &ChunkSet, hex_len: usize) -> String {
    if chunks.is_empty() {
        return String::new();
    }
    let size = piece_len(hex_len, chunks.len());
    let mut out = String::with_capacity(hex_len);
    for chunk in chunks.as_slice() {
        let remaining = hex_len - out.len();
        if remaining == 0 {
            break;
        }
        let digits = format!("{:0width$x}", chunk, width = CHUNK_HEX_WIDTH);
        out.push_str(&digits[..size.min(remaining)]);
    }
    out
}
