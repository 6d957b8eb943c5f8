//! Result buffers exchanged with callers: packed little-endian `f32` values.

use thiserror::Error;

/// Operation completed.
pub const SUCCESS: f32 = 1.0;
/// No match, unknown id, or a failed diagnostic.
pub const SENTINEL: f32 = -1.0;

#[derive(Error, Debug, PartialEq)]
pub enum WireError {
    #[error("buffer length {0} is not a multiple of 4")]
    Misaligned(usize),
}

pub fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn encode_scalar(value: f32) -> Vec<u8> {
    encode(&[value])
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, WireError> {
    if bytes.len() % 4 != 0 {
        return Err(WireError::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
