//! Byte-level helpers shared by the command encoders and response decoders.
//!
//! Sysex payloads must stay within the 7-bit data alphabet, so every full
//! byte travels as a (low 7 bits, high bit) pair. The little-endian 32-bit
//! helpers cover user-defined sysex payloads that carry whole words.

use crate::errors::Error;

/// Splits each byte into two 7-bit groups: `(b & 0x7F, (b >> 7) & 0x7F)`.
pub fn pack_14bit(bytes: &[u8]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        packed.push(b & 0x7F);
        packed.push((b >> 7) & 0x7F);
    }
    packed
}

/// Rebuilds bytes from (lo, hi) pairs: `lo | (hi << 7)`.
///
/// # Errors
/// * `OddPackedLength` - the input does not consist of whole pairs.
pub fn unpack_14bit(packed: &[u8]) -> Result<Vec<u8>, Error> {
    if packed.len() % 2 != 0 {
        return Err(Error::OddPackedLength { len: packed.len() });
    }
    Ok(packed
        .chunks_exact(2)
        .map(|pair| (pair[0] & 0x7F) | ((pair[1] & 0x01) << 7))
        .collect())
}

/// Reads a little-endian `u32` at `offset`.
///
/// # Errors
/// * `BufferTooShort` - fewer than four bytes available at `offset`.
pub fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, Error> {
    let end = offset.checked_add(4).filter(|&end| end <= bytes.len());
    match end {
        Some(end) => {
            let word = &bytes[offset..end];
            Ok(u32::from(word[0])
                | (u32::from(word[1]) << 8)
                | (u32::from(word[2]) << 16)
                | (u32::from(word[3]) << 24))
        }
        None => Err(Error::BufferTooShort {
            needed: 4,
            offset,
            len: bytes.len(),
        }),
    }
}

/// Reads a little-endian `i32` at `offset`.
///
/// # Errors
/// * `BufferTooShort` - fewer than four bytes available at `offset`.
pub fn read_i32_le(bytes: &[u8], offset: usize) -> Result<i32, Error> {
    read_u32_le(bytes, offset).map(|word| word as i32)
}

/// Writes `value` as four little-endian bytes.
pub fn write_u32_le(value: u32) -> [u8; 4] {
    [
        value as u8,
        (value >> 8) as u8,
        (value >> 16) as u8,
        (value >> 24) as u8,
    ]
}

/// Writes `value` as four little-endian bytes.
pub fn write_i32_le(value: i32) -> [u8; 4] {
    write_u32_le(value as u32)
}
