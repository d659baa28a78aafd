// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Seven bits per byte, most-significant group first, continuation bit 0x80
// on every byte except the last.  Parsing distinguishes "not enough bytes
// yet" from "value does not fit", so the streaming decoder can wait for more
// input instead of failing.

/// Longest encoding of a `u64` (ceil(64 / 7)).
pub const MAX_VARINT_LEN: usize = 10;

/// Upper bound for lengths and addresses (signed 32-bit range, as written by
/// open-vcdiff compatible encoders).
pub const MAX_SIZE: u64 = i32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// The input ended before the terminating byte.
    Incomplete,
    /// The value exceeds the caller's limit or uses too many bytes.
    Overflow,
}

impl std::fmt::Display for VarintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete varint"),
            Self::Overflow => f.write_str("varint out of range"),
        }
    }
}

impl std::error::Error for VarintError {}

/// Append the encoding of `value` to `out`.
pub fn push(out: &mut Vec<u8>, value: u64) {
    let len = encoded_len(value);
    for group in (0..len).rev() {
        let bits = ((value >> (group * 7)) & 0x7F) as u8;
        out.push(if group == 0 { bits } else { bits | 0x80 });
    }
}

/// Number of bytes `push` writes for `value`.
#[inline]
pub fn encoded_len(value: u64) -> usize {
    let bits = (u64::BITS - value.leading_zeros()).max(1);
    bits.div_ceil(7) as usize
}

/// Parse one integer no larger than `limit` from the front of `data`.
///
/// Returns the value and the number of bytes it occupied.
pub fn read_bounded(data: &[u8], limit: u64) -> Result<(u64, usize), VarintError> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(VarintError::Overflow);
        }
        value = value
            .checked_mul(128)
            .and_then(|v| v.checked_add(u64::from(byte & 0x7F)))
            .ok_or(VarintError::Overflow)?;
        if value > limit {
            return Err(VarintError::Overflow);
        }
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        return Err(VarintError::Overflow);
    }
    Err(VarintError::Incomplete)
}

/// Parse a length or address (at most [`MAX_SIZE`]).
#[inline]
pub fn read_size(data: &[u8]) -> Result<(usize, usize), VarintError> {
    let (value, used) = read_bounded(data, MAX_SIZE)?;
    let value = usize::try_from(value).map_err(|_| VarintError::Overflow)?;
    Ok((value, used))
}

/// Parse an unrestricted 64-bit value.
#[inline]
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarintError> {
    read_bounded(data, u64::MAX)
}
