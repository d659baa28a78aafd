// Block fingerprints for dictionary and target matching.
//
// Polynomial rolling hash over a fixed 16-byte block:
//   h(b0..b15) = sum(b_i * 257^(15 - i))  mod 2^23
// Rolling one byte to the right subtracts the outgoing byte's contribution,
// multiplies by the base and adds the incoming byte.  The modulus is a power
// of two, so wrapping `u32` arithmetic followed by a mask is exact.
//
// Also home to the byte-comparison helpers used to extend candidate matches.

/// Bytes per indexed block.  Dictionary positions are indexed only at
/// multiples of this value.
pub const BLOCK_SIZE: usize = 16;

const BASE: u32 = 257;
const MASK: u32 = (1 << 23) - 1;

/// `byte * BASE^(BLOCK_SIZE - 1)` for every byte value, reduced by `MASK`.
const OUTGOING: [u32; 256] = outgoing_table();

const fn outgoing_table() -> [u32; 256] {
    let mut weight: u32 = 1;
    let mut i = 1;
    while i < BLOCK_SIZE {
        weight = weight.wrapping_mul(BASE) & MASK;
        i += 1;
    }
    let mut table = [0u32; 256];
    let mut b = 0;
    while b < 256 {
        table[b] = (b as u32).wrapping_mul(weight) & MASK;
        b += 1;
    }
    table
}

/// Fingerprint of the first `BLOCK_SIZE` bytes of `block`.
#[inline]
pub fn block_hash(block: &[u8]) -> u32 {
    debug_assert!(block.len() >= BLOCK_SIZE);
    block[..BLOCK_SIZE]
        .iter()
        .fold(0u32, |h, &b| h.wrapping_mul(BASE).wrapping_add(u32::from(b)) & MASK)
}

/// Slide a block fingerprint one byte: drop `outgoing`, append `incoming`.
#[inline(always)]
pub fn roll(hash: u32, outgoing: u8, incoming: u8) -> u32 {
    hash.wrapping_sub(OUTGOING[outgoing as usize])
        .wrapping_mul(BASE)
        .wrapping_add(u32::from(incoming))
        & MASK
}

// ---------------------------------------------------------------------------
// Match extension
// ---------------------------------------------------------------------------

/// Length of the common prefix of `a` and `b`, compared eight bytes at a time.
#[inline]
pub fn forward_match(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);
    let mut matched = 0;
    for (wa, wb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let x = u64::from_le_bytes(wa.try_into().unwrap_or_default())
            ^ u64::from_le_bytes(wb.try_into().unwrap_or_default());
        if x != 0 {
            return matched + (x.trailing_zeros() / 8) as usize;
        }
        matched += 8;
    }
    matched
        + a[matched..]
            .iter()
            .zip(&b[matched..])
            .take_while(|(x, y)| x == y)
            .count()
}

/// Number of equal bytes immediately before the ends of `a` and `b`,
/// scanning backwards.
#[inline]
pub fn backward_match(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Length of the leading stretch of `byte` in `data`.
#[inline]
pub fn run_length(data: &[u8], byte: u8) -> usize {
    data.iter().take_while(|&&b| b == byte).count()
}
