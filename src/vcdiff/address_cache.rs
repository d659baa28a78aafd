// COPY address cache (RFC 3284, Section 5.1 and 5.3).
//
// Default geometry: four NEAR slots and three SAME groups, giving nine
// address modes:
//   0      SELF   address written as is
//   1      HERE   here - address
//   2..=5  NEAR   address - near[mode - 2]
//   6..=8  SAME   one byte indexing same[(mode - 6) * 256 + byte]
//
// Encoder and decoder must apply identical updates, and both reset the
// cache at every window boundary.

use super::varint::{self, VarintError};

pub const NEAR_SLOTS: usize = 4;
pub const SAME_GROUPS: usize = 3;
pub const MODE_COUNT: usize = 2 + NEAR_SLOTS + SAME_GROUPS;

pub const MODE_SELF: u8 = 0;
pub const MODE_HERE: u8 = 1;
const FIRST_NEAR: u8 = 2;
const FIRST_SAME: u8 = FIRST_NEAR + NEAR_SLOTS as u8;
const SAME_SIZE: usize = SAME_GROUPS * 256;

/// How an address was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedAddress {
    /// SELF, HERE and NEAR modes: a varint.
    Varint(u64),
    /// SAME modes: one raw byte.
    Byte(u8),
}

impl EncodedAddress {
    /// Bytes this operand occupies in the address stream.
    pub fn len(&self) -> usize {
        match *self {
            Self::Varint(v) => varint::encoded_len(v),
            Self::Byte(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match *self {
            Self::Varint(v) => varint::push(out, v),
            Self::Byte(b) => out.push(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// The address stream ended inside the operand.
    Incomplete,
    /// The decoded address is not before `here`, or the operand is malformed.
    Invalid,
}

impl From<VarintError> for AddressError {
    fn from(e: VarintError) -> Self {
        match e {
            VarintError::Incomplete => Self::Incomplete,
            VarintError::Overflow => Self::Invalid,
        }
    }
}

#[derive(Clone)]
pub struct AddressCache {
    near: [u64; NEAR_SLOTS],
    next_near: usize,
    same: Box<[u64; SAME_SIZE]>,
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressCache {
    pub fn new() -> Self {
        Self {
            near: [0; NEAR_SLOTS],
            next_near: 0,
            same: Box::new([0; SAME_SIZE]),
        }
    }

    /// Forget every cached address (start of a window).
    pub fn reset(&mut self) {
        self.near = [0; NEAR_SLOTS];
        self.next_near = 0;
        self.same.fill(0);
    }

    /// Record `addr` as the most recent COPY address.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        self.near[self.next_near] = addr;
        self.next_near = (self.next_near + 1) % NEAR_SLOTS;
        self.same[(addr % SAME_SIZE as u64) as usize] = addr;
    }

    /// Pick the cheapest mode for `addr` without touching the cache.
    ///
    /// A SAME hit always wins since it costs one byte.  Otherwise the
    /// smallest of the SELF, HERE and NEAR values is chosen, earlier modes
    /// winning ties.
    pub fn choose(&self, addr: u64, here: u64) -> (u8, EncodedAddress) {
        debug_assert!(addr < here);
        let same_slot = (addr % SAME_SIZE as u64) as usize;
        if self.same[same_slot] == addr {
            let mode = FIRST_SAME + (same_slot / 256) as u8;
            return (mode, EncodedAddress::Byte((same_slot % 256) as u8));
        }

        let mut mode = MODE_SELF;
        let mut value = addr;
        let from_here = here - addr;
        if from_here < value {
            mode = MODE_HERE;
            value = from_here;
        }
        for (slot, &base) in self.near.iter().enumerate() {
            if let Some(delta) = addr.checked_sub(base)
                && delta < value
            {
                mode = FIRST_NEAR + slot as u8;
                value = delta;
            }
        }
        (mode, EncodedAddress::Varint(value))
    }

    /// Encoded size of `addr` at `here` under the current cache contents.
    #[inline]
    pub fn cost(&self, addr: u64, here: u64) -> usize {
        self.choose(addr, here).1.len()
    }

    /// Choose a mode for `addr` and record it.
    pub fn encode(&mut self, addr: u64, here: u64) -> (u8, EncodedAddress) {
        let chosen = self.choose(addr, here);
        self.update(addr);
        chosen
    }

    /// Decode the operand at the front of `data` for `mode`.
    ///
    /// On success the cache is updated and the address plus consumed byte
    /// count are returned.  On error the cache is unchanged.
    pub fn decode(&mut self, mode: u8, data: &[u8], here: u64) -> Result<(u64, usize), AddressError> {
        let (addr, used) = if mode >= FIRST_SAME {
            let group = (mode - FIRST_SAME) as usize;
            if group >= SAME_GROUPS {
                return Err(AddressError::Invalid);
            }
            let &byte = data.first().ok_or(AddressError::Incomplete)?;
            (self.same[group * 256 + byte as usize], 1)
        } else {
            let (raw, used) = varint::read_bounded(data, varint::MAX_SIZE)?;
            let addr = match mode {
                MODE_SELF => Some(raw),
                MODE_HERE => here.checked_sub(raw),
                near => self.near[(near - FIRST_NEAR) as usize].checked_add(raw),
            };
            (addr.ok_or(AddressError::Invalid)?, used)
        };

        if addr >= here {
            return Err(AddressError::Invalid);
        }
        self.update(addr);
        Ok((addr, used))
    }
}
