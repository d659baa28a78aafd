// Block hash table.
//
// Indexes the 16-byte blocks that start at multiples of BLOCK_SIZE in a
// buffer.  Layout:
//   - `buckets[hash & mask]` = first block number with that bucket, or EMPTY
//   - `next_block[b]`        = next block in the same bucket, or EMPTY
//   - `last_block[first]`    = tail of the chain headed by `first`
// Chains are kept in insertion order, so lookups see older blocks first.
//
// One table indexes the dictionary once; a second, reused per window,
// indexes the target bytes already behind the match cursor.

use super::rolling::{BLOCK_SIZE, block_hash};

const EMPTY: u32 = u32::MAX;

/// Bucket count ceiling: the hash itself only has 23 bits.
const MAX_BUCKETS: usize = 1 << 23;

/// Colliding blocks a single lookup will walk past before giving up.
const MAX_COLLISIONS: usize = 64;

pub struct BlockTable {
    buckets: Vec<u32>,
    next_block: Vec<u32>,
    last_block: Vec<u32>,
    mask: u32,
    /// Blocks `0..indexed` are in the table.
    indexed: usize,
}

impl BlockTable {
    /// Empty table able to index a buffer of `len` bytes.
    ///
    /// Returns `None` if the block count does not fit the 32-bit block
    /// numbers.
    pub fn new(len: usize) -> Option<Self> {
        let mut table = Self::empty();
        table.reset(len)?;
        Some(table)
    }

    /// Table with no blocks and a single bucket.
    pub fn empty() -> Self {
        Self {
            buckets: vec![EMPTY],
            next_block: Vec::new(),
            last_block: Vec::new(),
            mask: 0,
            indexed: 0,
        }
    }

    /// Drop every entry and resize for a buffer of `len` bytes, reusing
    /// allocations.
    pub fn reset(&mut self, len: usize) -> Option<()> {
        let blocks = len / BLOCK_SIZE;
        if blocks >= EMPTY as usize {
            return None;
        }
        let bucket_count = blocks.max(1).next_power_of_two().min(MAX_BUCKETS);
        self.buckets.clear();
        self.buckets.resize(bucket_count, EMPTY);
        self.next_block.clear();
        self.next_block.resize(blocks, EMPTY);
        self.last_block.clear();
        self.last_block.resize(blocks, EMPTY);
        self.mask = (bucket_count - 1) as u32;
        self.indexed = 0;
        Some(())
    }

    /// Number of blocks currently indexed.
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    /// Bucket count.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn bucket(&self, hash: u32) -> usize {
        (hash & self.mask) as usize
    }

    fn add_block(&mut self, data: &[u8], block: usize) {
        let start = block * BLOCK_SIZE;
        let bucket = self.bucket(block_hash(&data[start..]));
        let number = block as u32;
        let head = self.buckets[bucket];
        if head == EMPTY {
            self.buckets[bucket] = number;
            self.last_block[block] = number;
        } else {
            let tail = self.last_block[head as usize] as usize;
            self.next_block[tail] = number;
            self.last_block[head as usize] = number;
        }
    }

    /// Index every block of `data`.
    pub fn add_all_blocks(&mut self, data: &[u8]) {
        self.add_through(data, data.len());
    }

    /// Index every not-yet-indexed block that starts before `end`.
    pub fn add_through(&mut self, data: &[u8], end: usize) {
        let limit = end.div_ceil(BLOCK_SIZE).min(self.next_block.len());
        while self.indexed < limit {
            self.add_block(data, self.indexed);
            self.indexed += 1;
        }
    }

    /// Start offsets of indexed blocks in `data` whose bytes equal the
    /// first BLOCK_SIZE bytes of `probe`, oldest first.
    ///
    /// `hash` must be `block_hash(probe)`.
    pub fn candidates<'a>(&'a self, data: &'a [u8], probe: &'a [u8], hash: u32) -> Candidates<'a> {
        Candidates {
            table: self,
            data,
            probe: &probe[..BLOCK_SIZE],
            next: self.buckets[self.bucket(hash)],
        }
    }
}

/// Iterator over matching blocks in one bucket chain.
pub struct Candidates<'a> {
    table: &'a BlockTable,
    data: &'a [u8],
    probe: &'a [u8],
    next: u32,
}

impl Iterator for Candidates<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let mut skipped = 0;
        while self.next != EMPTY && skipped <= MAX_COLLISIONS {
            let block = self.next as usize;
            self.next = self.table.next_block[block];
            let start = block * BLOCK_SIZE;
            if self.data[start..start + BLOCK_SIZE] == *self.probe {
                return Some(start);
            }
            skipped += 1;
        }
        self.next = EMPTY;
        None
    }
}
