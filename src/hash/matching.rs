// Match finder.
//
// Greedy block matching over one target window:
//   1. Hash the 16-byte block at the cursor.
//   2. Probe the dictionary table, then (optionally) the table of target
//      blocks already behind the cursor.
//   3. Extend each candidate backward into pending literal bytes and
//      forward as far as the bytes agree.
//   4. Keep the longest; on equal length keep the cheaper COPY address.
//   5. Emit the match if it reaches `min_match`, otherwise roll one byte.
//
// Target candidates live in the same address space as the window: a COPY
// from target offset `t` is written as address `dictionary_len + t`.

use super::config::MatcherConfig;
use super::rolling::{BLOCK_SIZE, backward_match, block_hash, forward_match, roll};
use super::table::BlockTable;
use crate::vcdiff::emitter::WindowEmitter;

/// Which buffer a match copies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Dictionary,
    /// Earlier bytes of the current target window.
    Target,
}

/// A match found by the finder, after extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub source: MatchSource,
    /// Start offset inside the source buffer.
    pub offset: usize,
    /// Window offset where the copied bytes land; may precede the probe
    /// position after backward extension.
    pub target_pos: usize,
    pub length: usize,
}

impl Match {
    /// COPY address in the dictionary+target address space.
    #[inline]
    pub fn address(&self, dictionary_len: usize) -> u64 {
        match self.source {
            MatchSource::Dictionary => self.offset as u64,
            MatchSource::Target => (dictionary_len + self.offset) as u64,
        }
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.target_pos + self.length
    }
}

/// The dictionary side of matching: bytes plus their block index.
#[derive(Clone, Copy)]
pub struct IndexedSource<'a> {
    pub bytes: &'a [u8],
    pub table: &'a BlockTable,
}

pub struct MatchFinder {
    config: MatcherConfig,
    target_matches: bool,
    /// Blocks of the current window behind the cursor.
    target_table: BlockTable,
    /// `target_table` describes the window being encoded.
    target_active: bool,
}

impl MatchFinder {
    pub fn new(config: MatcherConfig, target_matches: bool) -> Self {
        Self {
            config,
            target_matches,
            target_table: BlockTable::empty(),
            target_active: false,
        }
    }

    /// Best match for the block at `pos`, or `None` if no candidate reaches
    /// `min_match`.
    ///
    /// `hash` is `block_hash(&window[pos..])`.  Backward extension never
    /// reaches below `literal_start`, the first window byte not yet handed to
    /// the emitter.
    pub fn find_best_match(
        &self,
        dict: IndexedSource<'_>,
        window: &[u8],
        pos: usize,
        hash: u32,
        literal_start: usize,
        emitter: &WindowEmitter,
    ) -> Option<Match> {
        let probe = &window[pos..];
        let mut best: Option<(Match, usize)> = None;

        let mut consider = |candidate: Match| {
            let cost = emitter.copy_cost(candidate.address(dict.bytes.len()), candidate.target_pos);
            let better = match &best {
                None => true,
                Some((current, current_cost)) => {
                    candidate.length > current.length
                        || (candidate.length == current.length && cost < *current_cost)
                }
            };
            if better {
                best = Some((candidate, cost));
            }
        };

        for start in dict
            .table
            .candidates(dict.bytes, probe, hash)
            .take(self.config.max_probes)
        {
            consider(extend(
                MatchSource::Dictionary,
                dict.bytes,
                start,
                window,
                pos,
                literal_start,
            ));
        }

        if self.target_active {
            for start in self
                .target_table
                .candidates(window, probe, hash)
                .take(self.config.max_probes)
            {
                consider(extend(MatchSource::Target, window, start, window, pos, literal_start));
            }
        }

        best.map(|(m, _)| m)
            .filter(|m| m.length >= self.config.min_match)
    }

    /// Describe `window` to `emitter` as ADD/COPY instructions.
    ///
    /// The emitter must already be positioned at the start of the window.
    /// Returns the number of COPY instructions issued.
    pub fn encode_window(
        &mut self,
        dict: IndexedSource<'_>,
        window: &[u8],
        emitter: &mut WindowEmitter,
    ) -> usize {
        if window.len() < BLOCK_SIZE {
            emitter.add(window);
            return 0;
        }
        self.target_active =
            self.target_matches && self.target_table.reset(window.len()).is_some();

        let mut copies = 0;
        let mut literal_start = 0;
        let mut pos = 0;
        let mut hash = block_hash(window);
        loop {
            if let Some(m) = self.find_best_match(dict, window, pos, hash, literal_start, emitter) {
                log::trace!(
                    "match {:?} offset={} at={} len={}",
                    m.source,
                    m.offset,
                    m.target_pos,
                    m.length
                );
                emitter.add(&window[literal_start..m.target_pos]);
                emitter.copy(m.address(dict.bytes.len()), m.length);
                copies += 1;
                literal_start = m.end();
                pos = m.end();
                if self.target_active {
                    self.target_table.add_through(window, pos);
                }
                if pos + BLOCK_SIZE > window.len() {
                    break;
                }
                hash = block_hash(&window[pos..]);
            } else {
                if self.target_active {
                    self.target_table.add_through(window, pos + 1);
                }
                if pos + BLOCK_SIZE >= window.len() {
                    break;
                }
                hash = roll(hash, window[pos], window[pos + BLOCK_SIZE]);
                pos += 1;
            }
        }
        emitter.add(&window[literal_start..]);
        self.target_active = false;
        copies
    }
}

/// Grow a verified 16-byte candidate at `source[start..]` / `window[pos..]`
/// in both directions.
fn extend(
    kind: MatchSource,
    source: &[u8],
    start: usize,
    window: &[u8],
    pos: usize,
    literal_start: usize,
) -> Match {
    let back_limit = start.min(pos - literal_start);
    let back = backward_match(&source[start - back_limit..start], &window[pos - back_limit..pos]);
    let forward = forward_match(&source[start..], &window[pos..]);
    Match {
        source: kind,
        offset: start - back,
        target_pos: pos - back,
        length: back + forward,
    }
}
