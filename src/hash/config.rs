// Matcher profiles.
//
// A profile trades encode speed for delta size by bounding how many chain
// candidates are examined per probe and how short a COPY may be.

use super::rolling::BLOCK_SIZE;

/// Default target window size (8 MiB).
pub const DEFAULT_WINDOW_SIZE: usize = 1 << 23;

/// Largest accepted target window size (16 MiB).
pub const MAX_WINDOW_SIZE: usize = crate::vcdiff::header::HARD_MAX_WINDOW;

/// Default compression level.
pub const DEFAULT_LEVEL: u32 = 6;

/// Matcher profile configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatcherConfig {
    /// Name for display purposes.
    pub name: &'static str,
    /// Matching candidates examined per probe position.
    pub max_probes: usize,
    /// Shortest match emitted as COPY; anything shorter stays literal.
    pub min_match: usize,
}

/// Map a compression level to a profile.
///
/// - Levels 0-1: fastest
/// - Levels 2-4: fast
/// - Levels 5-6: default
/// - Levels 7-9: thorough
pub fn config_for_level(level: u32) -> MatcherConfig {
    match level {
        0 | 1 => FASTEST,
        2..=4 => FAST,
        5 | 6 => DEFAULT,
        _ => THOROUGH,
    }
}

pub const FASTEST: MatcherConfig = MatcherConfig {
    name: "fastest",
    max_probes: 4,
    min_match: 64,
};

pub const FAST: MatcherConfig = MatcherConfig {
    name: "fast",
    max_probes: 16,
    min_match: 48,
};

pub const DEFAULT: MatcherConfig = MatcherConfig {
    name: "default",
    max_probes: 64,
    min_match: 32,
};

pub const THOROUGH: MatcherConfig = MatcherConfig {
    name: "thorough",
    max_probes: 256,
    min_match: 24,
};

pub const ALL_PROFILES: [MatcherConfig; 4] = [FASTEST, FAST, DEFAULT, THOROUGH];
