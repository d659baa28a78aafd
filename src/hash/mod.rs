// Block hashing and match finding.
//
// This module provides:
// - The 16-byte polynomial rolling hash and match extension helpers
// - `BlockTable`, the chained block index used for dictionary and target
// - Matcher profiles keyed by compression level
// - The greedy match finder that drives the instruction emitter

pub mod config;
pub mod matching;
pub mod rolling;
pub mod table;
