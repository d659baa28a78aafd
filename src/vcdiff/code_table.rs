// VCDIFF default instruction code table (RFC 3284, Section 5.6).
//
// The decoder indexes the table by opcode.  The encoder needs the inverse:
// `OpcodeMap` answers "which opcode encodes this instruction" and "which
// opcode encodes the previous opcode's instruction followed by this one".

use std::collections::HashMap;
use std::sync::LazyLock;

use super::address_cache::{MODE_COUNT, NEAR_SLOTS};

/// Smallest COPY size with a dedicated opcode.
const MIN_COPY: u8 = 4;

/// Instruction kind stored in a code table half-entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InstKind {
    #[default]
    Noop,
    Add,
    Run,
    /// COPY with the given address mode.
    Copy(u8),
}

impl InstKind {
    fn slot(self) -> usize {
        match self {
            Self::Noop => 0,
            Self::Add => 1,
            Self::Run => 2,
            Self::Copy(mode) => 3 + mode as usize,
        }
    }
}

/// Number of distinct `InstKind` values in the default table.
const KIND_SLOTS: usize = 3 + MODE_COUNT;

/// One opcode: up to two instructions.  A size of zero means the size
/// follows the opcode as a varint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeEntry {
    pub inst1: InstKind,
    pub size1: u8,
    pub inst2: InstKind,
    pub size2: u8,
}

impl CodeEntry {
    const fn single(inst1: InstKind, size1: u8) -> Self {
        Self {
            inst1,
            size1,
            inst2: InstKind::Noop,
            size2: 0,
        }
    }
}

/// The 256-entry table.
pub type CodeTable = [CodeEntry; 256];

/// Build the RFC 3284 default table.
pub fn build_default() -> CodeTable {
    let mut entries = Vec::with_capacity(256);

    entries.push(CodeEntry::single(InstKind::Run, 0));
    entries.extend((0..=17).map(|size| CodeEntry::single(InstKind::Add, size)));

    for mode in 0..MODE_COUNT as u8 {
        entries.push(CodeEntry::single(InstKind::Copy(mode), 0));
        entries.extend((MIN_COPY..=18).map(|size| CodeEntry::single(InstKind::Copy(mode), size)));
    }

    // ADD(1..4) + COPY: sizes 4..6 for SELF/HERE/NEAR, size 4 for SAME.
    for mode in 0..MODE_COUNT as u8 {
        let max_copy = if (mode as usize) < 2 + NEAR_SLOTS { 6 } else { 4 };
        for add_size in 1..=4 {
            for copy_size in MIN_COPY..=max_copy {
                entries.push(CodeEntry {
                    inst1: InstKind::Add,
                    size1: add_size,
                    inst2: InstKind::Copy(mode),
                    size2: copy_size,
                });
            }
        }
    }

    // COPY(4) + ADD(1) for every mode.
    for mode in 0..MODE_COUNT as u8 {
        entries.push(CodeEntry {
            inst1: InstKind::Copy(mode),
            size1: MIN_COPY,
            inst2: InstKind::Add,
            size2: 1,
        });
    }

    let mut table = [CodeEntry::default(); 256];
    debug_assert_eq!(entries.len(), table.len());
    for (slot, entry) in table.iter_mut().zip(entries) {
        *slot = entry;
    }
    table
}

/// Shared default table.
pub fn default_table() -> &'static CodeTable {
    static TABLE: LazyLock<CodeTable> = LazyLock::new(build_default);
    &TABLE
}

// ---------------------------------------------------------------------------
// Encoder-side opcode lookup
// ---------------------------------------------------------------------------

/// Inverse of a code table.
pub struct OpcodeMap {
    /// `[kind][size]` -> single-instruction opcode with that implicit size.
    single: Vec<[Option<u8>; 256]>,
    /// `[kind]` -> opcode whose size is written explicitly.
    explicit: [Option<u8>; KIND_SLOTS],
    /// `(first opcode, kind, size)` -> double opcode.
    combined: HashMap<(u8, InstKind, u8), u8>,
}

impl OpcodeMap {
    pub fn new(table: &CodeTable) -> Self {
        let mut single = vec![[None; 256]; KIND_SLOTS];
        let mut explicit = [None; KIND_SLOTS];
        let mut by_first_half: HashMap<(InstKind, u8), u8> = HashMap::new();

        for (opcode, entry) in table.iter().enumerate() {
            let opcode = opcode as u8;
            if entry.inst1 == InstKind::Noop || entry.inst2 != InstKind::Noop {
                continue;
            }
            let kind = entry.inst1.slot();
            if entry.size1 == 0 {
                explicit[kind].get_or_insert(opcode);
            } else {
                single[kind][entry.size1 as usize].get_or_insert(opcode);
                by_first_half.entry((entry.inst1, entry.size1)).or_insert(opcode);
            }
        }

        let mut combined = HashMap::new();
        for (opcode, entry) in table.iter().enumerate() {
            if entry.inst1 == InstKind::Noop || entry.inst2 == InstKind::Noop {
                continue;
            }
            if let Some(&first) = by_first_half.get(&(entry.inst1, entry.size1)) {
                combined
                    .entry((first, entry.inst2, entry.size2))
                    .or_insert(opcode as u8);
            }
        }

        Self {
            single,
            explicit,
            combined,
        }
    }

    /// Opcode for `kind` with an implicit `size`, if the table has one.
    pub fn implicit(&self, kind: InstKind, size: usize) -> Option<u8> {
        let size = u8::try_from(size).ok()?;
        self.single.get(kind.slot())?[size as usize]
    }

    /// Opcode for `kind` whose size follows as a varint.
    pub fn explicit(&self, kind: InstKind) -> Option<u8> {
        self.explicit.get(kind.slot()).copied().flatten()
    }

    /// Double opcode that encodes `first` followed by `kind` of `size`.
    pub fn combine(&self, first: u8, kind: InstKind, size: usize) -> Option<u8> {
        let size = u8::try_from(size).ok()?;
        self.combined.get(&(first, kind, size)).copied()
    }
}

/// Shared map for the default table.
pub fn default_map() -> &'static OpcodeMap {
    static MAP: LazyLock<OpcodeMap> = LazyLock::new(|| OpcodeMap::new(default_table()));
    &MAP
}

// ---------------------------------------------------------------------------
// Decoded instruction (inspection)
// ---------------------------------------------------------------------------

/// A fully resolved instruction, as reported by the inspection iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Append `len` literal bytes.
    Add { len: usize },
    /// Append `byte` repeated `len` times.
    Run { len: usize, byte: u8 },
    /// Append `len` bytes starting at `addr` in the source+target address space.
    Copy { len: usize, addr: u64, mode: u8 },
}

impl Instruction {
    pub fn len(&self) -> usize {
        match *self {
            Self::Add { len } | Self::Run { len, .. } | Self::Copy { len, .. } => len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
