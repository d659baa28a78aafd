// Instruction emitter: serializes one window's ADD/COPY/RUN stream.
//
// Literal bytes are buffered so that back-to-back `add` calls become a single
// ADD, and long single-byte stretches inside them become RUN.  Each new
// instruction first tries to fold into the previous opcode as a double
// instruction; the previous opcode byte is rewritten in place, which keeps
// the operand order valid for both the three-section and interleaved
// layouts.

use super::address_cache::AddressCache;
use super::checksum::adler32;
use super::code_table::{self, InstKind, OpcodeMap};
use super::header::{FormatFlags, SourceSegment, WindowHeader, WindowIndicator};
use super::varint;
use crate::hash::rolling::run_length;

/// Shortest literal stretch worth a RUN instead of ADD bytes.
pub const MIN_RUN: usize = 8;

/// Builds one window at a time; reusable across windows.
pub struct WindowEmitter {
    format: FormatFlags,
    map: &'static OpcodeMap,
    cache: AddressCache,
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    literal: Vec<u8>,
    /// Position in `inst` of the last opcode that may still absorb a second
    /// instruction.
    last_opcode: Option<usize>,
    source_len: usize,
    target_len: usize,
}

impl WindowEmitter {
    pub fn new(format: FormatFlags) -> Self {
        Self {
            format,
            map: code_table::default_map(),
            cache: AddressCache::new(),
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            literal: Vec::new(),
            last_opcode: None,
            source_len: 0,
            target_len: 0,
        }
    }

    pub fn format(&self) -> FormatFlags {
        self.format
    }

    /// Start a window whose COPY addresses below `source_len` refer to the
    /// source segment.
    pub fn begin(&mut self, source_len: usize) {
        self.cache.reset();
        self.data.clear();
        self.inst.clear();
        self.addr.clear();
        self.literal.clear();
        self.last_opcode = None;
        self.source_len = source_len;
        self.target_len = 0;
    }

    /// Target bytes described so far, including buffered literals.
    pub fn target_len(&self) -> usize {
        self.target_len + self.literal.len()
    }

    /// Current position in the source+target address space.
    fn here(&self) -> u64 {
        (self.source_len + self.target_len) as u64
    }

    /// Encoded size of a COPY from `addr` issued at window offset `at`,
    /// under the current address cache.  Does not change any state.
    #[inline]
    pub fn copy_cost(&self, addr: u64, at: usize) -> usize {
        self.cache.cost(addr, (self.source_len + at) as u64)
    }

    pub fn add(&mut self, bytes: &[u8]) {
        self.literal.extend_from_slice(bytes);
    }

    pub fn run(&mut self, byte: u8, len: usize) {
        if len == 0 {
            return;
        }
        self.flush_literal();
        self.encode_run(byte, len);
    }

    /// COPY `len` bytes from `addr`, which must lie before the current
    /// position.
    pub fn copy(&mut self, addr: u64, len: usize) {
        if len == 0 {
            return;
        }
        self.flush_literal();
        let (mode, operand) = self.cache.encode(addr, self.here());
        self.encode_opcode(InstKind::Copy(mode), len);
        let section = if self.interleaved() {
            &mut self.inst
        } else {
            &mut self.addr
        };
        operand.write(section);
        self.target_len += len;
    }

    /// Close the window and append its header and body to `out`.
    ///
    /// `target` must be the bytes this window reconstructs; it is only read
    /// for the checksum.
    pub fn finish(&mut self, target: &[u8], out: &mut Vec<u8>) {
        self.flush_literal();
        debug_assert_eq!(self.target_len, target.len());

        let extended = !self.format.is_empty();
        let segment = (self.source_len > 0).then_some(SourceSegment {
            len: self.source_len,
            pos: 0,
        });
        let mut indicator = WindowIndicator::empty();
        if segment.is_some() {
            indicator |= WindowIndicator::SOURCE;
        }
        let header = WindowHeader {
            indicator,
            segment,
            target_len: self.target_len,
            data_len: self.data.len(),
            inst_len: self.inst.len(),
            addr_len: self.addr.len(),
            checksum: self
                .format
                .contains(FormatFlags::CHECKSUM)
                .then(|| adler32(target)),
        };

        out.reserve(header.body_len() + 32);
        header.write(extended, out);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.inst);
        out.extend_from_slice(&self.addr);
    }

    fn interleaved(&self) -> bool {
        self.format.contains(FormatFlags::INTERLEAVED)
    }

    fn flush_literal(&mut self) {
        if self.literal.is_empty() {
            return;
        }
        let literal = std::mem::take(&mut self.literal);
        let mut start = 0;
        let mut i = 0;
        while i < literal.len() {
            let run = run_length(&literal[i..], literal[i]);
            if run >= MIN_RUN {
                if start < i {
                    self.encode_add(&literal[start..i]);
                }
                self.encode_run(literal[i], run);
                start = i + run;
            }
            i += run;
        }
        if start < literal.len() {
            self.encode_add(&literal[start..]);
        }
        self.literal = literal;
        self.literal.clear();
    }

    fn encode_add(&mut self, bytes: &[u8]) {
        self.encode_opcode(InstKind::Add, bytes.len());
        let section = if self.interleaved() {
            &mut self.inst
        } else {
            &mut self.data
        };
        section.extend_from_slice(bytes);
        self.target_len += bytes.len();
    }

    fn encode_run(&mut self, byte: u8, len: usize) {
        self.encode_opcode(InstKind::Run, len);
        let section = if self.interleaved() {
            &mut self.inst
        } else {
            &mut self.data
        };
        section.push(byte);
        self.target_len += len;
    }

    fn encode_opcode(&mut self, kind: InstKind, size: usize) {
        if let Some(at) = self.last_opcode
            && let Some(double) = self.map.combine(self.inst[at], kind, size)
        {
            self.inst[at] = double;
            self.last_opcode = None;
            return;
        }

        self.last_opcode = Some(self.inst.len());
        if let Some(opcode) = self.map.implicit(kind, size) {
            self.inst.push(opcode);
        } else if let Some(opcode) = self.map.explicit(kind) {
            self.inst.push(opcode);
            varint::push(&mut self.inst, size as u64);
        } else {
            // The default table has a size-0 opcode for every kind.
            unreachable!("code table lacks an explicit-size opcode for {kind:?}");
        }
    }
}
