// Window body execution.
//
// A window body is three sections (data, instructions, addresses) or, in an
// interleaved window, one instruction section with every operand inline.
// Each opcode carries one or two half-instructions.  A half-instruction is
// atomic: its size, literal bytes and address are either all available and
// consumed together, or nothing is consumed.  That lets the streaming
// decoder run an interleaved window over a partial body and resume from the
// next chunk, possibly between the two halves of a double opcode.

use super::address_cache::{AddressCache, AddressError};
use super::checksum::adler32;
use super::code_table::{self, CodeTable, InstKind, Instruction};
use super::header::{FileHeader, Parsed, WindowHeader};
use super::varint::{self, VarintError};
use crate::error::{Error, Result};

/// Sections of a window body, or the available prefix of an interleaved one.
#[derive(Debug, Clone, Copy)]
pub struct Body<'a> {
    pub data: &'a [u8],
    pub inst: &'a [u8],
    pub addr: &'a [u8],
    pub interleaved: bool,
}

impl<'a> Body<'a> {
    /// Split a complete body according to its header.
    pub fn split(header: &WindowHeader, body: &'a [u8], extended: bool) -> Self {
        let (data, rest) = body.split_at(header.data_len);
        let (inst, rest) = rest.split_at(header.inst_len);
        let addr = &rest[..header.addr_len];
        Self {
            data,
            inst,
            addr,
            interleaved: header.is_interleaved(extended),
        }
    }

    /// Interleaved body prefix.
    pub fn interleaved(inst: &'a [u8]) -> Self {
        Self {
            data: &[],
            inst,
            addr: &[],
            interleaved: true,
        }
    }
}

/// Read positions within a [`Body`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursors {
    pub data: usize,
    pub inst: usize,
    pub addr: usize,
}

enum Step {
    /// Operand bytes not yet available.
    Incomplete,
    Corrupt(String),
}

impl From<VarintError> for Step {
    fn from(e: VarintError) -> Self {
        match e {
            VarintError::Incomplete => Step::Incomplete,
            VarintError::Overflow => Step::Corrupt("instruction size out of range".into()),
        }
    }
}

/// A decoded half-instruction with its operands resolved.
enum Op<'a> {
    Add(&'a [u8]),
    Run(u8, usize),
    Copy { addr: u64, len: usize, mode: u8 },
}

impl Op<'_> {
    fn len(&self) -> usize {
        match *self {
            Op::Add(bytes) => bytes.len(),
            Op::Run(_, len) | Op::Copy { len, .. } => len,
        }
    }

    fn instruction(&self) -> Instruction {
        match *self {
            Op::Add(bytes) => Instruction::Add { len: bytes.len() },
            Op::Run(byte, len) => Instruction::Run { len, byte },
            Op::Copy { addr, len, mode } => Instruction::Copy { len, addr, mode },
        }
    }
}

/// Instruction-stream state shared by execution and inspection.
struct Parser {
    table: &'static CodeTable,
    cache: AddressCache,
    source_len: usize,
    target_len: usize,
    produced: usize,
    /// Second half of a double opcode whose first half is done.
    pending: Option<(InstKind, u8)>,
}

impl Parser {
    fn new(source_len: usize, target_len: usize) -> Self {
        Self {
            table: code_table::default_table(),
            cache: AddressCache::new(),
            source_len,
            target_len,
            produced: 0,
            pending: None,
        }
    }

    /// Decode the next half-instruction, advancing `cur` only on success.
    ///
    /// Returns `Ok(None)` once the instruction section is exhausted.
    fn next<'a>(&mut self, body: &Body<'a>, cur: &mut Cursors) -> Result<Option<Op<'a>>, Step> {
        loop {
            if let Some((kind, size)) = self.pending {
                let mut tentative = *cur;
                let op = self.half(body, &mut tentative, kind, size)?;
                self.pending = None;
                *cur = tentative;
                return Ok(Some(op));
            }

            let Some(&opcode) = body.inst.get(cur.inst) else {
                return Ok(None);
            };
            let entry = self.table[opcode as usize];
            let mut tentative = *cur;
            tentative.inst += 1;
            if entry.inst1 == InstKind::Noop {
                *cur = tentative;
                if entry.inst2 != InstKind::Noop {
                    self.pending = Some((entry.inst2, entry.size2));
                }
                continue;
            }
            let op = self.half(body, &mut tentative, entry.inst1, entry.size1)?;
            *cur = tentative;
            if entry.inst2 != InstKind::Noop {
                self.pending = Some((entry.inst2, entry.size2));
            }
            return Ok(Some(op));
        }
    }

    fn half<'a>(&mut self, body: &Body<'a>, cur: &mut Cursors, kind: InstKind, size: u8) -> Result<Op<'a>, Step> {
        let len = if size == 0 {
            let (len, used) = varint::read_size(&body.inst[cur.inst..])?;
            cur.inst += used;
            len
        } else {
            usize::from(size)
        };
        if len > self.target_len - self.produced {
            return Err(Step::Corrupt(format!(
                "instruction of {len} bytes overruns target window of {} bytes",
                self.target_len
            )));
        }

        let op = match kind {
            InstKind::Noop => return Err(Step::Corrupt("NOOP with operands".into())),
            InstKind::Add => Op::Add(take_data(body, cur, len)?),
            InstKind::Run => Op::Run(take_data(body, cur, 1)?[0], len),
            InstKind::Copy(mode) => {
                let here = (self.source_len + self.produced) as u64;
                let (section, pos) = if body.interleaved {
                    (body.inst, &mut cur.inst)
                } else {
                    (body.addr, &mut cur.addr)
                };
                match self.cache.decode(mode, &section[*pos..], here) {
                    Ok((addr, used)) => {
                        *pos += used;
                        Op::Copy { addr, len, mode }
                    }
                    Err(AddressError::Incomplete) => return Err(Step::Incomplete),
                    Err(AddressError::Invalid) => {
                        return Err(Step::Corrupt(format!(
                            "COPY address out of range at target offset {}",
                            self.produced
                        )));
                    }
                }
            }
        };
        self.produced += len;
        Ok(op)
    }
}

fn take_data<'a>(body: &Body<'a>, cur: &mut Cursors, n: usize) -> Result<&'a [u8], Step> {
    let (section, pos) = if body.interleaved {
        (body.inst, &mut cur.inst)
    } else {
        (body.data, &mut cur.data)
    };
    let bytes = section.get(*pos..*pos + n).ok_or(Step::Incomplete)?;
    *pos += n;
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Where COPY addresses below the segment length read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    None,
    /// `dictionary[start..start + len]`.
    Dictionary { start: usize, len: usize },
    /// `out[start..start + len]`: bytes decoded by earlier windows.
    Target { start: usize, len: usize },
}

/// Buffers a window writes into.
pub struct Output<'a> {
    pub dictionary: &'a [u8],
    /// Retained decoded bytes; the current window's bytes start at
    /// `window_start`.
    pub out: &'a mut Vec<u8>,
    pub window_start: usize,
}

/// Outcome of [`WindowExecutor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Every instruction ran.
    Done,
    /// Stopped before an instruction whose operands are not available.
    NeedMore,
}

/// Resumable interpreter for one window.
pub struct WindowExecutor {
    parser: Parser,
    segment: Segment,
    checksum: Option<u32>,
}

impl WindowExecutor {
    pub fn new(header: &WindowHeader, segment: Segment) -> Self {
        Self {
            parser: Parser::new(header.source_len(), header.target_len),
            segment,
            checksum: header.checksum,
        }
    }

    /// Target bytes this window has produced so far.
    pub fn produced(&self) -> usize {
        self.parser.produced
    }

    /// Run as many instructions of `body` as possible, appending their output.
    ///
    /// `cur` is advanced past everything consumed.
    pub fn run(&mut self, body: &Body<'_>, cur: &mut Cursors, output: &mut Output<'_>) -> Result<Progress> {
        loop {
            match self.parser.next(body, cur) {
                Ok(Some(op)) => self.apply(&op, output),
                Ok(None) => return Ok(Progress::Done),
                Err(Step::Incomplete) => return Ok(Progress::NeedMore),
                Err(Step::Corrupt(msg)) => return Err(Error::CorruptDelta(msg)),
            }
        }
    }

    /// Check the finished window against its header.
    pub fn finish(&self, body: &Body<'_>, cur: &Cursors, output: &Output<'_>, verify_checksum: bool) -> Result<()> {
        if self.parser.pending.is_some() {
            return Err(Error::CorruptDelta(
                "instruction section ends inside a double opcode".into(),
            ));
        }
        if self.parser.produced != self.parser.target_len {
            return Err(Error::CorruptDelta(format!(
                "window decoded to {} bytes, header declares {}",
                self.parser.produced, self.parser.target_len
            )));
        }
        if !body.interleaved && (cur.data != body.data.len() || cur.addr != body.addr.len()) {
            return Err(Error::CorruptDelta("unused bytes in data or address section".into()));
        }
        if let Some(expected) = self.checksum
            && verify_checksum
        {
            let actual = adler32(&output.out[output.window_start..]);
            if actual != expected {
                return Err(Error::CorruptDelta(format!(
                    "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, op: &Op<'_>, output: &mut Output<'_>) {
        let out = &mut *output.out;
        match *op {
            Op::Add(bytes) => out.extend_from_slice(bytes),
            Op::Run(byte, len) => out.resize(out.len() + len, byte),
            Op::Copy { addr, len, .. } => {
                // The address cache already checked `addr < here`.
                let mut addr = addr as usize;
                let mut len = len;
                let source_len = self.parser.source_len;
                if addr < source_len {
                    let n = len.min(source_len - addr);
                    match self.segment {
                        Segment::Dictionary { start, .. } => {
                            out.extend_from_slice(&output.dictionary[start + addr..start + addr + n]);
                        }
                        Segment::Target { start, .. } => {
                            out.extend_from_within(start + addr..start + addr + n);
                        }
                        Segment::None => {}
                    }
                    addr += n;
                    len -= n;
                }
                if len == 0 {
                    return;
                }
                // Target-relative copies may overlap the bytes they produce.
                let mut from = output.window_start + (addr - source_len);
                while len > 0 {
                    let n = len.min(out.len() - from);
                    out.extend_from_within(from..from + n);
                    from += n;
                    len -= n;
                }
            }
        }
        debug_assert!(op.len() <= out.len());
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Iterator over the instructions of a complete window body.
pub struct InstructionIter<'a> {
    body: Body<'a>,
    cur: Cursors,
    parser: Parser,
    failed: bool,
}

impl<'a> InstructionIter<'a> {
    pub fn new(header: &WindowHeader, body: &'a [u8], extended: bool) -> Self {
        Self {
            body: Body::split(header, body, extended),
            cur: Cursors::default(),
            parser: Parser::new(header.source_len(), header.target_len),
            failed: false,
        }
    }
}

impl Iterator for InstructionIter<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.parser.next(&self.body, &mut self.cur) {
            Ok(Some(op)) => return Some(Ok(op.instruction())),
            Ok(None) => return None,
            Err(Step::Incomplete) => Error::CorruptDelta("operand runs past end of section".into()),
            Err(Step::Corrupt(msg)) => Error::CorruptDelta(msg),
        };
        self.failed = true;
        Some(Err(result))
    }
}

/// One window of a complete delta, borrowed from the delta bytes.
#[derive(Debug, Clone)]
pub struct RawWindow<'a> {
    /// Offset of the window header within the delta.
    pub offset: usize,
    pub header: WindowHeader,
    pub body: &'a [u8],
}

/// Iterator over the windows of a complete, in-memory delta.
pub struct WindowIter<'a> {
    delta: &'a [u8],
    pos: usize,
    extended: bool,
    failed: bool,
}

impl<'a> WindowIter<'a> {
    /// Parse the file header of `delta` and iterate its windows.
    pub fn new(delta: &'a [u8]) -> Result<(FileHeader, Self)> {
        match FileHeader::parse(delta)? {
            Parsed::Done(header, used) => {
                let extended = header.is_extended();
                Ok((
                    header,
                    Self {
                        delta,
                        pos: used,
                        extended,
                        failed: false,
                    },
                ))
            }
            Parsed::Incomplete => Err(Error::TruncatedInput("file header".into())),
        }
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl<'a> Iterator for WindowIter<'a> {
    type Item = Result<RawWindow<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.delta.len() {
            return None;
        }
        let rest = &self.delta[self.pos..];
        let item = match WindowHeader::parse(rest, self.extended) {
            Ok(Parsed::Done(header, used)) => match rest.get(used..used + header.body_len()) {
                Some(body) => {
                    let window = RawWindow {
                        offset: self.pos,
                        header,
                        body,
                    };
                    self.pos += used + window.body.len();
                    return Some(Ok(window));
                }
                None => Error::TruncatedInput(format!("window body at offset {}", self.pos)),
            },
            Ok(Parsed::Incomplete) => Error::TruncatedInput(format!("window header at offset {}", self.pos)),
            Err(e) => e.into(),
        };
        self.failed = true;
        Some(Err(item))
    }
}
