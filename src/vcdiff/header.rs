// VCDIFF file header and per-window header (RFC 3284, Section 4).
//
// Parsing is incremental: every parser takes the bytes available so far and
// either reports `Parsed::Incomplete` (nothing consumed) or returns the
// header and how many bytes it used.  Malformed input is reported as soon as
// the offending byte arrives.

use bitflags::bitflags;
use thiserror::Error;

use super::varint::{self, VarintError};

pub const MAGIC: [u8; 3] = [0xD6, 0xC3, 0xC4];

/// RFC 3284 version byte.
pub const VERSION_STANDARD: u8 = 0x00;

/// Extended format (open-vcdiff "SDCH" format): interleaved sections and
/// varint checksums.
pub const VERSION_EXTENDED: u8 = b'S';

/// Largest target window the encoder will produce.
pub const HARD_MAX_WINDOW: usize = 1 << 24;

bitflags! {
    /// `Hdr_Indicator` byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderIndicator: u8 {
        const DECOMPRESS = 0x01;
        const CODETABLE = 0x02;
        const APPHEADER = 0x04;
    }

    /// `Win_Indicator` byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WindowIndicator: u8 {
        const SOURCE = 0x01;
        const TARGET = 0x02;
        const CHECKSUM = 0x04;
    }

    /// Encoder output format extensions.
    ///
    /// The empty set produces plain RFC 3284 output; any flag switches the
    /// stream to the extended version byte.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct FormatFlags: u8 {
        /// Instructions, sizes, literal data and addresses share one section.
        const INTERLEAVED = 0x01;
        /// Each window carries an Adler-32 of its target bytes.
        const CHECKSUM = 0x02;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("not a VCDIFF stream (bad magic)")]
    BadMagic,
    #[error("unsupported VCDIFF version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    #[error("invalid indicator byte {0:#04x}")]
    InvalidIndicator(u8),
    #[error("malformed header: {0}")]
    Malformed(&'static str),
}

/// Outcome of an incremental parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Incomplete,
    Done(T, usize),
}

enum Step {
    Incomplete,
    Fail(HeaderError),
}

impl From<HeaderError> for Step {
    fn from(e: HeaderError) -> Self {
        Step::Fail(e)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, Step> {
        let &b = self.data.get(self.pos).ok_or(Step::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Step> {
        let end = self.pos.checked_add(n).ok_or(Step::Incomplete)?;
        let bytes = self.data.get(self.pos..end).ok_or(Step::Incomplete)?;
        self.pos = end;
        Ok(bytes)
    }

    fn varint(&mut self, limit: u64, what: &'static str) -> Result<u64, Step> {
        match varint::read_bounded(&self.data[self.pos..], limit) {
            Ok((v, used)) => {
                self.pos += used;
                Ok(v)
            }
            Err(VarintError::Incomplete) => Err(Step::Incomplete),
            Err(VarintError::Overflow) => Err(HeaderError::Malformed(what).into()),
        }
    }

    fn size(&mut self, what: &'static str) -> Result<usize, Step> {
        // MAX_SIZE fits in usize on every supported target.
        Ok(self.varint(varint::MAX_SIZE, what)? as usize)
    }
}

fn finish<T>(result: Result<T, Step>, used: usize) -> Result<Parsed<T>, HeaderError> {
    match result {
        Ok(value) => Ok(Parsed::Done(value, used)),
        Err(Step::Incomplete) => Ok(Parsed::Incomplete),
        Err(Step::Fail(e)) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u8,
    pub indicator: HeaderIndicator,
    /// Application data (xdelta3 stores file names here); skipped on decode.
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    /// Header for a stream written with `format`.
    pub fn for_format(format: FormatFlags) -> Self {
        Self {
            version: if format.is_empty() {
                VERSION_STANDARD
            } else {
                VERSION_EXTENDED
            },
            indicator: HeaderIndicator::empty(),
            app_header: None,
        }
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        self.version == VERSION_EXTENDED
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        let mut indicator = self.indicator - HeaderIndicator::APPHEADER;
        if self.app_header.is_some() {
            indicator |= HeaderIndicator::APPHEADER;
        }
        out.push(indicator.bits());
        if let Some(app) = &self.app_header {
            varint::push(out, app.len() as u64);
            out.extend_from_slice(app);
        }
    }

    pub fn parse(data: &[u8]) -> Result<Parsed<Self>, HeaderError> {
        let mut cur = Cursor::new(data);
        let result = Self::parse_inner(&mut cur);
        finish(result, cur.pos)
    }

    fn parse_inner(cur: &mut Cursor<'_>) -> Result<Self, Step> {
        for expected in MAGIC {
            if cur.byte()? != expected {
                return Err(HeaderError::BadMagic.into());
            }
        }
        let version = cur.byte()?;
        if version != VERSION_STANDARD && version != VERSION_EXTENDED {
            return Err(HeaderError::UnsupportedVersion(version).into());
        }
        let raw = cur.byte()?;
        let indicator =
            HeaderIndicator::from_bits(raw).ok_or(HeaderError::InvalidIndicator(raw))?;
        if indicator.contains(HeaderIndicator::DECOMPRESS) {
            return Err(HeaderError::Unsupported("secondary compression").into());
        }
        if indicator.contains(HeaderIndicator::CODETABLE) {
            return Err(HeaderError::Unsupported("custom code table").into());
        }
        let app_header = if indicator.contains(HeaderIndicator::APPHEADER) {
            let len = cur.size("application header length")?;
            Some(cur.take(len)?.to_vec())
        } else {
            None
        };
        Ok(Self {
            version,
            indicator,
            app_header,
        })
    }
}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

/// Where a window's COPY source bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSegment {
    pub len: usize,
    pub pos: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHeader {
    pub indicator: WindowIndicator,
    pub segment: Option<SourceSegment>,
    pub target_len: usize,
    pub data_len: usize,
    pub inst_len: usize,
    pub addr_len: usize,
    pub checksum: Option<u32>,
}

impl WindowHeader {
    /// Bytes following the header (data + instructions + addresses).
    #[inline]
    pub fn body_len(&self) -> usize {
        self.data_len + self.inst_len + self.addr_len
    }

    /// Extended windows with empty data and address sections carry
    /// everything inline in the instruction section.
    #[inline]
    pub fn is_interleaved(&self, extended: bool) -> bool {
        extended && self.data_len == 0 && self.addr_len == 0
    }

    /// Size of the COPY source region that precedes target addresses.
    #[inline]
    pub fn source_len(&self) -> usize {
        self.segment.map_or(0, |s| s.len)
    }

    fn checksum_len(&self, extended: bool) -> usize {
        match self.checksum {
            Some(sum) if extended => varint::encoded_len(u64::from(sum)),
            Some(_) => 4,
            None => 0,
        }
    }

    /// Value of the "length of the delta encoding" field.
    pub fn delta_len(&self, extended: bool) -> usize {
        varint::encoded_len(self.target_len as u64)
            + 1
            + varint::encoded_len(self.data_len as u64)
            + varint::encoded_len(self.inst_len as u64)
            + varint::encoded_len(self.addr_len as u64)
            + self.checksum_len(extended)
            + self.body_len()
    }

    pub fn write(&self, extended: bool, out: &mut Vec<u8>) {
        let mut indicator = self.indicator - WindowIndicator::CHECKSUM;
        if self.checksum.is_some() {
            indicator |= WindowIndicator::CHECKSUM;
        }
        out.push(indicator.bits());
        if let Some(seg) = self.segment {
            varint::push(out, seg.len as u64);
            varint::push(out, seg.pos);
        }
        varint::push(out, self.delta_len(extended) as u64);
        varint::push(out, self.target_len as u64);
        out.push(0); // delta indicator: no secondary compression
        varint::push(out, self.data_len as u64);
        varint::push(out, self.inst_len as u64);
        varint::push(out, self.addr_len as u64);
        match self.checksum {
            Some(sum) if extended => varint::push(out, u64::from(sum)),
            Some(sum) => out.extend_from_slice(&sum.to_be_bytes()),
            None => {}
        }
    }

    pub fn parse(data: &[u8], extended: bool) -> Result<Parsed<Self>, HeaderError> {
        let mut cur = Cursor::new(data);
        let result = Self::parse_inner(&mut cur, extended);
        finish(result, cur.pos)
    }

    fn parse_inner(cur: &mut Cursor<'_>, extended: bool) -> Result<Self, Step> {
        let raw = cur.byte()?;
        let indicator =
            WindowIndicator::from_bits(raw).ok_or(HeaderError::InvalidIndicator(raw))?;
        if indicator.contains(WindowIndicator::SOURCE | WindowIndicator::TARGET) {
            return Err(HeaderError::Malformed("both VCD_SOURCE and VCD_TARGET set").into());
        }
        let segment = if indicator.intersects(WindowIndicator::SOURCE | WindowIndicator::TARGET) {
            let len = cur.size("source segment length")?;
            let pos = cur.varint(varint::MAX_SIZE, "source segment position")?;
            Some(SourceSegment { len, pos })
        } else {
            None
        };

        let delta_len = cur.size("delta encoding length")?;
        let target_len = cur.size("target window length")?;
        if cur.byte()? != 0 {
            return Err(HeaderError::Unsupported("secondary compression").into());
        }
        let data_len = cur.size("data section length")?;
        let inst_len = cur.size("instruction section length")?;
        let addr_len = cur.size("address section length")?;
        let checksum = if !indicator.contains(WindowIndicator::CHECKSUM) {
            None
        } else if extended {
            Some(cur.varint(u64::from(u32::MAX), "checksum")? as u32)
        } else {
            let b = cur.take(4)?;
            Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };

        let header = Self {
            indicator,
            segment,
            target_len,
            data_len,
            inst_len,
            addr_len,
            checksum,
        };
        if header.delta_len(extended) != delta_len {
            return Err(HeaderError::Malformed("delta encoding length mismatch").into());
        }
        Ok(header)
    }
}
