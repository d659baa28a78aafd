// Streaming decoder.
//
// Delta bytes arrive in arbitrary chunks.  Unconsumed bytes wait in `input`
// until the next parse step can complete:
//   FileHeader  -> needs the whole file header
//   WindowHeader -> needs the whole window header
//   Window      -> standard layout: needs the whole body, then runs it
//                  interleaved layout: runs every complete instruction in
//                  the bytes so far and keeps the rest
// Decoded bytes reach the sink as soon as the instructions producing them
// have run.

use std::sync::Arc;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::sink::OutputSink;
use crate::vcdiff::header::{FileHeader, Parsed, WindowHeader, WindowIndicator};
use crate::vcdiff::window::{Body, Cursors, Output, Progress, Segment, WindowExecutor};

/// Default per-window and whole-stream target limit (64 MiB).
pub const DEFAULT_MAX_TARGET: usize = 1 << 26;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`StreamingDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Verify per-window Adler-32 checksums when present.
    pub verify_checksum: bool,
    /// Accept windows whose source segment is earlier target output.
    pub allow_vcd_target: bool,
    /// Largest target window accepted.
    pub max_window_size: usize,
    /// Largest total target accepted.
    pub max_target_size: u64,
    /// Exact total target size, if known in advance.
    pub expected_target_size: Option<u64>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            allow_vcd_target: true,
            max_window_size: DEFAULT_MAX_TARGET,
            max_target_size: DEFAULT_MAX_TARGET as u64,
            expected_target_size: None,
        }
    }
}

/// Counters for one decode stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub windows: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Externally visible lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No complete file header yet.
    Idle,
    Decoding,
    Finished,
    Failed,
}

struct ActiveWindow {
    header: WindowHeader,
    exec: WindowExecutor,
    interleaved: bool,
    /// Instruction bytes of an interleaved window not yet consumed.
    inst_remaining: usize,
}

enum Phase {
    FileHeader,
    WindowHeader,
    Window(Box<ActiveWindow>),
    Finished,
    Failed,
}

enum Advance {
    /// Wait for more input.
    Stall,
    /// State changed; keep going.
    Continue,
}

pub struct StreamingDecoder<S: OutputSink> {
    dictionary: Arc<[u8]>,
    sink: S,
    options: DecoderOptions,
    phase: Phase,
    extended: bool,
    /// Received, not yet consumed delta bytes.
    input: Vec<u8>,
    /// Retained decoded bytes: every window when VCD_TARGET is allowed,
    /// otherwise only the current one.
    out: Vec<u8>,
    /// Stream offset of `out[0]`.
    out_base: u64,
    /// `out[..flushed]` has been appended to the sink.
    flushed: usize,
    /// Offset in `out` where the current window's bytes begin.
    window_start: usize,
    stats: DecodeStats,
}

impl<S: OutputSink> StreamingDecoder<S> {
    pub fn new(dictionary: impl Into<Arc<[u8]>>, sink: S, options: DecoderOptions) -> Self {
        let dictionary = dictionary.into();
        debug!("decoder with {}-byte dictionary", dictionary.len());
        Self {
            dictionary,
            sink,
            options,
            phase: Phase::FileHeader,
            extended: false,
            input: Vec::new(),
            out: Vec::new(),
            out_base: 0,
            flushed: 0,
            window_start: 0,
            stats: DecodeStats::default(),
        }
    }

    pub fn state(&self) -> DecoderState {
        match self.phase {
            Phase::FileHeader => DecoderState::Idle,
            Phase::WindowHeader | Phase::Window(_) => DecoderState::Decoding,
            Phase::Finished => DecoderState::Finished,
            Phase::Failed => DecoderState::Failed,
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Total target bytes decoded so far.
    pub fn target_len(&self) -> u64 {
        self.out_base + self.out.len() as u64
    }

    /// Feed delta bytes, writing every target byte they complete.
    pub fn decode_chunk(&mut self, data: &[u8]) -> Result<()> {
        if matches!(self.phase, Phase::Finished | Phase::Failed) {
            return Err(self.dead());
        }
        self.stats.bytes_in += data.len() as u64;
        self.input.extend_from_slice(data);
        let result = self.process();
        self.settle(result)
    }

    /// Confirm the stream ended on a window boundary.
    pub fn finish(&mut self) -> Result<DecodeStats> {
        let result = match &self.phase {
            Phase::Finished | Phase::Failed => return Err(self.dead()),
            Phase::FileHeader if self.input.is_empty() => Ok(()),
            Phase::FileHeader => Err(Error::TruncatedInput("stream ends inside the file header".into())),
            Phase::WindowHeader if self.input.is_empty() => Ok(()),
            Phase::WindowHeader => Err(Error::TruncatedInput(format!(
                "stream ends inside window {} header",
                self.stats.windows + 1
            ))),
            Phase::Window(w) => Err(Error::TruncatedInput(format!(
                "stream ends inside window {} ({} of {} target bytes)",
                self.stats.windows + 1,
                w.exec.produced(),
                w.header.target_len
            ))),
        };
        let result = result.and_then(|()| match self.options.expected_target_size {
            Some(expected) if self.target_len() < expected => Err(Error::TruncatedInput(format!(
                "decoded {} of {expected} expected target bytes",
                self.target_len()
            ))),
            _ => Ok(()),
        });
        self.settle(result)?;
        self.phase = Phase::Finished;
        debug!(
            "decoder finished: {} windows, {} -> {} bytes",
            self.stats.windows, self.stats.bytes_in, self.stats.bytes_out
        );
        Ok(self.stats)
    }

    fn dead(&self) -> Error {
        match self.phase {
            Phase::Finished => Error::InvalidState("decoder already finished"),
            _ => Error::InvalidState("decoder failed earlier"),
        }
    }

    fn settle(&mut self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.phase = Phase::Failed;
            self.input = Vec::new();
            self.out = Vec::new();
        }
        result
    }

    fn process(&mut self) -> Result<()> {
        loop {
            let step = match self.phase {
                Phase::FileHeader => self.read_file_header()?,
                Phase::WindowHeader => self.read_window_header()?,
                Phase::Window(_) => self.run_window()?,
                Phase::Finished | Phase::Failed => Advance::Stall,
            };
            if let Advance::Stall = step {
                return Ok(());
            }
        }
    }

    fn read_file_header(&mut self) -> Result<Advance> {
        match FileHeader::parse(&self.input)? {
            Parsed::Incomplete => Ok(Advance::Stall),
            Parsed::Done(header, used) => {
                self.input.drain(..used);
                self.extended = header.is_extended();
                debug!(
                    "delta header: version={:#04x} app_header={}",
                    header.version,
                    header.app_header.as_ref().map_or(0, Vec::len)
                );
                self.phase = Phase::WindowHeader;
                Ok(Advance::Continue)
            }
        }
    }

    fn read_window_header(&mut self) -> Result<Advance> {
        if self.input.is_empty() {
            return Ok(Advance::Stall);
        }
        let (header, used) = match WindowHeader::parse(&self.input, self.extended)? {
            Parsed::Incomplete => return Ok(Advance::Stall),
            Parsed::Done(header, used) => (header, used),
        };
        let segment = self.check_window(&header)?;
        self.input.drain(..used);

        let interleaved = header.is_interleaved(self.extended);
        trace!(
            "window {}: {:?} target={} body={} interleaved={interleaved}",
            self.stats.windows + 1,
            header.segment,
            header.target_len,
            header.body_len()
        );
        if !self.options.allow_vcd_target {
            self.out_base += self.out.len() as u64;
            self.out.clear();
            self.flushed = 0;
        }
        self.window_start = self.out.len();
        self.out.reserve(header.target_len);
        self.phase = Phase::Window(Box::new(ActiveWindow {
            exec: WindowExecutor::new(&header, segment),
            inst_remaining: header.inst_len,
            interleaved,
            header,
        }));
        Ok(Advance::Continue)
    }

    /// Validate limits and resolve the source segment.
    fn check_window(&self, header: &WindowHeader) -> Result<Segment> {
        if header.target_len > self.options.max_window_size {
            return Err(Error::CorruptDelta(format!(
                "target window of {} bytes exceeds limit of {}",
                header.target_len, self.options.max_window_size
            )));
        }
        let total = self.target_len() + header.target_len as u64;
        if total > self.options.max_target_size {
            return Err(Error::CorruptDelta(format!(
                "target size {total} exceeds limit of {}",
                self.options.max_target_size
            )));
        }
        if let Some(expected) = self.options.expected_target_size
            && total > expected
        {
            return Err(Error::CorruptDelta(format!(
                "target size {total} exceeds expected {expected}"
            )));
        }

        let Some(seg) = header.segment else {
            return Ok(Segment::None);
        };
        let end = seg.pos.checked_add(seg.len as u64);
        if header.indicator.contains(WindowIndicator::SOURCE) {
            match end {
                Some(end) if end <= self.dictionary.len() as u64 => Ok(Segment::Dictionary {
                    start: seg.pos as usize,
                    len: seg.len,
                }),
                _ => Err(Error::CorruptDelta(format!(
                    "source segment {}+{} beyond {}-byte dictionary",
                    seg.pos,
                    seg.len,
                    self.dictionary.len()
                ))),
            }
        } else if !self.options.allow_vcd_target {
            Err(Error::CorruptDelta("VCD_TARGET windows are not allowed".into()))
        } else {
            match end {
                Some(end) if seg.pos >= self.out_base && end <= self.target_len() => Ok(Segment::Target {
                    start: (seg.pos - self.out_base) as usize,
                    len: seg.len,
                }),
                _ => Err(Error::CorruptDelta(format!(
                    "target segment {}+{} beyond {} decoded bytes",
                    seg.pos,
                    seg.len,
                    self.target_len()
                ))),
            }
        }
    }

    fn run_window(&mut self) -> Result<Advance> {
        let Phase::Window(window) = &mut self.phase else {
            return Ok(Advance::Stall);
        };
        let mut output = Output {
            dictionary: &self.dictionary,
            out: &mut self.out,
            window_start: self.window_start,
        };

        let done = if window.interleaved {
            let available = self.input.len().min(window.inst_remaining);
            let body = Body::interleaved(&self.input[..available]);
            let mut cur = Cursors::default();
            let progress = window.exec.run(&body, &mut cur, &mut output)?;
            self.input.drain(..cur.inst);
            window.inst_remaining -= cur.inst;
            match progress {
                Progress::Done if window.inst_remaining == 0 => {
                    window.exec.finish(&Body::interleaved(&[]), &cur, &output, self.options.verify_checksum)?;
                    true
                }
                Progress::NeedMore if available == cur.inst + window.inst_remaining => {
                    return Err(Error::CorruptDelta("instruction runs past end of window".into()));
                }
                _ => false,
            }
        } else {
            let body_len = window.header.body_len();
            if self.input.len() < body_len {
                return Ok(Advance::Stall);
            }
            let body = Body::split(&window.header, &self.input[..body_len], self.extended);
            let mut cur = Cursors::default();
            if window.exec.run(&body, &mut cur, &mut output)? == Progress::NeedMore {
                return Err(Error::CorruptDelta("instruction runs past end of section".into()));
            }
            window.exec.finish(&body, &cur, &output, self.options.verify_checksum)?;
            self.input.drain(..body_len);
            true
        };

        self.flush_output()?;
        if !done {
            return Ok(Advance::Stall);
        }
        self.stats.windows += 1;
        debug!(
            "decoded window {}: {} target bytes",
            self.stats.windows,
            self.out.len() - self.window_start
        );
        self.phase = Phase::WindowHeader;
        Ok(Advance::Continue)
    }

    fn flush_output(&mut self) -> Result<()> {
        let fresh = &self.out[self.flushed..];
        if !fresh.is_empty() {
            self.sink.append(fresh)?;
            self.stats.bytes_out += fresh.len() as u64;
            self.flushed = self.out.len();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use crate::stream::encoder::{EncoderOptions, StreamingEncoder};
    use crate::vcdiff::header::FormatFlags;

    const DICT: &[u8] = b"The quick brown fox jumps over the lazy dog, again and again and again.";

    fn encode(target: &[u8], format: FormatFlags) -> Vec<u8> {
        let dict = Arc::new(Dictionary::build(DICT).unwrap());
        let options = EncoderOptions {
            format,
            ..EncoderOptions::default()
        };
        let mut enc = StreamingEncoder::new(dict, Vec::new(), options);
        enc.start().unwrap();
        enc.encode_chunk(target).unwrap();
        enc.finish().unwrap();
        enc.into_sink()
    }

    fn decode(delta: &[u8], options: DecoderOptions) -> Result<Vec<u8>> {
        let mut dec = StreamingDecoder::new(DICT, Vec::new(), options);
        dec.decode_chunk(delta)?;
        dec.finish()?;
        Ok(dec.into_sink())
    }

    fn target() -> Vec<u8> {
        let mut t = b"Prefix: ".to_vec();
        t.extend_from_slice(&DICT[4..60]);
        t.extend_from_slice(b" -- ");
        t.extend_from_slice(&DICT[..40]);
        t
    }

    #[test]
    fn roundtrip_every_format() {
        let target = target();
        for format in [
            FormatFlags::empty(),
            FormatFlags::INTERLEAVED,
            FormatFlags::CHECKSUM,
            FormatFlags::INTERLEAVED | FormatFlags::CHECKSUM,
        ] {
            let delta = encode(&target, format);
            assert_eq!(decode(&delta, DecoderOptions::default()).unwrap(), target, "{format:?}");
        }
    }

    #[test]
    fn byte_at_a_time_interleaved_streams_output_early() {
        let target = target();
        let delta = encode(&target, FormatFlags::INTERLEAVED);
        let mut dec = StreamingDecoder::new(DICT, Vec::new(), DecoderOptions::default());
        let mut first_output_at = None;
        for (i, b) in delta.iter().enumerate() {
            dec.decode_chunk(std::slice::from_ref(b)).unwrap();
            if first_output_at.is_none() && !dec.sink().is_empty() {
                first_output_at = Some(i);
            }
        }
        dec.finish().unwrap();
        assert_eq!(dec.sink(), &target);
        assert!(first_output_at.unwrap() < delta.len() - 1);
    }

    #[test]
    fn empty_and_header_only_streams() {
        assert_eq!(decode(&[], DecoderOptions::default()).unwrap(), b"");
        let header_only = encode(b"", FormatFlags::empty());
        assert_eq!(decode(&header_only, DecoderOptions::default()).unwrap(), b"");
    }

    #[test]
    fn truncation_inside_header_or_window_is_reported() {
        let delta = encode(&target(), FormatFlags::empty());
        const FILE_HEADER_LEN: usize = 5;
        for cut in (1..delta.len()).filter(|&cut| cut != FILE_HEADER_LEN) {
            let err = decode(&delta[..cut], DecoderOptions::default()).unwrap_err();
            assert!(matches!(err, Error::TruncatedInput(_)), "cut {cut}: {err}");
        }
    }

    #[test]
    fn clean_cut_between_windows_needs_expected_size() {
        let target = target();
        let delta = encode(&target, FormatFlags::empty());
        let header_only = &delta[..5];
        assert_eq!(decode(header_only, DecoderOptions::default()).unwrap(), b"");
        let options = DecoderOptions {
            expected_target_size: Some(target.len() as u64),
            ..DecoderOptions::default()
        };
        assert!(matches!(decode(header_only, options), Err(Error::TruncatedInput(_))));
    }

    #[test]
    fn calls_after_failure_are_invalid_state() {
        let mut dec = StreamingDecoder::new(DICT, Vec::new(), DecoderOptions::default());
        assert!(matches!(dec.decode_chunk(b"XYZ"), Err(Error::CorruptDelta(_))));
        assert_eq!(dec.state(), DecoderState::Failed);
        assert!(matches!(dec.decode_chunk(b""), Err(Error::InvalidState(_))));
        assert!(matches!(dec.finish(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn calls_after_finish_are_invalid_state() {
        let delta = encode(b"abc", FormatFlags::empty());
        let mut dec = StreamingDecoder::new(DICT, Vec::new(), DecoderOptions::default());
        dec.decode_chunk(&delta).unwrap();
        dec.finish().unwrap();
        assert!(matches!(dec.decode_chunk(&delta), Err(Error::InvalidState(_))));
    }

    #[test]
    fn window_limit_is_enforced() {
        let delta = encode(&[7u8; 500], FormatFlags::empty());
        let options = DecoderOptions {
            max_window_size: 100,
            ..DecoderOptions::default()
        };
        assert!(matches!(decode(&delta, options), Err(Error::CorruptDelta(_))));
    }

    #[test]
    fn expected_target_size() {
        let delta = encode(b"0123456789", FormatFlags::empty());
        let exact = DecoderOptions {
            expected_target_size: Some(10),
            ..DecoderOptions::default()
        };
        assert_eq!(decode(&delta, exact).unwrap(), b"0123456789");

        let short = DecoderOptions {
            expected_target_size: Some(11),
            ..DecoderOptions::default()
        };
        assert!(matches!(decode(&delta, short), Err(Error::TruncatedInput(_))));

        let long = DecoderOptions {
            expected_target_size: Some(9),
            ..DecoderOptions::default()
        };
        assert!(matches!(decode(&delta, long), Err(Error::CorruptDelta(_))));
    }

    #[test]
    fn source_segment_past_dictionary_is_corrupt() {
        let delta = encode(&target(), FormatFlags::empty());
        let mut decoder = StreamingDecoder::new(&DICT[..10], Vec::new(), DecoderOptions::default());
        assert!(matches!(decoder.decode_chunk(&delta), Err(Error::CorruptDelta(_))));
    }
}
