// Streaming encoder.
//
// Target bytes arrive in arbitrary chunks and are buffered until a full
// window is available; each window is matched against the dictionary (and
// optionally its own earlier bytes), emitted and appended to the sink in a
// single write.  Window boundaries depend only on `window_size`, never on
// how the caller chunked the input, so the output is deterministic.

use std::sync::Arc;

use log::{debug, warn};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::hash::config::{self, DEFAULT_LEVEL, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE, MatcherConfig};
use crate::hash::matching::MatchFinder;
use crate::sink::OutputSink;
use crate::vcdiff::emitter::WindowEmitter;
use crate::vcdiff::header::{FileHeader, FormatFlags};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`StreamingEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Compression level (0-9). Maps to matcher profiles.
    pub level: u32,
    /// Target bytes per window.  Clamped to `1..=16 MiB`.
    pub window_size: usize,
    /// Output format extensions.
    pub format: FormatFlags,
    /// Also look for matches in earlier bytes of the same window.
    pub target_matches: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            window_size: DEFAULT_WINDOW_SIZE,
            format: FormatFlags::empty(),
            target_matches: true,
        }
    }
}

impl EncoderOptions {
    /// Window size actually used after clamping.
    pub fn effective_window_size(&self) -> usize {
        self.window_size.clamp(1, MAX_WINDOW_SIZE)
    }

    /// Matcher profile for `level`.
    pub fn matcher(&self) -> MatcherConfig {
        config::config_for_level(self.level)
    }
}

/// Counters for one encode stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub windows: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub copies: u64,
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Constructed; `start` not called yet.
    Idle,
    /// Header written, no target bytes yet.
    Started,
    Encoding,
    Finished,
    /// A call failed; the session is dead.
    Failed,
}

pub struct StreamingEncoder<S: OutputSink> {
    dictionary: Arc<Dictionary>,
    sink: S,
    format: FormatFlags,
    window_size: usize,
    state: EncoderState,
    finder: MatchFinder,
    emitter: WindowEmitter,
    /// Partial window carried across chunks.
    buffer: Vec<u8>,
    /// Serialized window, reused.
    scratch: Vec<u8>,
    stats: EncodeStats,
}

impl<S: OutputSink> StreamingEncoder<S> {
    pub fn new(dictionary: Arc<Dictionary>, sink: S, options: EncoderOptions) -> Self {
        let window_size = options.effective_window_size();
        if window_size != options.window_size {
            warn!(
                "window size {} out of range, using {window_size}",
                options.window_size
            );
        }
        if options.level > 9 {
            warn!("compression level {} above 9, using 9", options.level);
        }
        let matcher = options.matcher();
        debug!(
            "encoder for dictionary {}: profile={} window={window_size} format={:?} target_matches={}",
            dictionary.id(),
            matcher.name,
            options.format,
            options.target_matches
        );
        Self {
            dictionary,
            sink,
            format: options.format,
            window_size,
            state: EncoderState::Idle,
            finder: MatchFinder::new(matcher, options.target_matches),
            emitter: WindowEmitter::new(options.format),
            buffer: Vec::new(),
            scratch: Vec::new(),
            stats: EncodeStats::default(),
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn stats(&self) -> EncodeStats {
        self.stats
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Write the stream header.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EncoderState::Idle {
            return Err(match self.state {
                EncoderState::Started | EncoderState::Encoding => Error::AlreadyStarted,
                _ => Error::InvalidState("encoder is finished or failed"),
            });
        }
        self.scratch.clear();
        FileHeader::for_format(self.format).write(&mut self.scratch);
        let result = self.write_scratch();
        self.transition(result, EncoderState::Started)
    }

    /// Feed target bytes.  Every full window is encoded and written before
    /// this returns.
    pub fn encode_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.check_running()?;
        let result = self.buffer_and_encode(data);
        self.transition(result, EncoderState::Encoding)
    }

    /// Encode the buffered partial window now, so everything fed so far is
    /// decodable from the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.check_running()?;
        let result = self.encode_buffered();
        let next = self.state;
        self.transition(result, next)
    }

    /// Encode the trailing partial window and close the stream.
    pub fn finish(&mut self) -> Result<EncodeStats> {
        self.check_running()?;
        let result = self.encode_buffered();
        self.transition(result, EncoderState::Finished)?;
        debug!(
            "encoder finished: {} windows, {} -> {} bytes",
            self.stats.windows, self.stats.bytes_in, self.stats.bytes_out
        );
        Ok(self.stats)
    }

    fn check_running(&self) -> Result<()> {
        match self.state {
            EncoderState::Started | EncoderState::Encoding => Ok(()),
            EncoderState::Idle => Err(Error::InvalidState("encoder not started")),
            EncoderState::Finished => Err(Error::InvalidState("encoder already finished")),
            EncoderState::Failed => Err(Error::InvalidState("encoder failed earlier")),
        }
    }

    fn transition(&mut self, result: Result<()>, next: EncoderState) -> Result<()> {
        match result {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                self.state = EncoderState::Failed;
                self.buffer = Vec::new();
                Err(e)
            }
        }
    }

    fn buffer_and_encode(&mut self, data: &[u8]) -> Result<()> {
        self.stats.bytes_in += data.len() as u64;
        let mut offset = 0usize;

        // Complete a partially buffered window first.
        if !self.buffer.is_empty() {
            let take = (self.window_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            offset = take;
            if self.buffer.len() == self.window_size {
                self.encode_buffered()?;
            }
        }

        // Full windows straight from the caller's slice.
        while data.len() - offset >= self.window_size {
            let end = offset + self.window_size;
            self.encode_window(&data[offset..end])?;
            offset = end;
        }

        self.buffer.extend_from_slice(&data[offset..]);
        Ok(())
    }

    fn encode_buffered(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let window = std::mem::take(&mut self.buffer);
        let result = self.encode_window(&window);
        self.buffer = window;
        self.buffer.clear();
        result
    }

    fn encode_window(&mut self, window: &[u8]) -> Result<()> {
        self.emitter.begin(self.dictionary.len());
        let copies = self
            .finder
            .encode_window(self.dictionary.indexed(), window, &mut self.emitter);
        if self.emitter.target_len() != window.len() {
            return Err(Error::EncodeFailed(format!(
                "window describes {} of {} target bytes",
                self.emitter.target_len(),
                window.len()
            )));
        }
        self.scratch.clear();
        self.emitter.finish(window, &mut self.scratch);
        self.write_scratch()?;

        self.stats.windows += 1;
        self.stats.copies += copies as u64;
        debug!(
            "window {}: target={} delta={} copies={copies}",
            self.stats.windows,
            window.len(),
            self.scratch.len()
        );
        Ok(())
    }

    fn write_scratch(&mut self) -> Result<()> {
        self.sink.reserve_additional(self.scratch.len());
        self.sink.append(&self.scratch)?;
        self.stats.bytes_out += self.scratch.len() as u64;
        Ok(())
    }
}
