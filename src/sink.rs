// Append-only output sinks.
//
// Encoders write delta bytes and decoders write reconstructed target bytes
// through `OutputSink`.  A sink only ever sees ordered appends: nothing is
// rewritten, cleared or seeked.

use std::io::{self, Write};

/// Destination for encoder or decoder output.
pub trait OutputSink {
    /// Append `bytes` after everything written so far.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Hint that about `additional` more bytes are coming.
    fn reserve_additional(&mut self, _additional: usize) {}
}

impl OutputSink for Vec<u8> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn reserve_additional(&mut self, additional: usize) {
        self.reserve(additional);
    }
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).append(bytes)
    }

    fn reserve_additional(&mut self, additional: usize) {
        (**self).reserve_additional(additional);
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).append(bytes)
    }

    fn reserve_additional(&mut self, additional: usize) {
        (**self).reserve_additional(additional);
    }
}

/// Adapts any [`Write`] into a sink.
///
/// The writer is not flushed by the sink; call [`IoSink::into_inner`] and
/// flush it when the session is done.
#[derive(Debug)]
pub struct IoSink<W: Write> {
    inner: W,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> OutputSink for IoSink<W> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }
}
