// Crate-wide error type.

use std::io;

use thiserror::Error;

use crate::vcdiff::header::HeaderError;

/// Everything an encode or decode session can fail with.
///
/// Any error returned from a chunk or finish call leaves the session
/// unusable; later calls report [`Error::InvalidState`].
#[derive(Debug, Error)]
pub enum Error {
    /// The dictionary is empty or too large to index.
    #[error("invalid dictionary: {0}")]
    InvalidDictionary(&'static str),

    /// `start()` was called on an encoder that is already running.
    #[error("session already started")]
    AlreadyStarted,

    /// The call is not valid in the session's current state.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// The encoder could not produce a window.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// Malformed or adversarial delta bytes.
    #[error("corrupt delta: {0}")]
    CorruptDelta(String),

    /// The delta stream ended inside a header or window.
    #[error("truncated delta: {0}")]
    TruncatedInput(String),

    /// The output sink or an underlying file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<HeaderError> for Error {
    fn from(e: HeaderError) -> Self {
        Self::CorruptDelta(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            Error::TruncatedInput(_) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            Error::CorruptDelta(_) => io::Error::new(io::ErrorKind::InvalidData, e),
            other => io::Error::other(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
