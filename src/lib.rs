//! oxivcd: streaming, dictionary-based VCDIFF (RFC 3284) delta coding.
//!
//! A [`Dictionary`] is indexed once and shared.  Encoders diff arbitrary
//! chunks of a target against it and write complete VCDIFF windows to an
//! [`OutputSink`]; decoders accept the delta in arbitrary chunks and emit
//! target bytes as soon as the instructions producing them arrive.
//!
//! The crate provides:
//! - The wire format (`vcdiff`) and block matcher (`hash`)
//! - Streaming sessions (`stream`) and a handle-based arena over them (`session`)
//! - One-shot helpers (`engine`) and file helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use oxivcd::{Dictionary, EncoderOptions, DecoderOptions, StreamingDecoder, StreamingEncoder};
//!
//! let dictionary = Arc::new(Dictionary::build(&b"<html><head></head><body>"[..]).unwrap());
//!
//! let mut encoder = StreamingEncoder::new(Arc::clone(&dictionary), Vec::new(), EncoderOptions::default());
//! encoder.start().unwrap();
//! encoder.encode_chunk(b"<html><head></head>").unwrap();
//! encoder.encode_chunk(b"<body>hello</body></html>").unwrap();
//! encoder.finish().unwrap();
//! let delta = encoder.into_sink();
//!
//! let mut decoder = StreamingDecoder::new(dictionary.shared_bytes(), Vec::new(), DecoderOptions::default());
//! for chunk in delta.chunks(5) {
//!     decoder.decode_chunk(chunk).unwrap();
//! }
//! decoder.finish().unwrap();
//! assert_eq!(decoder.into_sink(), b"<html><head></head><body>hello</body></html>");
//! ```

pub mod dictionary;
pub mod engine;
pub mod error;
pub mod hash;
pub mod io;
pub mod session;
pub mod sink;
pub mod stream;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;

pub use dictionary::{Dictionary, DictionaryId};
pub use error::{Error, Result};
pub use session::{DecoderKey, DictionaryKey, EncoderKey, Sessions};
pub use sink::{IoSink, OutputSink};
pub use stream::{
    DecodeStats, DecoderOptions, DecoderState, EncodeStats, EncoderOptions, EncoderState, StreamingDecoder,
    StreamingEncoder,
};
pub use vcdiff::FormatFlags;
