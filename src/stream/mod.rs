// Streaming encoder and decoder sessions.
//
// Both sides accept input in arbitrary chunks and write to an
// `OutputSink`.  The encoder cuts the target into fixed-size windows; the
// decoder emits target bytes as soon as the instructions that produce them
// have been received.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecodeStats, DecoderOptions, DecoderState, StreamingDecoder};
pub use encoder::{EncodeStats, EncoderOptions, EncoderState, StreamingEncoder};
