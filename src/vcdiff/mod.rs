// VCDIFF format (RFC 3284).
//
// Wire-level pieces shared by the encoder and decoder:
//
// - `varint`        base-128 integers
// - `address_cache` NEAR/SAME cache for COPY addresses
// - `code_table`    the default 256-entry instruction code table
// - `header`        file and window headers
// - `checksum`      Adler-32 of a decoded window
// - `emitter`       serializes the instructions of one window
// - `window`        executes or inspects a window body

pub mod address_cache;
pub mod checksum;
pub mod code_table;
pub mod emitter;
pub mod header;
pub mod varint;
pub mod window;

pub use address_cache::AddressCache;
pub use code_table::Instruction;
pub use emitter::WindowEmitter;
pub use header::{FileHeader, FormatFlags, MAGIC, WindowHeader};
pub use window::{InstructionIter, RawWindow, WindowIter};
