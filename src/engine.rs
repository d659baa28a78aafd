// One-shot encode and decode.
//
// Thin wrappers that drive a streaming session over buffers already in
// memory.  With the `parallel` feature, windows of one target (or whole
// targets of a batch) are matched on the rayon pool instead.

use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::stream::{DecoderOptions, EncoderOptions, StreamingDecoder, StreamingEncoder};

#[cfg(feature = "parallel")]
use crate::hash::matching::MatchFinder;
#[cfg(feature = "parallel")]
use crate::vcdiff::{FileHeader, WindowEmitter};

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode `target` against `dictionary` in one call.
pub fn encode(dictionary: &Arc<Dictionary>, target: &[u8], options: EncoderOptions) -> Result<Vec<u8>> {
    let mut encoder = StreamingEncoder::new(Arc::clone(dictionary), Vec::with_capacity(target.len() / 4 + 16), options);
    encoder.start()?;
    encoder.encode_chunk(target)?;
    encoder.finish()?;
    Ok(encoder.into_sink())
}

/// Build a dictionary from `dictionary` and encode `target` against it.
pub fn encode_bytes(dictionary: &[u8], target: &[u8], options: EncoderOptions) -> Result<Vec<u8>> {
    let dictionary = Arc::new(Dictionary::build(dictionary)?);
    encode(&dictionary, target, options)
}

/// Encode with every window matched independently on the rayon pool.
///
/// Windows share no state, so the output is byte-identical to [`encode`].
#[cfg(feature = "parallel")]
pub fn encode_parallel(dictionary: &Dictionary, target: &[u8], options: EncoderOptions) -> Result<Vec<u8>> {
    let window_size = options.effective_window_size();
    let windows = target
        .par_chunks(window_size)
        .map(|window| encode_one_window(dictionary, window, options))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(windows.iter().map(Vec::len).sum::<usize>() + 8);
    FileHeader::for_format(options.format).write(&mut out);
    for window in &windows {
        out.extend_from_slice(window);
    }
    log::debug!(
        "parallel encode: {} windows, {} -> {} bytes",
        windows.len(),
        target.len(),
        out.len()
    );
    Ok(out)
}

#[cfg(feature = "parallel")]
fn encode_one_window(dictionary: &Dictionary, window: &[u8], options: EncoderOptions) -> Result<Vec<u8>> {
    let mut emitter = WindowEmitter::new(options.format);
    let mut finder = MatchFinder::new(options.matcher(), options.target_matches);
    emitter.begin(dictionary.len());
    finder.encode_window(dictionary.indexed(), window, &mut emitter);
    if emitter.target_len() != window.len() {
        return Err(Error::EncodeFailed(format!(
            "window describes {} of {} target bytes",
            emitter.target_len(),
            window.len()
        )));
    }
    let mut out = Vec::new();
    emitter.finish(window, &mut out);
    Ok(out)
}

/// Encode many targets against one dictionary, one rayon task per target.
#[cfg(feature = "parallel")]
pub fn encode_batch<T: AsRef<[u8]> + Sync>(
    dictionary: &Arc<Dictionary>,
    targets: &[T],
    options: EncoderOptions,
) -> Vec<Result<Vec<u8>>> {
    targets
        .par_iter()
        .map(|target| encode(dictionary, target.as_ref(), options))
        .collect()
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a complete delta.
pub fn decode(dictionary: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    decode_with_options(dictionary, delta, DecoderOptions::default())
}

pub fn decode_with_options(dictionary: &[u8], delta: &[u8], options: DecoderOptions) -> Result<Vec<u8>> {
    let mut decoder = StreamingDecoder::new(dictionary, Vec::new(), options);
    decoder.decode_chunk(delta)?;
    decoder.finish()?;
    Ok(decoder.into_sink())
}

/// True when `delta` starts with the VCDIFF magic.
pub fn looks_like_vcdiff(delta: &[u8]) -> bool {
    delta.starts_with(&crate::vcdiff::MAGIC)
}

/// Map a decode error to whether more input could have fixed it.
pub fn is_truncation(err: &Error) -> bool {
    matches!(err, Error::TruncatedInput(_))
}
