// Handle-based session arena.
//
// Hosts that cannot hold Rust values directly (bindings, C callers, request
// routers) talk to the engine through small copyable keys instead.  Keys are
// generational: once a session finishes or fails its slot is freed, and
// any later call with the old key is `InvalidState` rather than touching
// whatever reuses the slot.

use std::sync::Arc;

use log::debug;
use slotmap::{SlotMap, new_key_type};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::sink::OutputSink;
use crate::stream::{DecodeStats, DecoderOptions, EncodeStats, EncoderOptions, StreamingDecoder, StreamingEncoder};
use crate::vcdiff::header::FormatFlags;

new_key_type! {
    /// Handle to a built dictionary.
    pub struct DictionaryKey;
    /// Handle to a running encoder.
    pub struct EncoderKey;
    /// Handle to a running decoder.
    pub struct DecoderKey;
}

/// Arena of dictionaries and encode/decode sessions.
///
/// Every session owns its sink; finishing a session hands the sink back.
pub struct Sessions<S: OutputSink = Box<dyn OutputSink + Send>> {
    dictionaries: SlotMap<DictionaryKey, Arc<Dictionary>>,
    encoders: SlotMap<EncoderKey, StreamingEncoder<S>>,
    decoders: SlotMap<DecoderKey, StreamingDecoder<S>>,
}

impl<S: OutputSink> Default for Sessions<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: OutputSink> Sessions<S> {
    pub fn new() -> Self {
        Self {
            dictionaries: SlotMap::with_key(),
            encoders: SlotMap::with_key(),
            decoders: SlotMap::with_key(),
        }
    }

    // -- dictionaries -------------------------------------------------------

    pub fn build_dictionary(&mut self, bytes: impl Into<Arc<[u8]>>) -> Result<DictionaryKey> {
        let dictionary = Dictionary::build(bytes)?;
        let key = self.dictionaries.insert(Arc::new(dictionary));
        debug!("dictionary {key:?} registered");
        Ok(key)
    }

    pub fn dictionary(&self, key: DictionaryKey) -> Option<&Arc<Dictionary>> {
        self.dictionaries.get(key)
    }

    /// Drop the arena's reference.  Encoders already started on the
    /// dictionary keep it alive until they finish.
    pub fn release_dictionary(&mut self, key: DictionaryKey) -> Result<()> {
        self.dictionaries
            .remove(key)
            .map(|_| debug!("dictionary {key:?} released"))
            .ok_or(Error::InvalidState("unknown dictionary handle"))
    }

    // -- encoders -----------------------------------------------------------

    /// Start an encoder with default options apart from `format` and
    /// `target_matches`.  The stream header is written to `sink` at once.
    pub fn start_encoder(
        &mut self,
        dictionary: DictionaryKey,
        format: FormatFlags,
        target_matches: bool,
        sink: S,
    ) -> Result<EncoderKey> {
        let options = EncoderOptions {
            format,
            target_matches,
            ..EncoderOptions::default()
        };
        self.start_encoder_with(dictionary, options, sink)
    }

    pub fn start_encoder_with(&mut self, dictionary: DictionaryKey, options: EncoderOptions, sink: S) -> Result<EncoderKey> {
        let dictionary = self
            .dictionaries
            .get(dictionary)
            .cloned()
            .ok_or(Error::InvalidState("unknown dictionary handle"))?;
        let mut encoder = StreamingEncoder::new(dictionary, sink, options);
        encoder.start()?;
        let key = self.encoders.insert(encoder);
        debug!("encoder {key:?} started");
        Ok(key)
    }

    /// Feed target bytes.  A failure ends the session.
    pub fn encode_chunk(&mut self, key: EncoderKey, data: &[u8]) -> Result<()> {
        let encoder = self
            .encoders
            .get_mut(key)
            .ok_or(Error::InvalidState("unknown or finished encoder handle"))?;
        let result = encoder.encode_chunk(data);
        if let Err(e) = &result {
            debug!("encoder {key:?} failed: {e}");
            self.encoders.remove(key);
        }
        result
    }

    /// Close the stream and release the handle, returning the sink.
    ///
    /// The handle is released whether or not finishing succeeds.
    pub fn finish_encoder(&mut self, key: EncoderKey) -> Result<(S, EncodeStats)> {
        let mut encoder = self
            .encoders
            .remove(key)
            .ok_or(Error::InvalidState("unknown or finished encoder handle"))?;
        let stats = encoder.finish()?;
        debug!("encoder {key:?} released");
        Ok((encoder.into_sink(), stats))
    }

    // -- decoders -----------------------------------------------------------

    pub fn start_decoder(&mut self, dictionary: impl Into<Arc<[u8]>>, sink: S) -> DecoderKey {
        self.start_decoder_with(dictionary, DecoderOptions::default(), sink)
    }

    pub fn start_decoder_with(&mut self, dictionary: impl Into<Arc<[u8]>>, options: DecoderOptions, sink: S) -> DecoderKey {
        let key = self.decoders.insert(StreamingDecoder::new(dictionary, sink, options));
        debug!("decoder {key:?} started");
        key
    }

    /// Feed delta bytes.  A failure ends the session.
    pub fn decode_chunk(&mut self, key: DecoderKey, data: &[u8]) -> Result<()> {
        let decoder = self
            .decoders
            .get_mut(key)
            .ok_or(Error::InvalidState("unknown or finished decoder handle"))?;
        let result = decoder.decode_chunk(data);
        if let Err(e) = &result {
            debug!("decoder {key:?} failed: {e}");
            self.decoders.remove(key);
        }
        result
    }

    /// Check the stream ended cleanly and release the handle, returning
    /// the sink.
    pub fn finish_decoder(&mut self, key: DecoderKey) -> Result<(S, DecodeStats)> {
        let mut decoder = self
            .decoders
            .remove(key)
            .ok_or(Error::InvalidState("unknown or finished decoder handle"))?;
        let stats = decoder.finish()?;
        debug!("decoder {key:?} released");
        Ok((decoder.into_sink(), stats))
    }

    // -- bookkeeping --------------------------------------------------------

    pub fn dictionary_count(&self) -> usize {
        self.dictionaries.len()
    }

    /// Encoders and decoders currently running.
    pub fn active_sessions(&self) -> usize {
        self.encoders.len() + self.decoders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICT: &[u8] = b"<html><head><title>Shared dictionary</title></head><body><div class=\"content\">";

    fn page(body: &str) -> Vec<u8> {
        let mut page = DICT.to_vec();
        page.extend_from_slice(body.as_bytes());
        page.extend_from_slice(b"</div></body></html>");
        page
    }

    #[test]
    fn encode_then_decode_through_handles() {
        let mut sessions: Sessions<Vec<u8>> = Sessions::new();
        let dict = sessions.build_dictionary(DICT).unwrap();
        let target = page("hello");

        let enc = sessions.start_encoder(dict, FormatFlags::CHECKSUM, true, Vec::new()).unwrap();
        for chunk in target.chunks(7) {
            sessions.encode_chunk(enc, chunk).unwrap();
        }
        let (delta, stats) = sessions.finish_encoder(enc).unwrap();
        assert_eq!(stats.bytes_in, target.len() as u64);
        assert_eq!(stats.bytes_out, delta.len() as u64);

        let dec = sessions.start_decoder(DICT, Vec::new());
        for chunk in delta.chunks(3) {
            sessions.decode_chunk(dec, chunk).unwrap();
        }
        let (decoded, _) = sessions.finish_decoder(dec).unwrap();
        assert_eq!(decoded, target);
        assert_eq!(sessions.active_sessions(), 0);
    }

    #[test]
    fn finished_handles_are_invalid() {
        let mut sessions: Sessions<Vec<u8>> = Sessions::new();
        let dict = sessions.build_dictionary(DICT).unwrap();
        let enc = sessions.start_encoder(dict, FormatFlags::empty(), false, Vec::new()).unwrap();
        sessions.finish_encoder(enc).unwrap();
        assert!(matches!(sessions.encode_chunk(enc, b"x"), Err(Error::InvalidState(_))));
        assert!(matches!(sessions.finish_encoder(enc), Err(Error::InvalidState(_))));
    }

    #[test]
    fn failed_decoder_is_released() {
        let mut sessions: Sessions<Vec<u8>> = Sessions::new();
        let dec = sessions.start_decoder(DICT, Vec::new());
        assert!(matches!(sessions.decode_chunk(dec, b"not a delta"), Err(Error::CorruptDelta(_))));
        assert_eq!(sessions.active_sessions(), 0);
        assert!(matches!(sessions.decode_chunk(dec, b""), Err(Error::InvalidState(_))));
        assert!(matches!(sessions.finish_decoder(dec), Err(Error::InvalidState(_))));
    }

    #[test]
    fn truncated_decoder_fails_at_finish_and_is_released() {
        let mut sessions: Sessions<Vec<u8>> = Sessions::new();
        let dict = sessions.build_dictionary(DICT).unwrap();
        let enc = sessions.start_encoder(dict, FormatFlags::empty(), true, Vec::new()).unwrap();
        sessions.encode_chunk(enc, &page("truncated")).unwrap();
        let (delta, _) = sessions.finish_encoder(enc).unwrap();

        let dec = sessions.start_decoder(DICT, Vec::new());
        sessions.decode_chunk(dec, &delta[..delta.len() - 1]).unwrap();
        assert!(matches!(sessions.finish_decoder(dec), Err(Error::TruncatedInput(_))));
        assert_eq!(sessions.active_sessions(), 0);
    }

    #[test]
    fn released_dictionary_outlives_running_encoder() {
        let mut sessions: Sessions<Vec<u8>> = Sessions::new();
        let dict = sessions.build_dictionary(DICT).unwrap();
        let enc = sessions.start_encoder(dict, FormatFlags::empty(), true, Vec::new()).unwrap();
        sessions.release_dictionary(dict).unwrap();
        assert_eq!(sessions.dictionary_count(), 0);
        assert!(matches!(sessions.release_dictionary(dict), Err(Error::InvalidState(_))));
        assert!(matches!(
            sessions.start_encoder(dict, FormatFlags::empty(), true, Vec::new()),
            Err(Error::InvalidState(_))
        ));

        let target = page("still encodes");
        sessions.encode_chunk(enc, &target).unwrap();
        let (delta, _) = sessions.finish_encoder(enc).unwrap();
        let dec = sessions.start_decoder(DICT, Vec::new());
        sessions.decode_chunk(dec, &delta).unwrap();
        assert_eq!(sessions.finish_decoder(dec).unwrap().0, target);
    }

    #[test]
    fn empty_dictionary_is_rejected() {
        let mut sessions: Sessions = Sessions::new();
        assert!(matches!(sessions.build_dictionary(Vec::new()), Err(Error::InvalidDictionary(_))));
    }

    #[test]
    fn boxed_sinks_by_default() {
        let mut sessions: Sessions = Sessions::new();
        let dict = sessions.build_dictionary(DICT).unwrap();
        let enc = sessions.start_encoder(dict, FormatFlags::INTERLEAVED, true, Box::new(Vec::new())).unwrap();
        sessions.encode_chunk(enc, &page("boxed")).unwrap();
        let (_sink, stats) = sessions.finish_encoder(enc).unwrap();
        assert_eq!(stats.windows, 1);
    }
}
