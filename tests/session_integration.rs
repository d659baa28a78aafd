// Host-facing session API: handles, lifecycle errors and sharing a
// dictionary between threads.

use std::sync::{Arc, Mutex};
use std::thread;

use oxivcd::{
    DecoderOptions, Dictionary, EncoderOptions, Error, FormatFlags, OutputSink, Sessions, StreamingDecoder,
    StreamingEncoder,
};

const DICT: &[u8] = b"GET /api/v1/items?page=1 HTTP/1.1\r\nHost: example.com\r\nAccept: application/json\r\n\r\n";

fn request(page: usize) -> Vec<u8> {
    format!("GET /api/v1/items?page={page} HTTP/1.1\r\nHost: example.com\r\nAccept: application/json\r\n\r\n")
        .into_bytes()
}

/// A sink shared with the test so output can be inspected while the
/// session still owns it.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl OutputSink for SharedSink {
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("poisoned"))?
            .extend_from_slice(bytes);
        Ok(())
    }
}

#[test]
fn interleaved_sessions_do_not_interfere() {
    let mut sessions: Sessions<Vec<u8>> = Sessions::new();
    let dict = sessions.build_dictionary(DICT).unwrap();

    let a = sessions.start_encoder(dict, FormatFlags::empty(), true, Vec::new()).unwrap();
    let b = sessions.start_encoder(dict, FormatFlags::INTERLEAVED, true, Vec::new()).unwrap();
    let (ta, tb) = (request(2), request(3));
    for (ca, cb) in ta.chunks(9).zip(tb.chunks(9)) {
        sessions.encode_chunk(a, ca).unwrap();
        sessions.encode_chunk(b, cb).unwrap();
    }
    assert_eq!(sessions.active_sessions(), 2);
    let (da, _) = sessions.finish_encoder(a).unwrap();
    let (db, _) = sessions.finish_encoder(b).unwrap();

    let x = sessions.start_decoder(DICT, Vec::new());
    let y = sessions.start_decoder(DICT, Vec::new());
    sessions.decode_chunk(x, &da).unwrap();
    sessions.decode_chunk(y, &db).unwrap();
    assert_eq!(sessions.finish_decoder(y).unwrap().0, tb);
    assert_eq!(sessions.finish_decoder(x).unwrap().0, ta);
    assert_eq!(sessions.active_sessions(), 0);
}

#[test]
fn stale_handle_never_reaches_a_reused_slot() {
    let mut sessions: Sessions<Vec<u8>> = Sessions::new();
    let dict = sessions.build_dictionary(DICT).unwrap();
    let old = sessions.start_encoder(dict, FormatFlags::empty(), true, Vec::new()).unwrap();
    sessions.finish_encoder(old).unwrap();
    let new = sessions.start_encoder(dict, FormatFlags::empty(), true, Vec::new()).unwrap();
    assert_ne!(old, new);
    assert!(matches!(sessions.encode_chunk(old, b"x"), Err(Error::InvalidState(_))));
    sessions.encode_chunk(new, b"x").unwrap();
    sessions.finish_encoder(new).unwrap();
}

#[test]
fn decoder_output_is_visible_before_finish() {
    let mut sessions: Sessions<SharedSink> = Sessions::new();
    let dict = sessions.build_dictionary(DICT).unwrap();
    let enc = sessions
        .start_encoder(dict, FormatFlags::INTERLEAVED, true, SharedSink::default())
        .unwrap();
    let target = request(42);
    sessions.encode_chunk(enc, &target).unwrap();
    let (delta_sink, _) = sessions.finish_encoder(enc).unwrap();
    let delta = delta_sink.0.lock().unwrap().clone();

    let out = SharedSink::default();
    let dec = sessions.start_decoder(DICT, out.clone());
    sessions.decode_chunk(dec, &delta[..delta.len() - 1]).unwrap();
    let partial = out.0.lock().unwrap().len();
    assert!(partial > 0 && partial < target.len(), "partial output {partial}");
    sessions.decode_chunk(dec, &delta[delta.len() - 1..]).unwrap();
    sessions.finish_decoder(dec).unwrap();
    assert_eq!(*out.0.lock().unwrap(), target);
}

#[test]
fn one_dictionary_many_threads() {
    let dictionary = Arc::new(Dictionary::build(DICT).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|page| {
            let dictionary = Arc::clone(&dictionary);
            thread::spawn(move || {
                let target = request(page * 1000);
                let mut encoder = StreamingEncoder::new(Arc::clone(&dictionary), Vec::new(), EncoderOptions::default());
                encoder.start().unwrap();
                encoder.encode_chunk(&target).unwrap();
                encoder.finish().unwrap();
                let delta = encoder.into_sink();

                let mut decoder = StreamingDecoder::new(dictionary.shared_bytes(), Vec::new(), DecoderOptions::default());
                decoder.decode_chunk(&delta).unwrap();
                decoder.finish().unwrap();
                assert_eq!(decoder.into_sink(), target);
                delta.len()
            })
        })
        .collect();
    for handle in handles {
        let delta_len = handle.join().unwrap();
        assert!(delta_len < request(0).len());
    }
}

#[test]
fn sessions_can_move_between_threads() {
    let mut sessions: Sessions = Sessions::new();
    let dict = sessions.build_dictionary(DICT).unwrap();
    let enc = sessions.start_encoder(dict, FormatFlags::CHECKSUM, true, Box::new(Vec::<u8>::new())).unwrap();
    let (sessions, enc) = thread::spawn(move || {
        sessions.encode_chunk(enc, &request(7)).unwrap();
        (sessions, enc)
    })
    .join()
    .unwrap();
    let mut sessions = sessions;
    let (_sink, stats) = sessions.finish_encoder(enc).unwrap();
    assert_eq!(stats.bytes_in, request(7).len() as u64);
}
