#![no_main]
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use oxivcd::{DecoderOptions, Dictionary, EncoderOptions, FormatFlags, StreamingDecoder, StreamingEncoder};

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }

    let level = (data[0] % 10) as u32;
    let format = FormatFlags::from_bits_truncate(data[1]);
    let window_size = 1 + data[2] as usize * 64;
    let split = 4 + (data[3] as usize % (data.len() - 4));
    let Ok(dictionary) = Dictionary::build(&data[4..split]) else {
        return;
    };
    let dictionary = Arc::new(dictionary);
    let target = &data[split..];

    let options = EncoderOptions {
        level,
        window_size,
        format,
        target_matches: data[1] & 0x80 == 0,
    };
    let mut encoder = StreamingEncoder::new(Arc::clone(&dictionary), Vec::new(), options);
    encoder.start().unwrap();
    for chunk in target.chunks(1 + data[3] as usize) {
        encoder.encode_chunk(chunk).unwrap();
    }
    encoder.finish().unwrap();
    let delta = encoder.into_sink();

    let mut decoder = StreamingDecoder::new(dictionary.shared_bytes(), Vec::new(), DecoderOptions::default());
    decoder.decode_chunk(&delta).unwrap();
    decoder.finish().unwrap();
    assert_eq!(decoder.into_sink(), target);
});
