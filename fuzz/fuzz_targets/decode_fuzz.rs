#![no_main]
use libfuzzer_sys::fuzz_target;
use oxivcd::{DecoderOptions, StreamingDecoder};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors.
    if data.len() < 2 {
        return;
    }
    let piece = 1 + data[0] as usize % 64;
    let split = data[1] as usize % (data.len() - 1);
    let (dictionary, delta) = data[2..].split_at(split.min(data.len() - 2));

    let options = DecoderOptions {
        max_window_size: 1 << 20,
        max_target_size: 1 << 22,
        ..DecoderOptions::default()
    };
    let mut decoder = StreamingDecoder::new(dictionary, Vec::new(), options);
    for chunk in delta.chunks(piece) {
        if decoder.decode_chunk(chunk).is_err() {
            return;
        }
    }
    let _ = decoder.finish();
});
