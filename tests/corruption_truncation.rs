// Hostile and incomplete deltas: every failure is an error value, never a
// panic, and truncation is told apart from corruption.

use std::sync::Arc;

use oxivcd::vcdiff::WindowIter;
use oxivcd::{DecoderOptions, Dictionary, EncoderOptions, Error, FormatFlags, StreamingDecoder, StreamingEncoder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn corpus() -> (Vec<u8>, Vec<u8>) {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let dictionary: Vec<u8> = (0..6000).map(|i| b"abcdefghijklmnop"[(i * 7 + i / 13) % 16]).collect();
    let mut target = dictionary[500..4500].to_vec();
    for _ in 0..40 {
        let at = rng.random_range(0..target.len());
        target[at] = rng.random();
    }
    target.extend((0..300).map(|_| rng.random::<u8>()));
    (dictionary, target)
}

fn encode(dictionary: &[u8], target: &[u8], format: FormatFlags, window_size: usize) -> Vec<u8> {
    let dictionary = Arc::new(Dictionary::build(dictionary.to_vec()).unwrap());
    let options = EncoderOptions {
        format,
        window_size,
        ..EncoderOptions::default()
    };
    let mut encoder = StreamingEncoder::new(dictionary, Vec::new(), options);
    encoder.start().unwrap();
    encoder.encode_chunk(target).unwrap();
    encoder.finish().unwrap();
    encoder.into_sink()
}

fn decode(dictionary: &[u8], delta: &[u8], options: DecoderOptions) -> Result<Vec<u8>, Error> {
    let mut decoder = StreamingDecoder::new(dictionary.to_vec(), Vec::new(), options);
    decoder.decode_chunk(delta)?;
    decoder.finish()?;
    Ok(decoder.into_sink())
}

/// Byte offsets at which a window ends, including the end of the delta.
fn window_ends(delta: &[u8]) -> Vec<usize> {
    let (_, windows) = WindowIter::new(delta).unwrap();
    let mut starts: Vec<usize> = windows.map(|w| w.unwrap().offset).collect();
    starts.remove(0);
    starts.push(delta.len());
    starts
}

#[test]
fn truncation_inside_a_window_is_reported() {
    let (dictionary, target) = corpus();
    for format in [FormatFlags::empty(), FormatFlags::INTERLEAVED, FormatFlags::CHECKSUM] {
        let delta = encode(&dictionary, &target, format, 1024);
        let ends = window_ends(&delta);
        for cut in (6..delta.len()).filter(|c| !ends.contains(c)) {
            match decode(&dictionary, &delta[..cut], DecoderOptions::default()) {
                Err(Error::TruncatedInput(_)) => {}
                other => panic!("{format:?} cut at {cut}: {other:?}"),
            }
        }
    }
}

#[test]
fn truncation_between_windows_needs_expected_size() {
    let (dictionary, target) = corpus();
    let delta = encode(&dictionary, &target, FormatFlags::empty(), 1024);
    let ends = window_ends(&delta);
    assert!(ends.len() > 2);

    let expecting = DecoderOptions {
        expected_target_size: Some(target.len() as u64),
        ..DecoderOptions::default()
    };
    for (i, &cut) in ends[..ends.len() - 1].iter().enumerate() {
        let prefix = decode(&dictionary, &delta[..cut], DecoderOptions::default()).unwrap();
        assert_eq!(prefix, &target[..(i + 1) * 1024]);
        assert!(matches!(
            decode(&dictionary, &delta[..cut], expecting),
            Err(Error::TruncatedInput(_))
        ));
    }
    assert_eq!(decode(&dictionary, &delta, expecting).unwrap(), target);
}

#[test]
fn overlong_stream_exceeds_expected_size() {
    let (dictionary, target) = corpus();
    let delta = encode(&dictionary, &target, FormatFlags::empty(), 1024);
    let options = DecoderOptions {
        expected_target_size: Some(1000),
        ..DecoderOptions::default()
    };
    assert!(matches!(decode(&dictionary, &delta, options), Err(Error::CorruptDelta(_))));
}

#[test]
fn header_rejections() {
    let window = [0x00, 9, 3, 0x00, 3, 1, 0, b'a', b'b', b'c', 4];
    let cases: [&[u8]; 5] = [
        b"\xD6\xC3\xC5\x00\x00",
        b"\xD6\xC3\xC4\x07\x00",
        b"\xD6\xC3\xC4\x00\x01",
        b"\xD6\xC3\xC4\x00\x02",
        b"\xD6\xC3\xC4\x00\x80",
    ];
    for header in cases {
        let delta = [header, &window[..]].concat();
        assert!(
            matches!(decode(b"d", &delta, DecoderOptions::default()), Err(Error::CorruptDelta(_))),
            "{header:02x?}"
        );
    }
}

#[test]
fn application_header_is_skipped() {
    let delta = [
        &[0xD6, 0xC3, 0xC4, 0x00, 0x04, 3, b'x', b'y', b'z'][..],
        &[0x00, 9, 3, 0x00, 3, 1, 0, b'a', b'b', b'c', 4],
    ]
    .concat();
    assert_eq!(decode(b"d", &delta, DecoderOptions::default()).unwrap(), b"abc");
}

#[test]
fn standard_checksum_is_verified() {
    // Adler-32 of "abc", big-endian.
    let window = |sum: [u8; 4]| {
        [
            &[0xD6, 0xC3, 0xC4, 0x00, 0x00, 0x04, 13, 3, 0x00, 3, 1, 0][..],
            &sum,
            &[b'a', b'b', b'c', 4],
        ]
        .concat()
    };
    let good = window([0x02, 0x4D, 0x01, 0x27]);
    assert_eq!(decode(b"d", &good, DecoderOptions::default()).unwrap(), b"abc");

    let bad = window([0x02, 0x4D, 0x01, 0x28]);
    assert!(matches!(decode(b"d", &bad, DecoderOptions::default()), Err(Error::CorruptDelta(_))));
    let lenient = DecoderOptions {
        verify_checksum: false,
        ..DecoderOptions::default()
    };
    assert_eq!(decode(b"d", &bad, lenient).unwrap(), b"abc");
}

#[test]
fn damaged_data_fails_checksum() {
    let (dictionary, target) = corpus();
    let mut delta = encode(&dictionary, &target, FormatFlags::CHECKSUM, 1 << 20);
    let (_, mut windows) = WindowIter::new(&delta).unwrap();
    let window = windows.next().unwrap().unwrap();
    assert!(window.header.data_len > 0);
    let data_at = delta.len() - window.body.len();
    delta[data_at] ^= 0x01;
    assert!(matches!(
        decode(&dictionary, &delta, DecoderOptions::default()),
        Err(Error::CorruptDelta(_))
    ));
}

#[test]
fn window_limit_is_enforced() {
    let (dictionary, target) = corpus();
    let delta = encode(&dictionary, &target, FormatFlags::empty(), 1 << 20);
    let options = DecoderOptions {
        max_window_size: 1024,
        ..DecoderOptions::default()
    };
    assert!(matches!(decode(&dictionary, &delta, options), Err(Error::CorruptDelta(_))));
}

#[test]
fn failed_decoder_stays_failed() {
    let mut decoder = StreamingDecoder::new(b"dict".to_vec(), Vec::new(), DecoderOptions::default());
    assert!(decoder.decode_chunk(b"not a delta").is_err());
    assert!(matches!(decoder.decode_chunk(b"\xD6\xC3\xC4\x00\x00"), Err(Error::InvalidState(_))));
    assert!(matches!(decoder.finish(), Err(Error::InvalidState(_))));
}

#[test]
fn bit_flips_never_panic() {
    let (dictionary, target) = corpus();
    for format in [FormatFlags::empty(), FormatFlags::INTERLEAVED | FormatFlags::CHECKSUM] {
        let delta = encode(&dictionary, &target[..1500], format, 512);
        for byte in 0..delta.len() {
            for bit in 0..8 {
                let mut damaged = delta.clone();
                damaged[byte] ^= 1 << bit;
                let _ = decode(&dictionary, &damaged, DecoderOptions::default());
            }
        }
    }
}

#[test]
fn random_bodies_never_panic() {
    let mut rng = StdRng::seed_from_u64(7);
    let dictionary = b"a small dictionary for garbage windows";
    for version in [0x00, b'S'] {
        for _ in 0..2000 {
            let len = rng.random_range(0..64);
            let mut delta = vec![0xD6, 0xC3, 0xC4, version, 0x00];
            delta.extend((0..len).map(|_| rng.random::<u8>()));
            let mut decoder = StreamingDecoder::new(&dictionary[..], Vec::new(), DecoderOptions::default());
            for chunk in delta.chunks(rng.random_range(1..8)) {
                if decoder.decode_chunk(chunk).is_err() {
                    break;
                }
            }
            let _ = decoder.finish();
        }
    }
}
