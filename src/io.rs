// File-level encode and decode.
//
// `encode_file()` and `decode_file()` stream a target or delta file through
// a session in fixed-size reads, writing through a `BufWriter`.  With the
// `file-io` feature, SHA-256 digests of the dictionary, target and decoded
// output are computed on the way through.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "file-io")]
use sha2::{Digest, Sha256};

use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::sink::{IoSink, OutputSink};
use crate::stream::{DecoderOptions, EncoderOptions, StreamingDecoder, StreamingEncoder};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `encode_file()`.
#[derive(Debug, Clone)]
pub struct FileEncodeStats {
    pub dictionary_size: u64,
    pub target_size: u64,
    pub delta_size: u64,
    /// Number of VCDIFF windows written.
    pub windows: u64,
    /// COPY instructions emitted.
    pub copies: u64,
    /// SHA-256 of the dictionary file (if `file-io` feature is enabled).
    pub dictionary_sha256: Option<[u8; 32]>,
    /// SHA-256 of the target file (if `file-io` feature is enabled).
    pub target_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `decode_file()`.
#[derive(Debug, Clone)]
pub struct FileDecodeStats {
    pub dictionary_size: u64,
    pub delta_size: u64,
    pub output_size: u64,
    /// Number of VCDIFF windows decoded.
    pub windows: u64,
    /// SHA-256 of the reconstructed output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// encode_file
// ---------------------------------------------------------------------------

/// Encode `target_path` against the dictionary at `dictionary_path`,
/// writing the delta to `delta_path`.
///
/// The dictionary is read fully into memory; the target is streamed.
pub fn encode_file(
    dictionary_path: &Path,
    target_path: &Path,
    delta_path: &Path,
    options: EncoderOptions,
) -> Result<FileEncodeStats> {
    let bytes = std::fs::read(dictionary_path)?;
    let dictionary_sha256 = digest(&bytes);
    let dictionary = Arc::new(Dictionary::build(bytes)?);

    let target_file = File::open(target_path)?;
    let mut target_reader = BufReader::with_capacity(BUF_SIZE, target_file);
    let delta_writer = BufWriter::with_capacity(BUF_SIZE, File::create(delta_path)?);

    let mut encoder = StreamingEncoder::new(Arc::clone(&dictionary), IoSink::new(delta_writer), options);
    encoder.start()?;

    let mut target_hash = Hasher::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match target_reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        target_hash.update(&buf[..n]);
        encoder.encode_chunk(&buf[..n])?;
    }

    let stats = encoder.finish()?;
    encoder.into_sink().into_inner().flush()?;

    Ok(FileEncodeStats {
        dictionary_size: dictionary.len() as u64,
        target_size: stats.bytes_in,
        delta_size: stats.bytes_out,
        windows: stats.windows,
        copies: stats.copies,
        dictionary_sha256,
        target_sha256: target_hash.finish(),
    })
}

// ---------------------------------------------------------------------------
// decode_file
// ---------------------------------------------------------------------------

/// Decode `delta_path` against the dictionary at `dictionary_path`, writing
/// the reconstructed target to `output_path`.
pub fn decode_file(
    dictionary_path: &Path,
    delta_path: &Path,
    output_path: &Path,
    options: DecoderOptions,
) -> Result<FileDecodeStats> {
    let dictionary = std::fs::read(dictionary_path)?;
    let dictionary_size = dictionary.len() as u64;

    let delta_file = File::open(delta_path)?;
    let mut delta_reader = BufReader::with_capacity(BUF_SIZE, delta_file);
    let output_writer = BufWriter::with_capacity(BUF_SIZE, File::create(output_path)?);

    let sink = HashingSink {
        inner: IoSink::new(output_writer),
        hash: Hasher::new(),
    };
    let mut decoder = StreamingDecoder::new(dictionary, sink, options);

    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match delta_reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        decoder.decode_chunk(&buf[..n])?;
    }

    let stats = decoder.finish()?;
    let sink = decoder.into_sink();
    sink.inner.into_inner().flush()?;

    Ok(FileDecodeStats {
        dictionary_size,
        delta_size: stats.bytes_in,
        output_size: stats.bytes_out,
        windows: stats.windows,
        output_sha256: sink.hash.finish(),
    })
}

/// Lowercase hex of a digest, for display.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Hashing (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
fn digest(bytes: &[u8]) -> Option<[u8; 32]> {
    Some(Sha256::digest(bytes).into())
}

#[cfg(not(feature = "file-io"))]
fn digest(_bytes: &[u8]) -> Option<[u8; 32]> {
    None
}

/// SHA-256 accumulator that compiles to nothing without `file-io`.
struct Hasher {
    #[cfg(feature = "file-io")]
    inner: Sha256,
}

impl Hasher {
    fn new() -> Self {
        Self {
            #[cfg(feature = "file-io")]
            inner: Sha256::new(),
        }
    }

    #[cfg_attr(not(feature = "file-io"), allow(unused_variables))]
    fn update(&mut self, bytes: &[u8]) {
        #[cfg(feature = "file-io")]
        self.inner.update(bytes);
    }

    fn finish(self) -> Option<[u8; 32]> {
        #[cfg(feature = "file-io")]
        return Some(self.inner.finalize().into());
        #[cfg(not(feature = "file-io"))]
        None
    }
}

/// Hashes everything appended before passing it on.
struct HashingSink<W: Write> {
    inner: IoSink<W>,
    hash: Hasher,
}

impl<W: Write> OutputSink for HashingSink<W> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.append(bytes)?;
        self.hash.update(bytes);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::path::PathBuf;

    fn write_temp_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn encode_decode_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dictionary_data = b"The quick brown fox jumps over the lazy dog. 1234567890";
        let target_data = b"The quick brown cat sits on the lazy mat. 1234567890!!!";

        let dictionary_path = write_temp_file(&dir, "dict.bin", dictionary_data);
        let target_path = write_temp_file(&dir, "target.bin", target_data);
        let delta_path = dir.path().join("delta.vcdiff");
        let output_path = dir.path().join("output.bin");

        let enc = encode_file(&dictionary_path, &target_path, &delta_path, EncoderOptions::default()).unwrap();
        assert_eq!(enc.dictionary_size, dictionary_data.len() as u64);
        assert_eq!(enc.target_size, target_data.len() as u64);
        assert_eq!(enc.delta_size, std::fs::metadata(&delta_path).unwrap().len());
        assert_eq!(enc.windows, 1);

        let dec = decode_file(&dictionary_path, &delta_path, &output_path, DecoderOptions::default()).unwrap();
        assert_eq!(dec.output_size, target_data.len() as u64);
        assert_eq!(dec.windows, 1);
        assert_eq!(std::fs::read(&output_path).unwrap(), target_data);
    }

    #[test]
    fn empty_dictionary_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dictionary_path = write_temp_file(&dir, "empty.bin", b"");
        let target_path = write_temp_file(&dir, "target.bin", b"data");
        let err = encode_file(
            &dictionary_path,
            &target_path,
            &dir.path().join("delta"),
            EncoderOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDictionary(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode_file(
            &dir.path().join("nope"),
            &dir.path().join("nope.vcdiff"),
            &dir.path().join("out"),
            DecoderOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_checksums_computed() {
        let dir = tempfile::tempdir().unwrap();
        let dictionary_path = write_temp_file(&dir, "dict.bin", b"dictionary for checksum test");
        let target_path = write_temp_file(&dir, "target.bin", b"target for checksum test");
        let delta_path = dir.path().join("delta.vcdiff");
        let output_path = dir.path().join("output.bin");

        let enc = encode_file(&dictionary_path, &target_path, &delta_path, EncoderOptions::default()).unwrap();
        let dec = decode_file(&dictionary_path, &delta_path, &output_path, DecoderOptions::default()).unwrap();

        assert_eq!(enc.target_sha256, Some(Sha256::digest(b"target for checksum test").into()));
        assert_eq!(dec.output_sha256, enc.target_sha256);
        assert!(enc.dictionary_sha256.is_some());
        assert_eq!(hex(&enc.target_sha256.unwrap()).len(), 64);
    }

    #[test]
    fn large_file_multi_window() {
        let dir = tempfile::tempdir().unwrap();
        let dictionary_data: Vec<u8> = (0..=255u8).cycle().take(1 << 20).collect();
        let mut target_data = dictionary_data.clone();
        for i in (0..target_data.len()).step_by(4096) {
            target_data[i] = target_data[i].wrapping_add(1);
        }

        let dictionary_path = write_temp_file(&dir, "large_dict.bin", &dictionary_data);
        let target_path = write_temp_file(&dir, "large_target.bin", &target_data);
        let delta_path = dir.path().join("large.vcdiff");
        let output_path = dir.path().join("large.out");

        let options = EncoderOptions {
            window_size: 64 * 1024,
            ..EncoderOptions::default()
        };
        let enc = encode_file(&dictionary_path, &target_path, &delta_path, options).unwrap();
        assert_eq!(enc.windows, 16);
        assert!(enc.delta_size < enc.target_size / 4, "delta should be much smaller than target");

        let dec = decode_file(&dictionary_path, &delta_path, &output_path, DecoderOptions::default()).unwrap();
        assert_eq!(dec.output_size, target_data.len() as u64);
        assert_eq!(std::fs::read(&output_path).unwrap(), target_data);
    }
}
