// Dictionary index.
//
// A dictionary is the fixed reference buffer every COPY with an address
// below its length reads from.  Building one hashes every aligned 16-byte
// block once; afterwards it is immutable and shared by any number of
// encoders (and its bytes by any number of decoders) through `Arc`.

use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha512_256};

use crate::error::{Error, Result};
use crate::hash::matching::IndexedSource;
use crate::hash::table::BlockTable;
use crate::vcdiff::header::HARD_MAX_WINDOW;
use crate::vcdiff::varint;

/// Stable identifier of a dictionary's contents: the first 16 bytes of its
/// SHA-512/256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictionaryId([u8; 16]);

impl DictionaryId {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha512_256::digest(bytes);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Unpadded URL-safe base64.
impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DictionaryId({self})")
    }
}

/// Immutable dictionary bytes plus their block index.
pub struct Dictionary {
    bytes: Arc<[u8]>,
    table: BlockTable,
    id: DictionaryId,
}

/// Largest dictionary whose COPY addresses, plus one full target window,
/// still fit a VCDIFF address.
pub const MAX_DICTIONARY_SIZE: usize = varint::MAX_SIZE as usize - HARD_MAX_WINDOW;

fn check_len(len: usize) -> Result<()> {
    match len {
        0 => Err(Error::InvalidDictionary("dictionary is empty")),
        n if n > MAX_DICTIONARY_SIZE => Err(Error::InvalidDictionary("dictionary too large")),
        _ => Ok(()),
    }
}

impl Dictionary {
    /// Index `bytes`.
    ///
    /// Fails with [`Error::InvalidDictionary`] if `bytes` is empty or larger
    /// than [`MAX_DICTIONARY_SIZE`].
    pub fn build(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        check_len(bytes.len())?;
        let mut table = BlockTable::new(bytes.len())
            .ok_or(Error::InvalidDictionary("dictionary too large to index"))?;
        table.add_all_blocks(&bytes);
        let id = DictionaryId::of(&bytes);
        log::debug!(
            "built dictionary {id}: {} bytes, {} blocks, {} buckets",
            bytes.len(),
            table.len(),
            table.bucket_count()
        );
        Ok(Self { bytes, table, id })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The dictionary bytes as a shareable handle, for decoders.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: empty dictionaries are rejected by [`Dictionary::build`].
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn id(&self) -> DictionaryId {
        self.id
    }

    /// Number of indexed blocks.
    pub fn blocks(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn indexed(&self) -> IndexedSource<'_> {
        IndexedSource {
            bytes: &self.bytes,
            table: &self.table,
        }
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .field("blocks", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::rolling::block_hash;

    #[test]
    fn empty_dictionary_is_rejected() {
        assert!(matches!(
            Dictionary::build(Vec::new()),
            Err(Error::InvalidDictionary(_))
        ));
    }

    #[test]
    fn oversized_dictionary_is_rejected() {
        assert!(check_len(1).is_ok());
        assert!(check_len(MAX_DICTIONARY_SIZE).is_ok());
        assert!(matches!(
            check_len(MAX_DICTIONARY_SIZE + 1),
            Err(Error::InvalidDictionary("dictionary too large"))
        ));
        // The furthest address a window can reference still parses.
        let mut buf = Vec::new();
        varint::push(&mut buf, (MAX_DICTIONARY_SIZE + HARD_MAX_WINDOW - 1) as u64);
        assert!(varint::read_size(&buf).is_ok());
    }

    #[test]
    fn short_dictionary_has_no_blocks() {
        let dict = Dictionary::build(b"tiny".to_vec()).unwrap();
        assert_eq!(dict.len(), 4);
        assert_eq!(dict.blocks(), 0);
    }

    #[test]
    fn index_covers_aligned_blocks() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let dict = Dictionary::build(bytes.clone()).unwrap();
        assert_eq!(dict.blocks(), 1000 / 16);

        let source = dict.indexed();
        let probe = &bytes[480..496];
        let found: Vec<_> = source
            .table
            .candidates(source.bytes, probe, block_hash(probe))
            .collect();
        // The byte pattern repeats every 256 bytes.
        assert_eq!(found, [224, 480, 736]);
    }

    #[test]
    fn id_depends_only_on_content() {
        let a = Dictionary::build(b"same bytes".to_vec()).unwrap();
        let b = Dictionary::build(&b"same bytes"[..]).unwrap();
        let c = Dictionary::build(b"other bytes".to_vec()).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn id_display_is_unpadded_base64() {
        let id = DictionaryId::of(b"");
        let text = id.to_string();
        // 16 bytes -> 22 characters without padding.
        assert_eq!(text.len(), 22);
        assert!(!text.contains('='));
        assert!(
            text.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_eq!(URL_SAFE_NO_PAD.decode(&text).unwrap(), id.as_bytes());
    }

    #[test]
    fn shared_bytes_are_the_same_allocation() {
        let dict = Dictionary::build(vec![1u8; 64]).unwrap();
        let shared = dict.shared_bytes();
        assert!(std::ptr::eq(shared.as_ptr(), dict.bytes().as_ptr()));
    }
}
