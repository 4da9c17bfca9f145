use crate::language::Language;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters kept from the sha256 digest of a chunk identity.
const CHUNK_ID_HEX_LEN: usize = 32;

/// A contiguous byte window of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Path relative to the project root, `/`-separated
    pub file_path: String,
    /// Inclusive start offset
    pub byte_start: u64,
    /// Exclusive end offset
    pub byte_end: u64,
    /// 1-based line of `byte_start`
    pub line_start: u32,
    /// 1-based line of the last byte in the window
    pub line_end: u32,
    pub text: String,
    pub language: Language,
}

impl Chunk {
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.byte_end - self.byte_start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.byte_end == self.byte_start
    }
}

/// Hex sha256 of raw content.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable identifier of a window: hash of path, offsets and the window's content hash.
#[must_use]
pub fn chunk_id(file_path: &str, byte_start: u64, byte_end: u64, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0]);
    hasher.update(byte_start.to_le_bytes());
    hasher.update(byte_end.to_le_bytes());
    hasher.update(content_hash.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(CHUNK_ID_HEX_LEN);
    id
}
