//! # gcq code chunker
//!
//! Splits file contents into overlapping byte windows with stable
//! identifiers. Windows are measured in bytes so boundaries are cheap to
//! compute and reproducible across runs.
//!
//! ## Example
//!
//! ```
//! use gcq_code_chunker::{Chunker, ChunkerConfig, Language};
//!
//! let chunker = Chunker::new(ChunkerConfig::new(16, 0).unwrap()).unwrap();
//! let chunks = chunker.chunk_str("a.txt", "alpha beta gamma", Language::Text);
//! assert_eq!(chunks.len(), 1);
//! ```

mod chunk;
mod chunker;
mod config;
mod error;
mod language;

pub use chunk::{chunk_id, content_hash, Chunk};
pub use chunker::{is_binary, Chunker, BINARY_SNIFF_LEN};
pub use config::{ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use error::{ChunkerError, Result};
pub use language::Language;
