//! # gcq vector store
//!
//! Embedding providers and the in-memory vector index they feed.
//!
//! ```text
//! texts ──> EmbeddingProvider::embed ──> unit vectors
//!                                            │
//!                       VectorIndex::upsert <┘   (per-file atomic swap)
//!                              │
//!             query (dot product) / snapshot / load
//! ```

pub mod embeddings;
mod error;
mod index;
mod snapshot;

pub use embeddings::{
    build_provider, describe, l2_normalize, EmbeddingProvider, HttpProvider, LocalProvider,
    ProviderKind, ProviderSpec, RetryPolicy, SharedProvider,
};
pub use error::{EmbeddingError, Result, VectorStoreError};
pub use index::{ChunkMeta, IndexEntry, IndexIdentity, ScoredChunk, VectorIndex, NORM_TOLERANCE};
pub use snapshot::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
