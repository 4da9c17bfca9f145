//! Semantic query pipeline over a [`gcq_vector_store::VectorIndex`].
//!
//! ```text
//! query ─> search provider ─> normalize ─> index scan (threshold_similarity, k)
//!       ─> min_score floor ─> neighbor context ─> hits in score order
//! ```

mod engine;
mod error;

pub use engine::{
    QueryConfig, QueryEngine, DEFAULT_MAX_CONTEXT_CHUNKS, DEFAULT_THRESHOLD_MIN_SCORE,
    DEFAULT_THRESHOLD_SIMILARITY,
};
pub use error::{Result, SearchError};
