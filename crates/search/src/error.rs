use gcq_protocol::ErrorKind;
use gcq_vector_store::{EmbeddingError, IndexIdentity, VectorStoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Empty query")]
    EmptyQuery,

    #[error("search provider {search} is incompatible with index {index}")]
    ProviderMismatch {
        index: IndexIdentity,
        search: IndexIdentity,
    },

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("query cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyQuery => ErrorKind::BadRequest,
            Self::ProviderMismatch { .. } => ErrorKind::ProviderMismatch,
            Self::Embedding(e) => e.kind(),
            Self::VectorStore(e) => e.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
