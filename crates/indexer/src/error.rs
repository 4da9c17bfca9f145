use gcq_protocol::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] gcq_code_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] gcq_vector_store::VectorStoreError),

    #[error("Embedding error: {0}")]
    EmbeddingError(#[from] gcq_vector_store::EmbeddingError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("provider {provider} does not match index: {detail}")]
    ProviderMismatch { provider: String, detail: String },

    #[error("indexing cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IoError(_) | Self::JsonError(_) | Self::InvalidPath(_) => ErrorKind::IoError,
            Self::ChunkerError(_) => ErrorKind::ConfigError,
            Self::VectorStoreError(e) => e.kind(),
            Self::EmbeddingError(e) => e.kind(),
            Self::ProviderMismatch { .. } => ErrorKind::ProviderMismatch,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether a file that failed this way should be retried after a cool-down.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::IoError
                | ErrorKind::ProviderTransient
                | ErrorKind::ProviderBadRequest
                | ErrorKind::ProviderUnavailable
        )
    }
}
