use crate::index::IndexIdentity;
use gcq_protocol::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("incompatible snapshot: index is {expected}, snapshot is {found}")]
    IncompatibleSnapshot {
        expected: IndexIdentity,
        found: IndexIdentity,
    },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector for chunk {chunk_id}: {reason}")]
    InvalidVector { chunk_id: String, reason: String },

    #[error("snapshot encoding error: {0}")]
    Encoding(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl VectorStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::IoError,
            Self::IncompatibleSnapshot { .. } | Self::CorruptSnapshot(_) => {
                ErrorKind::IncompatibleSnapshot
            }
            Self::DimensionMismatch { .. } | Self::InvalidVector { .. } | Self::Encoding(_) => {
                ErrorKind::Internal
            }
            Self::Embedding(e) => e.kind(),
        }
    }
}

/// Failures reported by an embedding provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Retriable; only escapes a provider through `Unavailable`.
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider rejected request: {0}")]
    BadRequest(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider configuration error: {0}")]
    Config(String),

    #[error("embedding cancelled")]
    Cancelled,
}

impl EmbeddingError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::ProviderTransient,
            Self::BadRequest(_) => ErrorKind::ProviderBadRequest,
            Self::Unavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Config(_) => ErrorKind::ConfigError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
