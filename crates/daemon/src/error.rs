use gcq_protocol::{ErrorKind, WireError};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("another daemon is running (lock held on {})", .path.display())]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },

    #[error("index is not ready yet")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Indexer error: {0}")]
    Indexer(#[from] gcq_indexer::IndexerError),

    #[error("Search error: {0}")]
    Search(#[from] gcq_search::SearchError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] gcq_vector_store::EmbeddingError),

    #[error("Chunker error: {0}")]
    Chunker(#[from] gcq_code_chunker::ChunkerError),
}

impl DaemonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Chunker(_) => ErrorKind::ConfigError,
            Self::AlreadyRunning { .. } => ErrorKind::Internal,
            Self::NotReady => ErrorKind::NotReady,
            Self::Io(_) | Self::Json(_) => ErrorKind::IoError,
            Self::Indexer(e) => e.kind(),
            Self::Search(e) => e.kind(),
            Self::Embedding(e) => e.kind(),
        }
    }

    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError::new(self.kind(), self.to_string())
    }
}
