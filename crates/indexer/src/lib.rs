//! # gcq indexer
//!
//! Keeps a project's vector index in step with the files on disk.
//!
//! ## Pipeline
//!
//! ```text
//! notify(path) ──> DirtySet ──(threshold | debounce | reindex)──> Scheduler
//!                                                                    │
//!     ┌──────────────────────────────────────────────────────────────┘
//!     ▼
//! Draining ──> Indexing ──────────────────────────────> Persisting ──> Idle
//!               │  per file, up to `parallelism` at once:   │
//!               │  hash ─> compare FileRecord ─> chunk ─>   └─> index.idx
//!               │  embed (warm provider) ─> upsert               records.json
//!               └─ failures: per-file error map, retriable ones deferred
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use gcq_indexer::{DirtySet, IndexerConfig, ProjectIndexer, Scheduler, SchedulerConfig};
//! use gcq_vector_store::{IndexIdentity, SharedProvider, VectorIndex};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn watch(provider: SharedProvider) -> gcq_indexer::Result<()> {
//!     let identity = IndexIdentity::new(provider.name(), provider.model(), provider.dimension());
//!     let index = Arc::new(VectorIndex::new(identity));
//!     let indexer = Arc::new(ProjectIndexer::new(
//!         "/path/to/project",
//!         IndexerConfig::default(),
//!         provider,
//!         index,
//!     )?);
//!
//!     let scheduler = Scheduler::start(
//!         indexer,
//!         Arc::new(DirtySet::new()),
//!         SchedulerConfig::default(),
//!         CancellationToken::new(),
//!     );
//!     scheduler.wait_ready().await;
//!     scheduler.mark_dirty("src/main.rs");
//!     Ok(())
//! }
//! ```

mod dirty;
mod error;
mod indexer;
mod records;
mod scanner;
mod scheduler;

pub use dirty::DirtySet;
pub use error::{IndexerError, Result};
pub use indexer::{
    FileOutcome, IndexerConfig, PassOutcome, ProjectIndexer, RestoreOutcome, DEFAULT_PARALLELISM,
};
pub use records::{FileRecord, FileRecords, RECORDS_FILE_NAME};
pub use scanner::{FileScanner, BINARY_EXTENSIONS, EXCLUDED_DIRS, IGNORE_FILE};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerStatus, DEFAULT_DEBOUNCE, DEFAULT_DIRTY_THRESHOLD,
};
