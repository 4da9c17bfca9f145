use crate::error::{IndexerError, Result};
use crate::records::{unix_now_secs, FileRecord, FileRecords};
use crate::scanner::FileScanner;
use gcq_code_chunker::{content_hash, is_binary, Chunker, ChunkerConfig, Language};
use gcq_protocol::RoundSummary;
use gcq_vector_store::{
    ChunkMeta, EmbeddingError, SharedProvider, VectorIndex, VectorStoreError,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Files processed concurrently within a round
    pub parallelism: usize,
    pub snapshot_path: Option<PathBuf>,
    pub records_path: Option<PathBuf>,
    /// Directories inside the project that are never indexed
    pub excluded_dirs: Vec<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            parallelism: DEFAULT_PARALLELISM,
            snapshot_path: None,
            records_path: None,
            excluded_dirs: Vec::new(),
        }
    }
}

/// Result of the per-file pipeline.
#[derive(Debug)]
pub enum FileOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Removed,
    /// Not indexable (binary, excluded); any previous entries were dropped
    Skipped,
    Failed(IndexerError),
}

/// What one pass over a set of files did.
#[derive(Debug, Default)]
pub struct PassOutcome {
    pub summary: RoundSummary,
    /// Files that ended without error
    pub succeeded: Vec<String>,
    pub errors: BTreeMap<String, String>,
    /// Failed files worth retrying after a cool-down
    pub retry: Vec<String>,
}

/// What happened to the on-disk snapshot at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Loaded { chunks: usize, records: usize },
    Missing,
    Discarded(String),
}

/// Chunks, embeds and stores project files in a shared [`VectorIndex`].
pub struct ProjectIndexer {
    root: PathBuf,
    scanner: FileScanner,
    chunker: Chunker,
    provider: SharedProvider,
    index: Arc<VectorIndex>,
    records: Mutex<FileRecords>,
    config: IndexerConfig,
    persisted_revision: AtomicU64,
}

impl ProjectIndexer {
    /// Fails when `provider` would produce vectors the index cannot hold.
    pub fn new(
        root: impl AsRef<Path>,
        config: IndexerConfig,
        provider: SharedProvider,
        index: Arc<VectorIndex>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(IndexerError::InvalidPath(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let identity = index.identity();
        if provider.dimension() != identity.dimension {
            return Err(IndexerError::ProviderMismatch {
                provider: provider.name().to_string(),
                detail: format!(
                    "dimension {} differs from index dimension {}",
                    provider.dimension(),
                    identity.dimension
                ),
            });
        }
        if provider.name() != identity.provider || provider.model() != identity.model {
            return Err(IndexerError::ProviderMismatch {
                provider: provider.name().to_string(),
                detail: format!("index belongs to {identity}"),
            });
        }

        let chunker = Chunker::new(config.chunker)?;
        let scanner = config
            .excluded_dirs
            .iter()
            .fold(FileScanner::new(&root), |scanner, dir| scanner.exclude(dir.clone()));

        Ok(Self {
            root,
            scanner,
            chunker,
            provider,
            persisted_revision: AtomicU64::new(index.revision()),
            index,
            records: Mutex::new(FileRecords::default()),
            config,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    #[must_use]
    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    #[must_use]
    pub fn scanner(&self) -> &FileScanner {
        &self.scanner
    }

    fn records(&self) -> MutexGuard<'_, FileRecords> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn record(&self, rel: &str) -> Option<FileRecord> {
        self.records().get(rel).cloned()
    }

    /// Project-relative, `/`-separated form of `raw`, or `None` when it
    /// points outside the project.
    #[must_use]
    pub fn normalize_path(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let path = Path::new(raw);
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok().map(Path::to_path_buf).or_else(|| {
                let canonical_root = self.root.canonicalize().ok()?;
                path.strip_prefix(canonical_root).ok().map(Path::to_path_buf)
            })?
        } else {
            path.to_path_buf()
        };

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Load the snapshot and file records written by a previous run.
    ///
    /// An incompatible or corrupt snapshot is deleted together with the
    /// records so the next pass rebuilds everything.
    pub async fn restore(&self) -> Result<RestoreOutcome> {
        let Some(snapshot_path) = self.config.snapshot_path.clone() else {
            return Ok(RestoreOutcome::Missing);
        };
        if !snapshot_path.exists() {
            return Ok(RestoreOutcome::Missing);
        }

        let index = Arc::clone(&self.index);
        let path = snapshot_path.clone();
        let loaded = tokio::task::spawn_blocking(move || index.load(&path))
            .await
            .map_err(|e| IndexerError::Other(format!("snapshot load task failed: {e}")))?;

        let chunks = match loaded {
            Ok(chunks) => chunks,
            Err(
                err @ (VectorStoreError::IncompatibleSnapshot { .. }
                | VectorStoreError::CorruptSnapshot(_)),
            ) => {
                log::warn!("Discarding snapshot {}: {err}", snapshot_path.display());
                let _ = tokio::fs::remove_file(&snapshot_path).await;
                if let Some(records_path) = &self.config.records_path {
                    let _ = tokio::fs::remove_file(records_path).await;
                }
                return Ok(RestoreOutcome::Discarded(err.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut restored = match &self.config.records_path {
            Some(path) => FileRecords::load(path).await.unwrap_or_else(|err| {
                log::warn!("Ignoring unreadable file records {}: {err}", path.display());
                None
            }),
            None => None,
        }
        .unwrap_or_default();

        let index = &self.index;
        let dropped = restored.retain(|record| {
            record.chunk_ids.is_empty() || index.chunk_ids(&record.file_path) == record.chunk_ids
        });
        if dropped > 0 {
            log::info!("Dropped {dropped} file records that disagree with the snapshot");
        }
        let records = restored.len();
        *self.records() = restored;
        self.persisted_revision
            .store(self.index.revision(), Ordering::SeqCst);

        log::debug!(
            "Restored {chunks} chunks and {records} file records from {}",
            snapshot_path.display()
        );
        Ok(RestoreOutcome::Loaded { chunks, records })
    }

    /// Write snapshot and records if the index changed since the last write.
    /// Returns whether anything was written.
    pub async fn persist_if_changed(&self) -> Result<bool> {
        let revision = self.index.revision();
        if revision == self.persisted_revision.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(snapshot_path) = self.config.snapshot_path.clone() else {
            return Ok(false);
        };

        let started = Instant::now();
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.snapshot(&snapshot_path))
            .await
            .map_err(|e| IndexerError::Other(format!("snapshot task failed: {e}")))??;

        if let Some(records_path) = &self.config.records_path {
            let records = self.records().clone();
            records.save(records_path).await?;
        }
        self.persisted_revision.store(revision, Ordering::SeqCst);
        log::info!(
            "Persisted {} chunks in {}ms",
            self.index.len(),
            started.elapsed().as_millis()
        );
        Ok(true)
    }

    /// Per-file pipeline: hash, compare, chunk, embed, upsert, record.
    pub async fn index_file(&self, rel: &str) -> FileOutcome {
        if !self.scanner.admits(rel) {
            return self.forget(rel, FileOutcome::Skipped);
        }

        let abs = self.root.join(rel);
        let bytes = match tokio::fs::read(&abs).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return self.forget(rel, FileOutcome::Removed);
            }
            Err(err) => return FileOutcome::Failed(err.into()),
        };

        let hash = content_hash(&bytes);
        if let Some(record) = self.record(rel) {
            let stored = record.chunk_ids.is_empty() || self.index.contains_file(rel);
            if record.content_hash == hash && stored {
                return FileOutcome::Unchanged;
            }
        }

        let language = Language::from_path(rel).unwrap_or(Language::Text);
        let chunks = if is_binary(&bytes) {
            Vec::new()
        } else {
            self.chunker.chunk(rel, &bytes, language)
        };

        if chunks.is_empty() {
            self.index.remove(rel);
            self.records().insert(FileRecord {
                file_path: rel.to_string(),
                content_hash: hash,
                chunk_ids: Vec::new(),
                last_indexed_epoch: unix_now_secs(),
            });
            return FileOutcome::Skipped;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match self.provider.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(EmbeddingError::Cancelled) => return FileOutcome::Failed(IndexerError::Cancelled),
            Err(err) => return FileOutcome::Failed(err.into()),
        };
        if vectors.len() != chunks.len() {
            return FileOutcome::Failed(IndexerError::EmbeddingError(EmbeddingError::BadRequest(
                format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            )));
        }

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let entries: Vec<(ChunkMeta, Vec<f32>)> = chunks
            .iter()
            .map(ChunkMeta::from)
            .zip(vectors)
            .collect();
        if let Err(err) = self.index.upsert(rel, entries) {
            return FileOutcome::Failed(err.into());
        }

        self.records().insert(FileRecord {
            file_path: rel.to_string(),
            content_hash: hash,
            chunk_ids,
            last_indexed_epoch: unix_now_secs(),
        });
        FileOutcome::Indexed {
            chunks: chunks.len(),
        }
    }

    fn forget(&self, rel: &str, outcome: FileOutcome) -> FileOutcome {
        let removed_entries = self.index.remove(rel);
        let removed_record = self.records().remove(rel).is_some();
        match outcome {
            FileOutcome::Removed if !removed_entries && !removed_record => FileOutcome::Unchanged,
            other => other,
        }
    }

    /// Project-relative paths of every admissible file on disk.
    pub async fn scan(&self) -> Result<Vec<String>> {
        let scanner = self.scanner.clone();
        let files = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| IndexerError::Other(format!("scan task failed: {e}")))?;
        Ok(files
            .iter()
            .filter_map(|path| path.strip_prefix(&self.root).ok())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .collect())
    }

    /// Run the per-file pipeline over `paths`, plus every file on disk and
    /// every previously indexed file when `full_scan` is set.
    ///
    /// Up to `parallelism` files are processed at once. Once `cancel`
    /// fires no new file is started; files already started finish.
    pub async fn run_pass(
        self: &Arc<Self>,
        paths: Vec<String>,
        full_scan: bool,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome> {
        let started = Instant::now();
        self.scanner.reload_ignores();
        let mut seen = HashSet::new();
        let mut queue: Vec<String> = Vec::new();
        let mut push = |path: String| {
            if seen.insert(path.clone()) {
                queue.push(path);
            }
        };

        for path in paths {
            push(path);
        }
        if full_scan {
            for path in self.scan().await? {
                push(path);
            }
            let known: Vec<String> = self.records().paths().cloned().collect();
            for path in known.into_iter().chain(self.index.files()) {
                push(path);
            }
        }

        let mut outcome = PassOutcome::default();
        outcome.summary.full_scan = full_scan;

        let permits = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut tasks: JoinSet<(String, FileOutcome)> = JoinSet::new();
        for path in queue {
            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = cancel.cancelled() => break,
            };
            if cancel.is_cancelled() {
                break;
            }
            let indexer = Arc::clone(self);
            tasks.spawn(async move {
                let result = indexer.index_file(&path).await;
                drop(permit);
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, result)) => outcome.record(path, result),
                Err(err) => log::error!("Indexing task panicked: {err}"),
            }
        }

        outcome.summary.cancelled = cancel.is_cancelled();
        outcome.summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::info!(
            "Pass finished in {}ms: {} indexed, {} unchanged, {} removed, {} failed",
            outcome.summary.duration_ms,
            outcome.summary.files_indexed,
            outcome.summary.files_unchanged,
            outcome.summary.files_removed,
            outcome.summary.files_failed,
        );
        Ok(outcome)
    }
}

impl PassOutcome {
    fn record(&mut self, path: String, result: FileOutcome) {
        let summary = &mut self.summary;
        match result {
            FileOutcome::Indexed { chunks } => {
                summary.files_indexed += 1;
                summary.chunks_embedded += chunks;
                self.succeeded.push(path);
            }
            FileOutcome::Unchanged | FileOutcome::Skipped => {
                summary.files_unchanged += 1;
                self.succeeded.push(path);
            }
            FileOutcome::Removed => {
                summary.files_removed += 1;
                self.succeeded.push(path);
            }
            FileOutcome::Failed(IndexerError::Cancelled) => {}
            FileOutcome::Failed(err) => {
                log::warn!("Failed to index {path}: {err}");
                if err.is_retriable() {
                    summary.files_deferred += 1;
                    self.retry.push(path.clone());
                }
                summary.files_failed += 1;
                self.errors.insert(path, err.to_string());
            }
        }
    }
}
