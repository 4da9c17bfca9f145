use crate::embeddings::l2_normalize;
use crate::error::{Result, VectorStoreError};
use gcq_code_chunker::Chunk;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stored vectors must have unit norm within this tolerance.
pub const NORM_TOLERANCE: f32 = 1e-5;

/// The `(provider, model, dimension)` triple every stored vector shares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexIdentity {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

impl IndexIdentity {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimension,
        }
    }
}

impl fmt::Display for IndexIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (dim {})", self.provider, self.model, self.dimension)
    }
}

/// Location of a chunk; the text itself stays on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: String,
    pub file_path: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub line_start: u32,
    pub line_end: u32,
}

impl From<&Chunk> for ChunkMeta {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            byte_start: chunk.byte_start,
            byte_end: chunk.byte_end,
            line_start: chunk.line_start,
            line_end: chunk.line_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub meta: ChunkMeta,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub meta: ChunkMeta,
    pub score: f32,
}

#[derive(Default)]
pub(crate) struct IndexState {
    pub(crate) files: BTreeMap<String, Arc<[IndexEntry]>>,
    pub(crate) len: usize,
}

/// In-memory vector index with per-file atomic replacement.
///
/// Entries are grouped by file; `upsert` builds the replacement slice
/// outside the lock and swaps it in, so a reader sees a file either
/// entirely before or entirely after the change.
pub struct VectorIndex {
    identity: IndexIdentity,
    state: RwLock<IndexState>,
    revision: std::sync::atomic::AtomicU64,
}

impl VectorIndex {
    pub fn new(identity: IndexIdentity) -> Self {
        Self {
            identity,
            state: RwLock::new(IndexState::default()),
            revision: std::sync::atomic::AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.identity.dimension
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bumped by every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub(crate) fn bump_revision(&self) -> u64 {
        self.revision.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.read().files.len()
    }

    #[must_use]
    pub fn contains_file(&self, file_path: &str) -> bool {
        self.read().files.contains_key(file_path)
    }

    #[must_use]
    pub fn files(&self) -> Vec<String> {
        self.read().files.keys().cloned().collect()
    }

    /// Chunk ids of `file_path` in byte order.
    #[must_use]
    pub fn chunk_ids(&self, file_path: &str) -> Vec<String> {
        self.read()
            .files
            .get(file_path)
            .map(|entries| entries.iter().map(|e| e.meta.chunk_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Replace every entry of `file_path` with `entries`.
    ///
    /// Vectors are validated and L2-normalized before the write lock is
    /// taken. An empty `entries` removes the file.
    pub fn upsert(&self, file_path: &str, entries: Vec<(ChunkMeta, Vec<f32>)>) -> Result<()> {
        if entries.is_empty() {
            self.remove(file_path);
            return Ok(());
        }

        let mut built = Vec::with_capacity(entries.len());
        for (meta, mut vector) in entries {
            if meta.file_path != file_path {
                return Err(VectorStoreError::InvalidVector {
                    chunk_id: meta.chunk_id,
                    reason: format!("belongs to {}, not {file_path}", meta.file_path),
                });
            }
            if vector.len() != self.identity.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: self.identity.dimension,
                    actual: vector.len(),
                });
            }
            if !l2_normalize(&mut vector) {
                return Err(VectorStoreError::InvalidVector {
                    chunk_id: meta.chunk_id,
                    reason: "zero or non-finite vector".into(),
                });
            }
            built.push(IndexEntry { meta, vector });
        }
        built.sort_by(|a, b| {
            a.meta
                .byte_start
                .cmp(&b.meta.byte_start)
                .then_with(|| a.meta.chunk_id.cmp(&b.meta.chunk_id))
        });
        let slice: Arc<[IndexEntry]> = built.into();

        {
            let mut state = self.write();
            let added = slice.len();
            let removed = state
                .files
                .insert(file_path.to_string(), slice)
                .map_or(0, |old| old.len());
            state.len = state.len + added - removed;
        }
        self.bump_revision();
        Ok(())
    }

    /// Remove every entry of `file_path`. Returns false if none existed.
    pub fn remove(&self, file_path: &str) -> bool {
        let removed = {
            let mut state = self.write();
            match state.files.remove(file_path) {
                Some(old) => {
                    state.len -= old.len();
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bump_revision();
        }
        removed
    }

    pub fn clear(&self) {
        {
            let mut state = self.write();
            state.files.clear();
            state.len = 0;
        }
        self.bump_revision();
    }

    /// Up to `k` entries with cosine similarity at least `min_similarity`,
    /// best first; equal scores are ordered by chunk id.
    ///
    /// `query` must already be unit-norm.
    pub fn query(&self, query: &[f32], k: usize, min_similarity: f32) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.identity.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.identity.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.read();
        let mut hits: Vec<(f32, &IndexEntry)> = state
            .files
            .values()
            .flat_map(|entries| entries.iter())
            .filter_map(|entry| {
                let score = dot(query, &entry.vector);
                (score >= min_similarity).then_some((score, entry))
            })
            .collect();

        hits.sort_by(|(sa, ea), (sb, eb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ea.meta.chunk_id.cmp(&eb.meta.chunk_id))
        });
        hits.dedup_by(|(_, a), (_, b)| a.meta.chunk_id == b.meta.chunk_id);
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(score, entry)| ScoredChunk {
                meta: entry.meta.clone(),
                score,
            })
            .collect())
    }

    /// Chunks immediately before and after `chunk_id` in the same file.
    #[must_use]
    pub fn neighbors(&self, file_path: &str, chunk_id: &str) -> (Option<ChunkMeta>, Option<ChunkMeta>) {
        let state = self.read();
        let Some(entries) = state.files.get(file_path) else {
            return (None, None);
        };
        let Some(pos) = entries.iter().position(|e| e.meta.chunk_id == chunk_id) else {
            return (None, None);
        };
        let before = pos
            .checked_sub(1)
            .and_then(|i| entries.get(i))
            .map(|e| e.meta.clone());
        let after = entries.get(pos + 1).map(|e| e.meta.clone());
        (before, after)
    }

    /// Copy of every entry, ordered by file then byte offset.
    #[must_use]
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.read()
            .files
            .values()
            .flat_map(|entries| entries.iter().cloned())
            .collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
