use crate::error::{Result, SearchError};
use gcq_code_chunker::Language;
use gcq_protocol::{ContextChunk, SemanticHit};
use gcq_vector_store::{l2_normalize, ChunkMeta, IndexIdentity, SharedProvider, VectorIndex};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_CONTEXT_CHUNKS: usize = 10;
pub const DEFAULT_THRESHOLD_SIMILARITY: f32 = 0.7;
pub const DEFAULT_THRESHOLD_MIN_SCORE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryConfig {
    /// Result count when the request does not name one
    pub max_context_chunks: usize,
    /// Floor applied inside the index scan
    pub threshold_similarity: f32,
    /// Floor applied to the scan's results
    pub threshold_min_score: f32,
    /// Attach the chunks on either side of each hit
    pub include_context: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_context_chunks: DEFAULT_MAX_CONTEXT_CHUNKS,
            threshold_similarity: DEFAULT_THRESHOLD_SIMILARITY,
            threshold_min_score: DEFAULT_THRESHOLD_MIN_SCORE,
            include_context: true,
        }
    }
}

/// Answers `semantic` requests against the shared index.
pub struct QueryEngine {
    root: PathBuf,
    index: Arc<VectorIndex>,
    provider: SharedProvider,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        index: Arc<VectorIndex>,
        provider: SharedProvider,
        config: QueryConfig,
    ) -> Self {
        Self {
            root: root.into(),
            index,
            provider,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Vectors from the search provider are only comparable with the index
    /// when provider family, model and dimension all agree.
    pub fn check_compatible(&self) -> Result<()> {
        let index = self.index.identity();
        let search = IndexIdentity::new(
            self.provider.name(),
            self.provider.model(),
            self.provider.dimension(),
        );
        if &search == index {
            Ok(())
        } else {
            Err(SearchError::ProviderMismatch {
                index: index.clone(),
                search,
            })
        }
    }

    /// Ranked chunks for `query`, best first, ties broken by chunk id.
    pub async fn semantic(
        &self,
        query: &str,
        k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SemanticHit>> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        self.check_compatible()?;

        let k = k.unwrap_or(self.config.max_context_chunks);
        if k == 0 {
            return Ok(Vec::new());
        }

        let input = [query.to_string()];
        let mut vectors = tokio::select! {
            result = self.provider.embed(&input) => result?,
            () = cancel.cancelled() => return Err(SearchError::Cancelled),
        };
        let Some(mut vector) = vectors.pop() else {
            return Ok(Vec::new());
        };
        if !l2_normalize(&mut vector) {
            return Ok(Vec::new());
        }

        let scored = self
            .index
            .query(&vector, k, self.config.threshold_similarity)?;
        log::debug!("Semantic '{query}': {} candidates", scored.len());

        let mut survivors = Vec::with_capacity(scored.len());
        for hit in scored {
            if cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            if hit.score >= self.config.threshold_min_score {
                survivors.push(hit);
            }
        }

        let mut seen: HashSet<String> = survivors.iter().map(|h| h.meta.chunk_id.clone()).collect();
        let mut files = FileCache::new(&self.root);
        let mut results = Vec::with_capacity(survivors.len());
        for hit in survivors {
            let context = if self.config.include_context {
                let (before, after) = self.index.neighbors(&hit.meta.file_path, &hit.meta.chunk_id);
                let mut context = Vec::new();
                for meta in before.into_iter().chain(after) {
                    if seen.insert(meta.chunk_id.clone()) {
                        let text = files.slice(&meta).await;
                        context.push(context_chunk(meta, text));
                    }
                }
                context
            } else {
                Vec::new()
            };

            let text = files.slice(&hit.meta).await;
            let meta = hit.meta;
            results.push(SemanticHit {
                language: Language::from_path(&meta.file_path).map(|l| l.as_str().to_string()),
                chunk_id: meta.chunk_id,
                file_path: meta.file_path,
                byte_start: meta.byte_start,
                byte_end: meta.byte_end,
                line_start: meta.line_start,
                line_end: meta.line_end,
                score: hit.score,
                text,
                context,
            });
        }
        Ok(results)
    }
}

fn context_chunk(meta: ChunkMeta, text: String) -> ContextChunk {
    ContextChunk {
        chunk_id: meta.chunk_id,
        file_path: meta.file_path,
        byte_start: meta.byte_start,
        byte_end: meta.byte_end,
        line_start: meta.line_start,
        line_end: meta.line_end,
        text,
    }
}

/// File contents read once per query.
struct FileCache<'a> {
    root: &'a std::path::Path,
    files: HashMap<String, Option<Vec<u8>>>,
}

impl<'a> FileCache<'a> {
    fn new(root: &'a std::path::Path) -> Self {
        Self {
            root,
            files: HashMap::new(),
        }
    }

    /// Chunk text from disk; empty if the file is gone. Offsets past the
    /// current end are clamped.
    async fn slice(&mut self, meta: &ChunkMeta) -> String {
        if !self.files.contains_key(&meta.file_path) {
            let bytes = match tokio::fs::read(self.root.join(&meta.file_path)).await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    log::debug!("Cannot read {}: {err}", meta.file_path);
                    None
                }
            };
            self.files.insert(meta.file_path.clone(), bytes);
        }

        let Some(Some(bytes)) = self.files.get(&meta.file_path) else {
            return String::new();
        };
        let end = usize::try_from(meta.byte_end).unwrap_or(usize::MAX).min(bytes.len());
        let start = usize::try_from(meta.byte_start).unwrap_or(usize::MAX).min(end);
        String::from_utf8_lossy(&bytes[start..end]).into_owned()
    }
}
