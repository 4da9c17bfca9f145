#![allow(dead_code)]

use async_trait::async_trait;
use gcq_indexer::{DirtySet, IndexerConfig, ProjectIndexer};
use gcq_protocol::ProviderHealth;
use gcq_vector_store::{
    EmbeddingError, EmbeddingProvider, IndexIdentity, SharedProvider, VectorIndex,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Maps text onto three axes by token counts: {alpha, beta, gamma},
/// {delta, epsilon}, everything else.
#[derive(Default)]
pub struct TokenCountProvider {
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    pub failing: AtomicBool,
}

impl TokenCountProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

pub fn token_vector(text: &str) -> Vec<f32> {
    let mut v = [0.0f32; 3];
    for token in text.split_whitespace() {
        let axis = match token.to_ascii_lowercase().as_str() {
            "alpha" | "beta" | "gamma" => 0,
            "delta" | "epsilon" => 1,
            _ => 2,
        };
        v[axis] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec![0.0, 0.0, 1.0];
    }
    v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl EmbeddingProvider for TokenCountProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Unavailable("stub offline".into()));
        }
        Ok(texts.iter().map(|t| token_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "token-count"
    }

    async fn health(&self) -> ProviderHealth {
        ProviderHealth::ready()
    }

    async fn close(&self) {}
}

pub struct Fixture {
    pub provider: Arc<TokenCountProvider>,
    pub indexer: Arc<ProjectIndexer>,
    pub dirty: Arc<DirtySet>,
}

pub fn config(state_dir: &Path) -> IndexerConfig {
    let mut config = IndexerConfig::default();
    config.chunker.chunk_size = 16;
    config.chunker.chunk_overlap = 0;
    config.snapshot_path = Some(state_dir.join("index.idx"));
    config.records_path = Some(state_dir.join("records.json"));
    config
}

pub fn fixture(root: &Path, state_dir: &Path) -> Fixture {
    let provider = Arc::new(TokenCountProvider::default());
    let shared: SharedProvider = provider.clone();
    let index = Arc::new(VectorIndex::new(IndexIdentity::new("stub", "token-count", 3)));
    let indexer = ProjectIndexer::new(root, config(state_dir), shared, index).expect("indexer");
    Fixture {
        provider,
        indexer: Arc::new(indexer),
        dirty: Arc::new(DirtySet::new()),
    }
}
