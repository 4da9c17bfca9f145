#![allow(dead_code)]

use async_trait::async_trait;
use gcq_daemon::{Daemon, DaemonOptions, DaemonPaths, GcqConfig, Providers};
use gcq_protocol::{
    ClientError, Command, DaemonClient, Endpoint, ProviderHealth, SemanticHit, StatusReport,
};
use gcq_vector_store::{EmbeddingError, EmbeddingProvider, SharedProvider};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const GATE_OPEN: usize = Semaphore::MAX_PERMITS / 2;

/// Maps text onto three axes by token counts ({alpha, beta, gamma},
/// {delta, epsilon}, everything else), zero-padded to `dim`.
pub struct StubProvider {
    name: String,
    model: String,
    dim: usize,
    calls: AtomicUsize,
    gate: Semaphore,
}

impl StubProvider {
    pub fn new(name: &str, model: &str, dim: usize) -> Arc<Self> {
        Self::with_permits(name, model, dim, GATE_OPEN)
    }

    fn with_permits(name: &str, model: &str, dim: usize, permits: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            model: model.into(),
            dim,
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
        })
    }

    pub fn token_count() -> Arc<Self> {
        Self::new("stub", "token-count", 3)
    }

    /// A provider whose `embed` blocks until [`open_gate`](Self::open_gate).
    pub fn gated() -> Arc<Self> {
        Self::with_permits("stub", "token-count", 3, 0)
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(GATE_OPEN);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn token_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim.max(3)];
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
        v[2] = 1.0;
        return v;
    }
    v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| EmbeddingError::Cancelled)?;
        Ok(texts.iter().map(|t| token_vector(t, self.dim)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health(&self) -> ProviderHealth {
        ProviderHealth::ready()
    }

    async fn close(&self) {}
}

pub fn shared(provider: &Arc<StubProvider>) -> Providers {
    let provider: SharedProvider = provider.clone();
    Providers {
        warm: Arc::clone(&provider),
        search: provider,
    }
}

pub fn project_with(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        write_file(dir.path(), name, contents);
    }
    dir
}

pub fn write_file(root: &Path, name: &str, contents: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

pub fn two_file_project() -> TempDir {
    project_with(&[("a.txt", "alpha beta gamma"), ("b.txt", "delta epsilon")])
}

pub fn test_config() -> GcqConfig {
    let mut config = GcqConfig::default();
    config.chunker.chunk_size = 16;
    config.chunker.chunk_overlap = 0;
    config.debounce = Duration::from_millis(100);
    config.shutdown_timeout = Duration::from_secs(2);
    config
}

pub fn paths_for(root: &Path) -> DaemonPaths {
    DaemonPaths::with_dir(root, None)
}

/// A daemon serving in a background task.
pub struct Running {
    pub paths: DaemonPaths,
    pub endpoint: Endpoint,
    task: JoinHandle<gcq_daemon::Result<()>>,
}

pub async fn start(root: &Path, config: GcqConfig, providers: Providers) -> Running {
    launch(root, config, Some(providers)).await
}

/// Start with providers built from `config`.
pub async fn start_configured(root: &Path, config: GcqConfig) -> Running {
    launch(root, config, None).await
}

async fn launch(root: &Path, config: GcqConfig, providers: Option<Providers>) -> Running {
    let paths = paths_for(root);
    let daemon = Daemon::start(DaemonOptions {
        paths: paths.clone(),
        config,
        providers,
    })
    .await
    .unwrap();
    let endpoint = daemon.endpoint().clone();
    let task = tokio::spawn(daemon.run());
    Running {
        paths,
        endpoint,
        task,
    }
}

impl Running {
    pub async fn client(&self) -> DaemonClient {
        DaemonClient::connect(&self.endpoint)
            .await
            .unwrap()
            .with_timeout(Duration::from_secs(10))
    }

    pub async fn status(&self) -> StatusReport {
        self.client()
            .await
            .call_typed(Command::Status, json!({}))
            .await
            .unwrap()
    }

    /// Poll `status` until `done` holds.
    pub async fn wait_for(&self, done: impl Fn(&StatusReport) -> bool) -> StatusReport {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = self.status().await;
            if done(&status) {
                return status;
            }
            assert!(Instant::now() < deadline, "timed out; last status {status:?}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_ready(&self) -> StatusReport {
        self.wait_for(|s| s.daemon.ready).await
    }

    pub async fn semantic(&self, query: &str) -> Result<Vec<SemanticHit>, ClientError> {
        self.client()
            .await
            .call_typed(Command::Semantic, json!({ "query": query }))
            .await
    }

    pub async fn notify(&self, paths: &[&str]) -> usize {
        let result = self
            .client()
            .await
            .call(Command::Notify, json!({ "paths": paths }))
            .await
            .unwrap();
        result["accepted"].as_u64().unwrap() as usize
    }

    /// Request shutdown over IPC and wait for teardown to finish.
    pub async fn stop(self) {
        self.client()
            .await
            .call(Command::Shutdown, json!({}))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
