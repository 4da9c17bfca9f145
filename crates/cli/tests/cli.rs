use assert_cmd::Command;
use async_trait::async_trait;
use gcq_daemon::{Daemon, DaemonOptions, DaemonPaths, GcqConfig, Providers};
use gcq_protocol::ProviderHealth;
use gcq_vector_store::{EmbeddingError, EmbeddingProvider, SharedProvider};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Three axes by token counts; `embed` waits on `gate`.
struct StubProvider {
    gate: Semaphore,
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| EmbeddingError::Cancelled)?;
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("alpha") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("delta") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
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

fn gcq(project: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gcq").unwrap();
    cmd.env_remove("GCQ_DAEMON_DIR")
        .env_remove("GCQ_SOCKET_PATH")
        .env_remove("GCQ_TCP_PORT")
        .current_dir(project)
        .arg("--project")
        .arg(project);
    cmd
}

/// Run `gcq` off the async runtime and return (exit code, stdout).
async fn run_gcq(project: &Path, args: &[&str]) -> (i32, String) {
    let project = project.to_path_buf();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let output = gcq(&project).args(&args).output().unwrap();
        (
            output.status.code().unwrap(),
            String::from_utf8(output.stdout).unwrap(),
        )
    })
    .await
    .unwrap()
}

async fn start_daemon(
    project: &Path,
    provider: Arc<StubProvider>,
) -> JoinHandle<gcq_daemon::Result<()>> {
    let provider: SharedProvider = provider;
    let mut config = GcqConfig::default();
    config.chunker.chunk_size = 16;
    config.chunker.chunk_overlap = 0;
    config.debounce = Duration::from_millis(50);
    let daemon = Daemon::start(DaemonOptions {
        paths: DaemonPaths::with_dir(project, None),
        config,
        providers: Some(Providers {
            warm: Arc::clone(&provider),
            search: provider,
        }),
    })
    .await
    .unwrap();
    tokio::spawn(daemon.run())
}

fn project() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha beta gamma").unwrap();
    std::fs::write(dir.path().join("b.txt"), "delta epsilon").unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

#[test]
fn status_without_daemon_exits_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    gcq(dir.path()).arg("status").assert().code(3);
}

#[test]
fn missing_query_is_misuse() {
    let dir = tempfile::tempdir().unwrap();
    gcq(dir.path()).arg("semantic").assert().code(2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_round_trip_through_daemon() {
    let (_dir, root) = project();
    let provider = Arc::new(StubProvider {
        gate: Semaphore::new(0),
    });
    let handle = start_daemon(&root, Arc::clone(&provider)).await;

    let (code, _) = run_gcq(&root, &["semantic", "alpha"]).await;
    assert_eq!(code, 4);

    provider.gate.add_permits(1_000);
    let (code, stdout) = run_gcq(&root, &["start", "--wait"]).await;
    assert_eq!(code, 0);
    let status: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["ready"], Value::Bool(true));
    assert_eq!(status["index_size"], Value::from(2));

    let (code, stdout) = run_gcq(&root, &["semantic", "alpha", "-k", "1"]).await;
    assert_eq!(code, 0);
    let hits: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["file_path"], Value::from("a.txt"));

    let (code, stdout) = run_gcq(&root, &["notify", "a.txt", "../elsewhere.txt"]).await;
    assert_eq!(code, 0);
    let notified: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(notified["accepted"], Value::from(1));

    let (code, _) = run_gcq(&root, &["shutdown"]).await;
    assert_eq!(code, 0);
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let (code, _) = run_gcq(&root, &["status"]).await;
    assert_eq!(code, 3);
}
