//! Spawning and stopping `gcqd`.

use crate::error::{CliError, Result};
use anyhow::Context;
use gcq_daemon::pidfile::{process_alive, read_pid, terminate};
use gcq_daemon::DaemonPaths;
use gcq_protocol::{ClientError, Command, DaemonClient, Endpoint, StatusReport};
use serde_json::json;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

const DAEMON_BIN: &str = "gcqd";
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOG_FILE_NAME: &str = "daemon.log";

/// `gcqd` next to this binary, then `GCQ_DAEMON_PATH`, then `$PATH`.
pub fn resolve_daemon_exe() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(DAEMON_BIN);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    if let Ok(raw) = std::env::var("GCQ_DAEMON_PATH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    PathBuf::from(DAEMON_BIN)
}

pub async fn status(endpoint: &Endpoint) -> std::result::Result<StatusReport, ClientError> {
    DaemonClient::connect(endpoint)
        .await?
        .with_timeout(Duration::from_secs(5))
        .call_typed(Command::Status, json!({}))
        .await
}

/// Start a daemon for `paths.project_root` unless one already answers.
///
/// In the foreground this returns once the daemon exits, with no report.
pub async fn start(
    paths: &DaemonPaths,
    endpoint: &Endpoint,
    foreground: bool,
    wait: bool,
) -> Result<Option<StatusReport>> {
    if let Ok(report) = status(endpoint).await {
        log::info!("Daemon already running (pid {})", report.daemon.pid);
        if wait && !report.daemon.ready {
            return wait_for(endpoint, true).await.map(Some);
        }
        return Ok(Some(report));
    }

    let exe = resolve_daemon_exe();
    let mut command = std::process::Command::new(&exe);
    command.arg("--project").arg(&paths.project_root);

    if foreground {
        let status = command
            .status()
            .with_context(|| format!("failed to run {}", exe.display()))?;
        if !status.success() {
            return Err(anyhow::anyhow!("{DAEMON_BIN} exited with {status}").into());
        }
        return Ok(None);
    }

    std::fs::create_dir_all(&paths.dir)
        .with_context(|| format!("cannot create {}", paths.dir.display()))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.dir.join(LOG_FILE_NAME))
        .context("cannot open daemon log")?;

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", exe.display()))?;
    log::info!("Spawned {DAEMON_BIN} (pid {})", child.id());

    wait_for(endpoint, wait).await.map(Some)
}

/// Poll until the daemon answers (and, with `ready`, until its first pass
/// has completed).
async fn wait_for(endpoint: &Endpoint, ready: bool) -> Result<StatusReport> {
    let deadline = Instant::now() + READY_TIMEOUT;
    loop {
        let last = match status(endpoint).await {
            Ok(report) if !ready || report.daemon.ready => return Ok(report),
            Ok(_) => CliError::NotReady("daemon did not become ready in time".into()),
            Err(err) => CliError::from(err),
        };
        if Instant::now() >= deadline {
            return Err(last);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Ask the daemon to shut down; fall back to `SIGTERM` when it lingers.
pub async fn stop(paths: &DaemonPaths, endpoint: &Endpoint) -> Result<serde_json::Value> {
    let pid = read_pid(&paths.pid_file());

    let requested = match DaemonClient::connect(endpoint).await {
        Ok(client) => client
            .with_timeout(Duration::from_secs(5))
            .call(Command::Shutdown, json!({}))
            .await
            .is_ok(),
        Err(err) => {
            if !pid.is_some_and(process_alive) {
                return Err(err.into());
            }
            false
        }
    };

    let Some(pid) = pid else {
        return Ok(json!({ "stopped": requested }));
    };

    let deadline = Instant::now() + STOP_TIMEOUT;
    while process_alive(pid) && paths.pid_file().exists() && Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let mut terminated = false;
    if process_alive(pid) && paths.pid_file().exists() {
        log::warn!("Daemon {pid} still running; sending SIGTERM");
        terminate(pid).with_context(|| format!("cannot signal pid {pid}"))?;
        terminated = true;
    }
    Ok(json!({ "stopped": true, "pid": pid, "terminated": terminated }))
}
