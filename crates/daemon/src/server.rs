use crate::error::{DaemonError, Result};
use crate::paths::DaemonPaths;
use gcq_indexer::{ProjectIndexer, Scheduler};
use gcq_protocol::{
    Command, DaemonStatus, Endpoint, ErrorKind, NotifyParams, NotifyResult, ReindexParams,
    ReindexResult, Request, Response, SemanticParams, StatusReport, WireError,
};
use gcq_search::QueryEngine;
use gcq_vector_store::{describe, SharedProvider};
use log::{debug, info, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A connection is closed after this long without a request.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Bound IPC listener.
pub enum Listener {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
    Tcp(tokio::net::TcpListener),
}

impl Listener {
    /// Bind `endpoint`. A leftover socket file is replaced; the caller must
    /// already hold the PID lock.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                use std::os::unix::fs::PermissionsExt;

                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                if tokio::fs::symlink_metadata(path).await.is_ok() {
                    tokio::fs::remove_file(path).await?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(DaemonError::config(format!(
                "unix socket {} is not supported on this platform",
                path.display()
            ))),
            Endpoint::Tcp(addr) => Ok(Self::Tcp(tokio::net::TcpListener::bind(addr).await?)),
        }
    }

    async fn accept(&self) -> std::io::Result<(BoxedRead, BoxedWrite)> {
        match self {
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
        }
    }

    /// Filesystem entry to unlink on shutdown.
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            #[cfg(unix)]
            Self::Unix { path, .. } => Some(path),
            Self::Tcp(_) => None,
        }
    }
}

/// Everything a request handler can touch.
pub struct ServerState {
    pub paths: DaemonPaths,
    pub indexer: Arc<ProjectIndexer>,
    pub scheduler: Scheduler,
    pub engine: QueryEngine,
    pub warm: SharedProvider,
    pub search: SharedProvider,
    pub started_at_epoch: u64,
    pub shutdown: CancellationToken,
    pub last_error: Mutex<Option<String>>,
}

impl ServerState {
    #[must_use]
    pub fn daemon_status(&self, running: bool) -> DaemonStatus {
        let last_error = self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .or_else(|| self.scheduler.status().last_error);
        DaemonStatus {
            running,
            pid: std::process::id(),
            ready: running && self.scheduler.is_ready(),
            started_at_epoch: self.started_at_epoch,
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_error,
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    async fn status_report(&self) -> StatusReport {
        let scheduler = self.scheduler.status();
        StatusReport {
            daemon: self.daemon_status(true),
            project_root: self.paths.project_root.display().to_string(),
            index_size: self.indexer.index().len(),
            dirty_count: self.scheduler.dirty().size(),
            warm_provider: describe(self.warm.as_ref()).await,
            search_provider: describe(self.search.as_ref()).await,
            scheduler: scheduler.report(),
            file_errors: scheduler.file_errors,
        }
    }

    fn notify(&self, params: NotifyParams) -> NotifyResult {
        let mut accepted = 0;
        for raw in &params.paths {
            let Some(rel) = self.indexer.normalize_path(raw) else {
                debug!("Ignoring path outside project: {raw}");
                continue;
            };
            if self.paths.is_state_path(&self.paths.project_root.join(&rel)) {
                continue;
            }
            self.scheduler.mark_dirty(rel);
            accepted += 1;
        }
        NotifyResult { accepted }
    }

    async fn reindex(&self, params: ReindexParams) -> Result<ReindexResult> {
        if params.run_async {
            self.scheduler.reindex(false).await?;
            return Ok(ReindexResult {
                completed: false,
                round: None,
            });
        }
        let round = self.scheduler.reindex(true).await?;
        Ok(ReindexResult {
            completed: round.is_some(),
            round,
        })
    }

    async fn semantic(&self, params: SemanticParams) -> Result<Value> {
        if !self.scheduler.is_ready() {
            return Err(DaemonError::NotReady);
        }
        let hits = self
            .engine
            .semantic(&params.query, params.k, &self.shutdown)
            .await?;
        Ok(serde_json::to_value(hits)?)
    }

    /// Answer one request. The flag is set when the daemon should stop
    /// once the response is written.
    pub async fn dispatch(&self, request: Request) -> (Response, bool) {
        let id = request.id.clone();
        let command: Command = match request.kind.parse() {
            Ok(command) => command,
            Err(err) => return (Response::err(id, err), false),
        };
        debug!("Dispatch {} #{id}", command.as_str());

        let outcome: std::result::Result<Value, WireError> = match command {
            Command::Status => to_value(self.status_report().await),
            Command::Semantic => match request.params::<SemanticParams>() {
                Ok(params) => self.semantic(params).await.map_err(|e| e.to_wire()),
                Err(err) => Err(err),
            },
            Command::Notify => request
                .params::<NotifyParams>()
                .and_then(|params| to_value(self.notify(params))),
            Command::Reindex => match request.params::<ReindexParams>() {
                Ok(params) => match self.reindex(params).await {
                    Ok(result) => to_value(result),
                    Err(err) => Err(err.to_wire()),
                },
                Err(err) => Err(err),
            },
            Command::Shutdown => {
                info!("Shutdown requested over IPC");
                return (Response::ok(id, serde_json::json!({ "stopping": true })), true);
            }
        };

        let response = match outcome {
            Ok(result) => Response::ok(id, result),
            Err(err) => {
                if err.kind == ErrorKind::Internal {
                    warn!("Request failed: {err}");
                }
                Response::err(id, err)
            }
        };
        (response, false)
    }
}

fn to_value<T: serde::Serialize>(value: T) -> std::result::Result<Value, WireError> {
    serde_json::to_value(value).map_err(|e| WireError::new(ErrorKind::Internal, e.to_string()))
}

/// Accept connections until `shutdown` fires, one task per connection.
pub async fn serve(listener: &Listener, state: Arc<ServerState>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((reader, writer)) => {
                    connections.spawn(handle_connection(Arc::clone(&state), reader, writer));
                }
                Err(err) => warn!("Accept failed: {err}"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.abort_all();
    while connections.join_next().await.is_some() {}
}

/// Well-formed JSON that is not a request gets a `BadRequest` reply,
/// echoing its `id` when present.
fn decode_request(frame: Value) -> std::result::Result<Request, Response> {
    let id = frame.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(frame).map_err(|err| {
        debug!("Rejecting request frame: {err}");
        Response::err(
            id,
            WireError::new(ErrorKind::BadRequest, format!("invalid request: {err}")),
        )
    })
}

async fn handle_connection(state: Arc<ServerState>, reader: BoxedRead, mut writer: BoxedWrite) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match tokio::time::timeout(IDLE_TIMEOUT, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break,
            Ok(Err(err)) => {
                debug!("Connection read failed: {err}");
                break;
            }
            Err(_) => {
                debug!("Closing idle connection");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Malformed request, closing connection: {err}");
                break;
            }
        };
        let (response, stop) = match decode_request(frame) {
            Ok(request) => state.dispatch(request).await,
            Err(response) => (response, false),
        };
        let mut payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Cannot encode response: {err}");
                break;
            }
        };
        payload.push(b'\n');
        let written = async {
            writer.write_all(&payload).await?;
            writer.flush().await
        }
        .await;

        if stop {
            state.shutdown.cancel();
            break;
        }
        if let Err(err) = written {
            debug!("Connection write failed: {err}");
            break;
        }
    }
}
