//! Daemon lifecycle: PID lock, providers, listener, scheduler, shutdown.

use crate::config::GcqConfig;
use crate::error::{DaemonError, Result};
use crate::paths::DaemonPaths;
use crate::pidfile::PidLock;
use crate::server::{serve, Listener, ServerState};
use crate::status::{unix_now_secs, write_status};
use gcq_indexer::{IndexerConfig, ProjectIndexer, Scheduler, SchedulerConfig};
use gcq_protocol::{DaemonStatus, Endpoint};
use gcq_search::QueryEngine;
use gcq_vector_store::{build_provider, IndexIdentity, SharedProvider, VectorIndex};
use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Warm (indexing) and search (query) providers.
#[derive(Clone)]
pub struct Providers {
    pub warm: SharedProvider,
    pub search: SharedProvider,
}

impl Providers {
    /// Build both providers from `config`. Identical specs share one
    /// instance.
    ///
    /// Each provider owns its cancellation token, so daemon shutdown lets
    /// in-flight embeds finish. Only [`close`](Self::close) cancels them.
    pub async fn from_config(config: &GcqConfig) -> Result<Self> {
        let warm = build_provider(&config.warm, CancellationToken::new()).await?;
        let search = if config.search == config.warm {
            Arc::clone(&warm)
        } else {
            build_provider(&config.search, CancellationToken::new()).await?
        };
        Ok(Self { warm, search })
    }

    async fn close(&self) {
        self.warm.close().await;
        if !Arc::ptr_eq(&self.warm, &self.search) {
            self.search.close().await;
        }
    }
}

pub struct DaemonOptions {
    pub paths: DaemonPaths,
    pub config: GcqConfig,
    /// Injected providers; built from `config` when absent.
    pub providers: Option<Providers>,
}

/// A started daemon. Call [`Daemon::run`] to serve until shutdown.
pub struct Daemon {
    state: Arc<ServerState>,
    listener: Arc<Listener>,
    endpoint: Endpoint,
    providers: Providers,
    lock: Option<PidLock>,
    accept_task: JoinHandle<()>,
    ready_task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl Daemon {
    /// Take the PID lock, bind the endpoint and start the initial pass.
    ///
    /// Queries return `NotReady` until that pass completes.
    pub async fn start(options: DaemonOptions) -> Result<Self> {
        let DaemonOptions {
            paths,
            config,
            providers,
        } = options;
        config.warn_suspicious();

        let started_at_epoch = unix_now_secs();
        let lock = PidLock::acquire(&paths.pid_file(), &[paths.status_file()])?;
        info!(
            "Daemon {} starting for {}",
            std::process::id(),
            paths.project_root.display()
        );

        let shutdown = CancellationToken::new();
        match Self::assemble(&paths, &config, providers, shutdown, started_at_epoch).await {
            Ok((state, listener, endpoint, providers)) => {
                let state = Arc::new(state);
                let listener = Arc::new(listener);
                write_status(&paths.status_file(), &state.daemon_status(true)).await?;

                let accept_task = tokio::spawn({
                    let state = Arc::clone(&state);
                    let listener = Arc::clone(&listener);
                    async move { serve(&listener, state).await }
                });
                let ready_task = tokio::spawn(announce_ready(Arc::clone(&state)));
                info!("Listening on {endpoint}");

                Ok(Self {
                    state,
                    listener,
                    endpoint,
                    providers,
                    lock: Some(lock),
                    accept_task,
                    ready_task,
                    shutdown_timeout: config.shutdown_timeout,
                })
            }
            Err(err) => {
                error!("Daemon failed to start: {err}");
                let status = DaemonStatus {
                    running: false,
                    pid: std::process::id(),
                    ready: false,
                    started_at_epoch,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    last_error: Some(err.to_string()),
                };
                drop(lock);
                if let Err(write_err) = write_status(&paths.status_file(), &status).await {
                    warn!("Cannot write final status: {write_err}");
                }
                Err(err)
            }
        }
    }

    async fn assemble(
        paths: &DaemonPaths,
        config: &GcqConfig,
        providers: Option<Providers>,
        shutdown: CancellationToken,
        started_at_epoch: u64,
    ) -> Result<(ServerState, Listener, Endpoint, Providers)> {
        let providers = match providers {
            Some(providers) => providers,
            None => Providers::from_config(config).await?,
        };

        let endpoint = paths.endpoint(config);
        let listener = Listener::bind(&endpoint).await?;

        let warm = &providers.warm;
        let identity = IndexIdentity::new(warm.name(), warm.model(), warm.dimension());
        let index = Arc::new(VectorIndex::new(identity));
        let indexer = Arc::new(ProjectIndexer::new(
            &paths.project_root,
            IndexerConfig {
                chunker: config.chunker,
                parallelism: config.indexer_parallelism,
                snapshot_path: Some(paths.snapshot()),
                records_path: Some(paths.records()),
                excluded_dirs: vec![paths.dir.clone()],
            },
            Arc::clone(warm),
            Arc::clone(&index),
        )?);

        let scheduler = Scheduler::start(
            Arc::clone(&indexer),
            Arc::default(),
            SchedulerConfig {
                dirty_threshold: config.dirty_threshold,
                debounce: config.debounce,
            },
            shutdown.child_token(),
        );
        let engine = QueryEngine::new(
            &paths.project_root,
            index,
            Arc::clone(&providers.search),
            config.query,
        );

        let state = ServerState {
            paths: paths.clone(),
            indexer,
            scheduler,
            engine,
            warm: Arc::clone(&providers.warm),
            search: Arc::clone(&providers.search),
            started_at_epoch,
            shutdown,
            last_error: Mutex::new(None),
        };
        Ok((state, listener, endpoint, providers))
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Cancelling this token starts a graceful shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Serve until the shutdown token fires, then tear down: stop
    /// accepting, stop the scheduler, flush the snapshot, remove the
    /// socket and PID file, write the final status.
    pub async fn run(mut self) -> Result<()> {
        self.state.shutdown.cancelled().await;
        info!("Shutting down");

        if let Err(err) = (&mut self.accept_task).await {
            warn!("Accept loop ended abnormally: {err}");
        }
        self.ready_task.abort();

        // Providers stay open until the scheduler has drained or timed out.
        if !self.state.scheduler.shutdown(self.shutdown_timeout).await {
            warn!(
                "Scheduler did not stop within {:?}; in-flight work abandoned",
                self.shutdown_timeout
            );
        }
        self.providers.close().await;

        let mut outcome = Ok(());
        match self.state.indexer.persist_if_changed().await {
            Ok(true) => info!("Final snapshot written"),
            Ok(false) => {}
            Err(err) => {
                error!("Final snapshot failed: {err}");
                self.state.record_error(err.to_string());
                outcome = Err(DaemonError::from(err));
            }
        }

        if let Some(path) = self.listener.socket_path() {
            if let Err(err) = std::fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot remove socket {}: {err}", path.display());
                }
            }
        }
        drop(self.lock.take());

        let status = self.state.daemon_status(false);
        write_status(&self.state.paths.status_file(), &status).await?;
        info!("Daemon stopped");
        outcome
    }
}

async fn announce_ready(state: Arc<ServerState>) {
    if !state.scheduler.wait_ready().await {
        return;
    }
    info!("Index ready ({} chunks)", state.indexer.index().len());
    if let Err(err) = write_status(&state.paths.status_file(), &state.daemon_status(true)).await {
        warn!("Cannot write status: {err}");
    }
}
