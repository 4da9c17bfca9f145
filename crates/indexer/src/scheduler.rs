use crate::dirty::DirtySet;
use crate::indexer::{PassOutcome, ProjectIndexer, RestoreOutcome};
use crate::{IndexerError, Result};
use gcq_protocol::{RoundSummary, SchedulerReport, SchedulerState};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DIRTY_THRESHOLD: usize = 20;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

const RETRY_INITIAL: Duration = Duration::from_secs(2);
const RETRY_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pending paths that trigger a round without waiting for the debounce
    pub dirty_threshold: usize,
    /// Quiet period after the most recent mark
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dirty_threshold: DEFAULT_DIRTY_THRESHOLD,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub rounds_completed: u64,
    pub last_round: Option<RoundSummary>,
    /// Latest failure per file; cleared when the file indexes cleanly
    pub file_errors: BTreeMap<String, String>,
    /// Set once the initial pass has finished
    pub ready: bool,
    pub last_error: Option<String>,
}

impl SchedulerStatus {
    fn initial() -> Self {
        Self {
            state: SchedulerState::Idle,
            rounds_completed: 0,
            last_round: None,
            file_errors: BTreeMap::new(),
            ready: false,
            last_error: None,
        }
    }

    #[must_use]
    pub fn report(&self) -> SchedulerReport {
        SchedulerReport {
            state: self.state,
            rounds_completed: self.rounds_completed,
            last_round: self.last_round.clone(),
        }
    }
}

enum SchedulerCommand {
    Reindex {
        reply: Option<oneshot::Sender<RoundSummary>>,
    },
}

/// Background task that turns dirty marks and reindex requests into
/// indexing rounds: `Idle -> Draining -> Indexing -> Persisting -> Idle`.
///
/// The loop first restores any persisted snapshot, then runs a full pass;
/// [`Scheduler::is_ready`] flips when that pass completes.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    command_tx: mpsc::Sender<SchedulerCommand>,
    dirty: Arc<DirtySet>,
    status_tx: watch::Sender<SchedulerStatus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the loop. Cancelling `cancel` stops it after the file
    /// operations already in flight.
    pub fn start(
        indexer: Arc<ProjectIndexer>,
        dirty: Arc<DirtySet>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (status_tx, _) = watch::channel(SchedulerStatus::initial());

        let task = tokio::spawn(run_loop(
            indexer,
            Arc::clone(&dirty),
            config,
            command_rx,
            status_tx.clone(),
            cancel.clone(),
        ));

        Self {
            inner: Arc::new(SchedulerInner {
                command_tx,
                dirty,
                status_tx,
                cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    #[must_use]
    pub fn dirty(&self) -> &Arc<DirtySet> {
        &self.inner.dirty
    }

    pub fn mark_dirty(&self, path: impl Into<String>) -> bool {
        self.inner.dirty.mark_dirty(path)
    }

    /// Force a full round. With `wait`, resolves to its summary once it
    /// completes; otherwise returns as soon as the request is queued.
    pub async fn reindex(&self, wait: bool) -> Result<Option<RoundSummary>> {
        let (reply, rx) = if wait {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.inner
            .command_tx
            .send(SchedulerCommand::Reindex { reply })
            .await
            .map_err(|_| IndexerError::Cancelled)?;

        match rx {
            Some(rx) => rx.await.map(Some).map_err(|_| IndexerError::Cancelled),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        self.inner.status_tx.borrow().clone()
    }

    #[must_use]
    pub fn status_stream(&self) -> watch::Receiver<SchedulerStatus> {
        self.inner.status_tx.subscribe()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.status_tx.borrow().ready
    }

    /// Resolves once the initial pass has completed. Returns false if the
    /// scheduler stopped first.
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.inner.status_tx.subscribe();
        tokio::select! {
            biased;

            ready = rx.wait_for(|status| status.ready) => ready.is_ok(),
            () = self.inner.cancel.cancelled() => false,
        }
    }

    /// Cancel the loop and wait up to `timeout` for it to finish. Returns
    /// false if the loop had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.cancel.cancel();
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut task) = task else {
            return true;
        };

        match time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!("Scheduler task failed: {err}");
                true
            }
            Err(_) => {
                warn!("Scheduler did not stop within {}ms; aborting", timeout.as_millis());
                task.abort();
                false
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.cancel.cancel();
        }
    }
}

async fn run_loop(
    indexer: Arc<ProjectIndexer>,
    dirty: Arc<DirtySet>,
    config: SchedulerConfig,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    status_tx: watch::Sender<SchedulerStatus>,
    cancel: CancellationToken,
) {
    let mut policy = WakePolicy::new(config.dirty_threshold, config.debounce);
    let mut waiters: Vec<oneshot::Sender<RoundSummary>> = Vec::new();

    match indexer.restore().await {
        Ok(RestoreOutcome::Loaded { chunks, records }) => {
            info!("Resuming from snapshot: {chunks} chunks, {records} files");
        }
        Ok(outcome) => debug!("Starting without snapshot: {outcome:?}"),
        Err(err) => {
            error!("Failed to restore index: {err}");
            status_tx.send_modify(|status| status.last_error = Some(err.to_string()));
        }
    }

    let initial =
        run_round(&indexer, &dirty, &mut policy, &status_tx, &cancel, "initial", true).await;
    if initial.cancelled {
        warn!(
            "Initial pass cancelled; index is partial ({} chunks)",
            indexer.index().len()
        );
    } else {
        status_tx.send_modify(|status| status.ready = true);
        info!("Initial pass complete; {} chunks indexed", indexer.index().len());
    }

    loop {
        let deadline = policy.next_deadline(dirty.size(), dirty.last_mark());

        tokio::select! {
            biased;

            () = cancel.cancelled() => break,
            Some(command) = command_rx.recv() => match command {
                SchedulerCommand::Reindex { reply } => {
                    policy.force_run();
                    waiters.extend(reply);
                }
            },
            () = dirty.changed() => {}
            () = async {
                if let Some(deadline) = deadline {
                    time::sleep_until(deadline).await;
                }
            }, if deadline.is_some() => {
                let Some(reason) = policy.wake_reason(dirty.size(), dirty.last_mark()) else {
                    continue;
                };
                let full_scan = policy.take_force();
                let summary =
                    run_round(&indexer, &dirty, &mut policy, &status_tx, &cancel, reason, full_scan)
                        .await;
                if full_scan {
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(summary.clone());
                    }
                }
            }
        }
    }

    debug!("Scheduler loop stopped");
}

async fn run_round(
    indexer: &Arc<ProjectIndexer>,
    dirty: &DirtySet,
    policy: &mut WakePolicy,
    status_tx: &watch::Sender<SchedulerStatus>,
    cancel: &CancellationToken,
    reason: &str,
    full_scan: bool,
) -> RoundSummary {
    status_tx.send_modify(|status| status.state = SchedulerState::Draining);
    let mut paths = dirty.drain();
    let now = Instant::now();
    let mut seen: HashSet<String> = paths.iter().cloned().collect();
    for path in policy.take_due(now, full_scan) {
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    }
    debug!("Round ({reason}): {} drained paths, full_scan={full_scan}", paths.len());

    status_tx.send_modify(|status| status.state = SchedulerState::Indexing);
    let mut summary = match indexer.run_pass(paths, full_scan, cancel).await {
        Ok(outcome) => {
            apply_outcome(&outcome, policy, status_tx);
            outcome.summary
        }
        Err(err) => {
            error!("Indexing round failed: {err}");
            status_tx.send_modify(|status| status.last_error = Some(err.to_string()));
            RoundSummary {
                full_scan,
                cancelled: cancel.is_cancelled(),
                ..RoundSummary::default()
            }
        }
    };
    summary.reason = reason.to_string();

    status_tx.send_modify(|status| status.state = SchedulerState::Persisting);
    match indexer.persist_if_changed().await {
        Ok(persisted) => summary.persisted = persisted,
        Err(err) => {
            error!("Failed to persist index: {err}");
            status_tx.send_modify(|status| status.last_error = Some(err.to_string()));
        }
    }

    status_tx.send_modify(|status| {
        status.state = SchedulerState::Idle;
        status.rounds_completed += 1;
        status.last_round = Some(summary.clone());
    });
    summary
}

fn apply_outcome(
    outcome: &PassOutcome,
    policy: &mut WakePolicy,
    status_tx: &watch::Sender<SchedulerStatus>,
) {
    let now = Instant::now();
    for path in &outcome.succeeded {
        policy.clear(path);
    }
    for path in outcome.errors.keys() {
        if !outcome.retry.contains(path) {
            policy.clear(path);
        }
    }
    for path in &outcome.retry {
        let delay = policy.defer(path, now);
        info!("Deferring {path} for {}ms", delay.as_millis());
    }
    status_tx.send_modify(|status| {
        for path in &outcome.succeeded {
            status.file_errors.remove(path);
        }
        for (path, err) in &outcome.errors {
            status.file_errors.insert(path.clone(), err.clone());
        }
    });
}

#[derive(Debug, Clone, Copy)]
struct Deferral {
    failures: u32,
    retry_at: Instant,
}

/// Wake-up policy: threshold, debounce, explicit requests and per-file
/// retry cool-downs.
struct WakePolicy {
    threshold: usize,
    debounce: Duration,
    force_immediate: bool,
    deferred: BTreeMap<String, Deferral>,
}

impl WakePolicy {
    fn new(threshold: usize, debounce: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            debounce,
            force_immediate: false,
            deferred: BTreeMap::new(),
        }
    }

    fn force_run(&mut self) {
        self.force_immediate = true;
    }

    fn take_force(&mut self) -> bool {
        std::mem::take(&mut self.force_immediate)
    }

    fn next_retry(&self) -> Option<Instant> {
        self.deferred.values().map(|d| d.retry_at).min()
    }

    fn next_deadline(&self, pending: usize, last_mark: Option<Instant>) -> Option<Instant> {
        if self.force_immediate || pending >= self.threshold {
            return Some(Instant::now());
        }

        let debounced = if pending > 0 {
            last_mark.map(|last| last + self.debounce)
        } else {
            None
        };

        match (debounced, self.next_retry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Why a round should start now, if it should.
    fn wake_reason(&self, pending: usize, last_mark: Option<Instant>) -> Option<&'static str> {
        let now = Instant::now();
        if self.force_immediate {
            return Some("reindex");
        }
        if pending >= self.threshold {
            return Some("threshold");
        }
        if pending > 0 && last_mark.is_some_and(|last| last + self.debounce <= now) {
            return Some("debounce");
        }
        if self.next_retry().is_some_and(|at| at <= now) {
            return Some("retry");
        }
        None
    }

    /// Deferred paths due for retry; every deferred path on a full scan.
    fn take_due(&self, now: Instant, all: bool) -> Vec<String> {
        self.deferred
            .iter()
            .filter(|(_, d)| all || d.retry_at <= now)
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn defer(&mut self, path: &str, now: Instant) -> Duration {
        let failures = self.deferred.get(path).map_or(0, |d| d.failures) + 1;
        let delay = cooldown(failures);
        self.deferred.insert(
            path.to_string(),
            Deferral {
                failures,
                retry_at: now + delay,
            },
        );
        delay
    }

    fn clear(&mut self, path: &str) {
        self.deferred.remove(path);
    }
}

fn cooldown(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    RETRY_INITIAL
        .saturating_mul(1u32 << exponent)
        .min(RETRY_CAP)
}
