mod common;

use common::fixture;
use gcq_indexer::{Scheduler, SchedulerConfig};
use gcq_protocol::SchedulerState;
use pretty_assertions::assert_eq;
use std::fs;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PATIENCE: Duration = Duration::from_secs(5);

fn start(f: &common::Fixture, config: SchedulerConfig) -> Scheduler {
    Scheduler::start(
        f.indexer.clone(),
        f.dirty.clone(),
        config,
        CancellationToken::new(),
    )
}

async fn wait_for_rounds(scheduler: &Scheduler, rounds: u64) {
    let mut rx = scheduler.status_stream();
    tokio::time::timeout(PATIENCE, rx.wait_for(|s| s.rounds_completed >= rounds))
        .await
        .expect("round in time")
        .expect("scheduler alive");
}

#[tokio::test]
async fn initial_pass_sets_ready() {
    let root = tempfile::tempdir().expect("root");
    let state = tempfile::tempdir().expect("state");
    fs::write(root.path().join("a.txt"), "alpha beta gamma").expect("a");
    let f = fixture(root.path(), state.path());

    let scheduler = start(&f, SchedulerConfig::default());
    assert!(tokio::time::timeout(PATIENCE, scheduler.wait_ready()).await.expect("ready"));

    let status = scheduler.status();
    assert_eq!(status.rounds_completed, 1);
    assert_eq!(status.state, SchedulerState::Idle);
    let round = status.last_round.expect("round");
    assert_eq!(round.reason, "initial");
    assert!(round.persisted);
    assert!(state.path().join("index.idx").exists());
    assert!(scheduler.shutdown(PATIENCE).await);
}

#[tokio::test]
async fn cancelled_initial_pass_never_reports_ready() {
    let root = tempfile::tempdir().expect("root");
    let state = tempfile::tempdir().expect("state");
    fs::write(root.path().join("a.txt"), "alpha beta gamma").expect("a");
    let f = fixture(root.path(), state.path());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let scheduler = Scheduler::start(
        f.indexer.clone(),
        f.dirty.clone(),
        SchedulerConfig::default(),
        cancel,
    );
    wait_for_rounds(&scheduler, 1).await;
    let ready = tokio::time::timeout(PATIENCE, scheduler.wait_ready()).await.expect("resolves");

    assert!(!ready);
    assert!(!scheduler.is_ready());
    let round = scheduler.status().last_round.expect("round");
    assert!(round.cancelled);
    assert_eq!(f.provider.calls(), 0);
    assert!(scheduler.shutdown(PATIENCE).await);
}

#[tokio::test]
async fn threshold_triggers_round_before_debounce() {
    let root = tempfile::tempdir().expect("root");
    let state = tempfile::tempdir().expect("state");
    let f = fixture(root.path(), state.path());
    let scheduler = start(
        &f,
        SchedulerConfig {
            dirty_threshold: 3,
            debounce: Duration::from_secs(600),
        },
    );
    assert!(scheduler.wait_ready().await);

    for name in ["x.txt", "y.txt", "z.txt"] {
        fs::write(root.path().join(name), "alpha").expect("write");
        scheduler.mark_dirty(name);
    }

    wait_for_rounds(&scheduler, 2).await;
    let status = scheduler.status();
    assert_eq!(status.last_round.expect("round").reason, "threshold");
    assert_eq!(f.dirty.size(), 0);
    assert_eq!(f.indexer.index().file_count(), 3);
    assert!(scheduler.shutdown(PATIENCE).await);
}

#[tokio::test]
async fn debounce_fires_after_quiet_period() {
    let root = tempfile::tempdir().expect("root");
    let state = tempfile::tempdir().expect("state");
    let f = fixture(root.path(), state.path());
    let scheduler = start(
        &f,
        SchedulerConfig {
            dirty_threshold: 20,
            debounce: Duration::from_millis(50),
        },
    );
    assert!(scheduler.wait_ready().await);

    fs::write(root.path().join("a.txt"), "delta").expect("write");
    for _ in 0..20 {
        scheduler.mark_dirty("a.txt");
    }
    assert_eq!(f.dirty.size(), 1);

    wait_for_rounds(&scheduler, 2).await;
    assert_eq!(scheduler.status().last_round.expect("round").reason, "debounce");
    assert!(f.indexer.index().contains_file("a.txt"));
    assert!(scheduler.shutdown(PATIENCE).await);
}

#[tokio::test]
async fn reindex_waits_for_full_round() {
    let root = tempfile::tempdir().expect("root");
    let state = tempfile::tempdir().expect("state");
    let f = fixture(root.path(), state.path());
    let scheduler = start(&f, SchedulerConfig::default());
    assert!(scheduler.wait_ready().await);

    fs::write(root.path().join("late.txt"), "gamma").expect("write");
    let summary = tokio::time::timeout(PATIENCE, scheduler.reindex(true))
        .await
        .expect("in time")
        .expect("reindex")
        .expect("summary");

    assert_eq!(summary.reason, "reindex");
    assert!(summary.full_scan);
    assert_eq!(summary.files_indexed, 1);
    assert!(f.indexer.index().contains_file("late.txt"));

    assert_eq!(scheduler.reindex(false).await.expect("queued"), None);
    assert!(scheduler.shutdown(PATIENCE).await);
}

#[tokio::test]
async fn failed_files_appear_in_error_map_until_fixed() {
    let root = tempfile::tempdir().expect("root");
    let state = tempfile::tempdir().expect("state");
    fs::write(root.path().join("a.txt"), "alpha").expect("a");
    let f = fixture(root.path(), state.path());
    f.provider.set_failing(true);

    let scheduler = start(&f, SchedulerConfig::default());
    assert!(scheduler.wait_ready().await, "ready even when files fail");
    let status = scheduler.status();
    assert!(status.file_errors.contains_key("a.txt"));
    assert_eq!(status.last_round.expect("round").files_deferred, 1);

    f.provider.set_failing(false);
    let summary = scheduler.reindex(true).await.expect("reindex").expect("summary");
    assert_eq!(summary.files_indexed, 1);
    assert!(scheduler.status().file_errors.is_empty());
    assert!(scheduler.shutdown(PATIENCE).await);
}
