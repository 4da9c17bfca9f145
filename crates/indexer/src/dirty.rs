use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct DirtyInner {
    members: HashSet<String>,
    order: Vec<String>,
    marks: u64,
    last_mark: Option<Instant>,
}

/// Paths awaiting reindex, in first-marked order.
///
/// Every mark wakes one waiter; `drain` empties the set in one critical
/// section.
#[derive(Default)]
pub struct DirtySet {
    inner: Mutex<DirtyInner>,
    changed: Notify,
}

impl DirtySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirtyInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `path`. Returns false if it was already pending.
    pub fn mark_dirty(&self, path: impl Into<String>) -> bool {
        let path = path.into();
        let inserted = {
            let mut inner = self.lock();
            inner.marks += 1;
            inner.last_mark = Some(Instant::now());
            if inner.members.insert(path.clone()) {
                inner.order.push(path);
                true
            } else {
                false
            }
        };
        self.changed.notify_one();
        inserted
    }

    /// Take every pending path in insertion order.
    pub fn drain(&self) -> Vec<String> {
        let mut inner = self.lock();
        inner.members.clear();
        inner.last_mark = None;
        std::mem::take(&mut inner.order)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Total `mark_dirty` calls since creation.
    #[must_use]
    pub fn marks(&self) -> u64 {
        self.lock().marks
    }

    /// Time of the most recent mark while paths are pending.
    #[must_use]
    pub fn last_mark(&self) -> Option<Instant> {
        self.lock().last_mark
    }

    /// Resolves after the next mark (or immediately if one happened since
    /// the last wait).
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
