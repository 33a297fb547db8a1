//! Per-issue mutation locks
//!
//! One async mutex per issue id, created on demand. Holders of the guard are
//! the only writers for that issue inside this process; cross-process safety
//! comes from the version check in the store.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct IssueLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IssueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `issue_id`
    pub async fn acquire(&self, issue_id: &str) -> IssueGuard<'_> {
        let lock = self
            .locks
            .entry(issue_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // Map guard is dropped above, before waiting
        let guard = lock.lock_owned().await;
        IssueGuard {
            locks: self,
            issue_id: issue_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of issues with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one issue; the map entry is pruned on drop when idle
pub struct IssueGuard<'a> {
    locks: &'a IssueLocks,
    issue_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IssueGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still referencing the mutex means nobody holds or waits on it
        self.locks
            .locks
            .remove_if(&self.issue_id, |_, lock| Arc::strong_count(lock) <= 1);
    }
}
