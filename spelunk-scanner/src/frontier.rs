//! Shared work state for one exploration run.

use crate::location::Location;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};

/// Outcome of offering a location to the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the location; it has been queued.
    Claimed,
    /// Another worker claimed the same key first.
    Duplicate,
    /// The run already claimed as many locations as it is allowed to.
    OverBudget,
}

/// Keys of every location claimed during one run.
#[derive(Debug, Default)]
pub struct VisitedCache {
    keys: Mutex<HashSet<String>>,
}

impl VisitedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-insert under a single lock.
    pub async fn claim(&self, key: &str) -> bool {
        self.claim_within(key, usize::MAX).await == Claim::Claimed
    }

    pub async fn claim_within(&self, key: &str, limit: usize) -> Claim {
        let mut keys = self.keys.lock().await;
        if keys.contains(key) {
            return Claim::Duplicate;
        }
        if keys.len() >= limit {
            return Claim::OverBudget;
        }
        keys.insert(key.to_string());
        Claim::Claimed
    }

    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }
}

/// Pending locations plus the count of claimed-but-unprocessed work.
///
/// The run is finished exactly when `outstanding` drops to zero. Workers must
/// offer a location's children before calling [`Frontier::complete`] for it.
#[derive(Debug)]
pub struct Frontier {
    queue: Mutex<VecDeque<Location>>,
    visited: VisitedCache,
    outstanding: AtomicUsize,
    max_locations: usize,
    notify: Notify,
}

impl Frontier {
    pub fn new(max_locations: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            visited: VisitedCache::new(),
            outstanding: AtomicUsize::new(0),
            max_locations,
            notify: Notify::new(),
        }
    }

    /// Claim `location` and queue it if nobody claimed its key before.
    pub async fn offer(&self, location: Location) -> Claim {
        let claim = self
            .visited
            .claim_within(&location.key(), self.max_locations)
            .await;
        if claim == Claim::Claimed {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            self.queue.lock().await.push_back(location);
            self.notify.notify_waiters();
        }
        claim
    }

    /// Wait for the next location. `None` once all claimed work is processed.
    pub async fn next(&self) -> Option<Location> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(location) = self.queue.lock().await.pop_front() {
                return Some(location);
            }
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return None;
            }
            notified.await;
        }
    }

    /// Mark one previously claimed location as processed (or abandoned).
    pub fn complete(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Completes one location when dropped, unwinding included.
    pub fn guard(&self) -> WorkGuard<'_> {
        WorkGuard { frontier: self }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub async fn claimed(&self) -> usize {
        self.visited.len().await
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drop everything still queued, releasing its outstanding count.
    pub async fn drain(&self) -> usize {
        let drained: Vec<Location> = self.queue.lock().await.drain(..).collect();
        for _ in &drained {
            self.complete();
        }
        drained.len()
    }
}

/// Held by a worker for the location it is processing.
pub struct WorkGuard<'a> {
    frontier: &'a Frontier,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.frontier.complete();
    }
}
