//! Orchestrator statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every run of an orchestrator
pub struct OrchestratorStats {
    pub transactions_started: AtomicU64,
    pub transactions_committed: AtomicU64,
    pub transactions_failed: AtomicU64,
    pub prepare_failures: AtomicU64,
    pub commit_failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub rollbacks_started: AtomicU64,
    pub rollback_attempts: AtomicU64,
    pub rollbacks_completed: AtomicU64,
    pub rollbacks_exhausted: AtomicU64,
    pub rollbacks_coalesced: AtomicU64,
    pub detached_executors: AtomicU64,
}

impl OrchestratorStats {
    pub fn new() -> Self {
        Self {
            transactions_started: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_failed: AtomicU64::new(0),
            prepare_failures: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            rollbacks_started: AtomicU64::new(0),
            rollback_attempts: AtomicU64::new(0),
            rollbacks_completed: AtomicU64::new(0),
            rollbacks_exhausted: AtomicU64::new(0),
            rollbacks_coalesced: AtomicU64::new(0),
            detached_executors: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OrchestratorStatsSnapshot {
        OrchestratorStatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            prepare_failures: self.prepare_failures.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rollbacks_started: self.rollbacks_started.load(Ordering::Relaxed),
            rollback_attempts: self.rollback_attempts.load(Ordering::Relaxed),
            rollbacks_completed: self.rollbacks_completed.load(Ordering::Relaxed),
            rollbacks_exhausted: self.rollbacks_exhausted.load(Ordering::Relaxed),
            rollbacks_coalesced: self.rollbacks_coalesced.load(Ordering::Relaxed),
            detached_executors: self.detached_executors.load(Ordering::Relaxed),
        }
    }
}

impl Default for OrchestratorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorStatsSnapshot {
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_failed: u64,
    pub prepare_failures: u64,
    pub commit_failures: u64,
    pub timeouts: u64,
    pub rollbacks_started: u64,
    pub rollback_attempts: u64,
    pub rollbacks_completed: u64,
    pub rollbacks_exhausted: u64,
    pub rollbacks_coalesced: u64,
    pub detached_executors: u64,
}
