//! Timeout guard
//!
//! Races the executor task against the transaction deadline. When the
//! deadline wins and no rollback has been claimed yet, the guard rolls back
//! the whole operation set and returns a timeout failure. The executor task is
//! not cancelled: it keeps running and its eventual outcome is discarded.
//! Such tasks are parked in [`DetachedExecutors`] so the orchestrator can reap
//! or drain them.

use crate::transaction::{ExecutionEnv, OperationSet};
use crate::{
    FailureReason, OrchestratorStats, TransactionEvent, TransactionId, TransactionOutcome,
    TransactionPhase,
};
use std::sync::{Mutex, PoisonError};
use tokio::task::{JoinError, JoinHandle};

/// Executor tasks that lost the race against their deadline
#[derive(Default)]
pub struct DetachedExecutors {
    handles: Mutex<Vec<(TransactionId, JoinHandle<TransactionOutcome>)>>,
}

impl DetachedExecutors {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, txn_id: TransactionId, handle: JoinHandle<TransactionOutcome>) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((txn_id, handle));
    }

    /// Number of tracked tasks, finished or not
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget tasks that have already finished; returns how many were removed
    pub fn reap(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handles.len();
        handles.retain(|(_, handle)| !handle.is_finished());
        before - handles.len()
    }

    /// Wait for every tracked task to finish; returns how many were awaited
    pub async fn drain(&self) -> usize {
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let count = handles.len();

        for (txn_id, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    tracing::debug!(
                        txn_id = %txn_id,
                        phase = %outcome.phase(),
                        "Discarded detached executor outcome"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        txn_id = %txn_id,
                        error = %err,
                        "Detached executor did not finish cleanly"
                    );
                }
            }
        }

        count
    }
}

/// Wait for the executor or the deadline, whichever comes first.
///
/// A deadline that passes after the executor has already started its own
/// rollback does not override it: the guard waits for the executor and
/// reports the executor's failure.
pub(crate) async fn guard(
    env: &ExecutionEnv,
    operations: OperationSet,
    deadline: tokio::time::Instant,
    mut executor: JoinHandle<TransactionOutcome>,
    detached: &DetachedExecutors,
    abort_on_timeout: bool,
) -> TransactionOutcome {
    tokio::select! {
        biased;

        joined = &mut executor => settle(env, &operations, joined).await,

        _ = tokio::time::sleep_until(deadline) => {
            let reason = FailureReason::TimeoutFailure {
                timeout_millis: env.timeout_millis,
            };
            let everything = (0..operations.len()).collect();

            if env.claim_rollback(everything, reason.clone()) {
                time_out(env, &operations, reason, executor, detached, abort_on_timeout).await
            } else {
                tracing::debug!(
                    txn_id = %env.txn_id,
                    claimed = ?env.rollback_claim().map(|claim| &claim.reason),
                    "Deadline passed during executor rollback, waiting for it"
                );
                settle(env, &operations, executor.await).await
            }
        }
    }
}

async fn settle(
    env: &ExecutionEnv,
    operations: &OperationSet,
    joined: Result<TransactionOutcome, JoinError>,
) -> TransactionOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(txn_id = %env.txn_id, error = %err, "Executor task failed");
            let reason = FailureReason::ExecutorAborted {
                cause: err.to_string().into(),
            };
            // a rollback the executor already claimed keeps its scope
            env.claim_rollback((0..operations.len()).collect(), reason.clone());
            let indices = env
                .rollback_claim()
                .map(|claim| claim.indices.clone())
                .unwrap_or_default();
            let rollback = env
                .rollback
                .rollback_all(indices.iter().map(|&index| (index, &operations[index])))
                .await;
            TransactionOutcome::failed(reason, rollback)
        }
    }
}

/// Roll back the whole set after the deadline won the race
async fn time_out(
    env: &ExecutionEnv,
    operations: &OperationSet,
    reason: FailureReason,
    executor: JoinHandle<TransactionOutcome>,
    detached: &DetachedExecutors,
    abort_on_timeout: bool,
) -> TransactionOutcome {
    OrchestratorStats::incr(&env.stats.timeouts);
    OrchestratorStats::incr(&env.stats.detached_executors);
    env.record(TransactionEvent::TimedOut {
        timeout_millis: env.timeout_millis,
    });
    env.observer.on_timed_out(env.txn_id, env.timeout_millis);

    if abort_on_timeout {
        env.request_abort();
    }
    detached.push(env.txn_id, executor);

    // fold the timeout into the CommitFailed -> RollingBack branch
    let mut phase = env.current_phase();
    for next in [TransactionPhase::CommitFailed, TransactionPhase::RollingBack] {
        if phase.can_transition_to(next) {
            env.phase_changed(phase, next);
            phase = next;
        }
    }

    let rollback = env.rollback.rollback_all(operations.iter().enumerate()).await;
    if phase == TransactionPhase::RollingBack {
        env.phase_changed(phase, rollback.terminal_phase());
    }
    TransactionOutcome::failed(reason, rollback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn reap_and_drain_track_detached_tasks() {
        let detached = DetachedExecutors::new();
        detached.push(
            TransactionId::new(1),
            tokio::spawn(async { TransactionOutcome::Committed }),
        );
        detached.push(
            TransactionId::new(2),
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                TransactionOutcome::Committed
            }),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(detached.reap(), 1);
        assert_eq!(detached.len(), 1);

        assert_eq!(detached.drain().await, 1);
        assert!(detached.is_empty());
    }
}
