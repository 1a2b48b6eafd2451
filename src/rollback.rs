//! Rollback coordinator shared by both execution modes
//!
//! Each operation ID gets at most one attempt sequence per transaction. The
//! sequence runs as its own task so that it completes even if every requester
//! stops waiting; requesters observe its result through a watch channel.

use crate::dedupe::{RollbackResult, RollbackSlot, SlotEntry};
use crate::journal::record_event;
use crate::{
    Operation, OperationId, OrchestratorStats, RetryPolicy, RollbackAttempt, RollbackFailure,
    RollbackOutcome, RollbackRecord, RollbackStatus, RollbackTable, StepContext, StepPhase,
    TransactionError, TransactionEvent, TransactionId, TransactionJournal, TransactionObserver,
};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;

/// Transaction-scoped rollback coordinator
#[derive(Clone)]
pub struct RollbackCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    txn_id: TransactionId,
    txn_started_at_millis: u64,
    policy: RetryPolicy,
    table: RollbackTable,
    journal: Arc<dyn TransactionJournal>,
    observer: Arc<dyn TransactionObserver>,
    stats: Arc<OrchestratorStats>,
}

/// Pending result of a rollback request
pub struct RollbackHandle {
    operation_id: OperationId,
    result: watch::Receiver<Option<RollbackResult>>,
}

impl RollbackHandle {
    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    /// Wait for the attempt sequence to finish; returns the attempts used
    pub async fn wait(mut self) -> Result<u32, RollbackFailure> {
        match self.result.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or_else(|| {
                Err(RollbackFailure {
                    operation_id: self.operation_id.clone(),
                    attempts: 0,
                    last_error: "rollback result missing".into(),
                })
            }),
            Err(_) => Err(RollbackFailure {
                operation_id: self.operation_id,
                attempts: 0,
                last_error: "rollback coordinator dropped".into(),
            }),
        }
    }
}

impl RollbackCoordinator {
    pub fn new(
        txn_id: TransactionId,
        txn_started_at_millis: u64,
        policy: RetryPolicy,
        journal: Arc<dyn TransactionJournal>,
        observer: Arc<dyn TransactionObserver>,
        stats: Arc<OrchestratorStats>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                txn_id,
                txn_started_at_millis,
                policy,
                table: RollbackTable::new(),
                journal,
                observer,
                stats,
            }),
        }
    }

    pub fn txn_id(&self) -> TransactionId {
        self.inner.txn_id
    }

    /// Request compensation of one operation.
    ///
    /// Starts the attempt sequence if this is the first request for the
    /// operation's ID, otherwise attaches to the existing one. Must be called
    /// inside a tokio runtime.
    pub fn request(&self, index: usize, operation: &Arc<dyn Operation>) -> RollbackHandle {
        let operation_id = operation.id().clone();
        let inner = &self.inner;

        let slot = match inner.table.get_or_create(&operation_id) {
            SlotEntry::Existing(slot) => {
                OrchestratorStats::incr(&inner.stats.rollbacks_coalesced);
                tracing::trace!(
                    txn_id = %inner.txn_id,
                    operation_id = %operation_id,
                    "Attaching to existing rollback"
                );
                record_event(
                    inner.journal.as_ref(),
                    inner.txn_id,
                    TransactionEvent::RollbackCoalesced {
                        operation_id: operation_id.clone(),
                    },
                );
                slot
            }
            SlotEntry::Created(slot) => {
                OrchestratorStats::incr(&inner.stats.rollbacks_started);
                record_event(
                    inner.journal.as_ref(),
                    inner.txn_id,
                    TransactionEvent::RollbackStarted {
                        operation_id: operation_id.clone(),
                    },
                );
                inner.observer.on_rollback_started(inner.txn_id, &operation_id);
                self.spawn_sequence(index, operation.clone(), slot.clone());
                slot
            }
        };

        RollbackHandle {
            operation_id,
            result: slot.subscribe(),
        }
    }

    /// Compensate one operation and wait for the result
    pub async fn rollback(
        &self,
        index: usize,
        operation: &Arc<dyn Operation>,
    ) -> Result<u32, RollbackFailure> {
        self.request(index, operation).wait().await
    }

    /// Compensate a set of operations concurrently.
    ///
    /// Sequences are started in iteration order; completion order is
    /// unspecified. Returns once every sequence has finished.
    pub async fn rollback_all<'a, I>(&self, operations: I) -> RollbackOutcome
    where
        I: IntoIterator<Item = (usize, &'a Arc<dyn Operation>)>,
    {
        let handles: Vec<RollbackHandle> = operations
            .into_iter()
            .map(|(index, operation)| self.request(index, operation))
            .collect();

        let results = futures::future::join_all(handles.into_iter().map(|handle| async move {
            let operation_id = handle.operation_id().clone();
            (operation_id, handle.wait().await)
        }))
        .await;

        RollbackOutcome::from_results(results)
    }

    pub fn record(&self, operation_id: &OperationId) -> Option<RollbackRecord> {
        self.inner.table.record(operation_id)
    }

    pub fn records(&self) -> BTreeMap<OperationId, RollbackRecord> {
        self.inner.table.records()
    }

    fn spawn_sequence(&self, index: usize, operation: Arc<dyn Operation>, slot: Arc<RollbackSlot>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let operation_id = operation.id().clone();
            let sequence = attempt_sequence(inner.clone(), index, operation, slot.clone());
            let result = match AssertUnwindSafe(sequence).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    let failure = RollbackFailure {
                        operation_id,
                        attempts: slot.record().attempts,
                        last_error: "compensation panicked".into(),
                    };
                    slot.update(|record| {
                        record.status = RollbackStatus::Failed;
                        record.last_error = Some(failure.last_error.clone());
                    });
                    OrchestratorStats::incr(&inner.stats.rollbacks_exhausted);
                    inner.observer.on_rollback_failed(inner.txn_id, &failure);
                    Err(failure)
                }
            };
            slot.finish(result);
        });
    }
}

async fn attempt_sequence(
    inner: Arc<Inner>,
    index: usize,
    operation: Arc<dyn Operation>,
    slot: Arc<RollbackSlot>,
) -> RollbackResult {
    let operation_id = operation.id().clone();
    let max_attempts = inner.policy.max_attempts.max(1);
    let context = StepContext::new(
        inner.txn_id,
        operation_id.clone(),
        index,
        StepPhase::Compensate,
        inner.txn_started_at_millis,
    );

    let mut attempts = 0;
    let mut last_error: Box<str> = "no attempt made".into();

    while attempts < max_attempts {
        attempts += 1;
        slot.update(|record| {
            record.status = RollbackStatus::InProgress;
            record.attempts = attempts;
        });
        OrchestratorStats::incr(&inner.stats.rollback_attempts);

        let attempt_context = if attempts == 1 {
            context.clone()
        } else {
            context.retry(attempts)
        };
        let attempt: RollbackAttempt = operation
            .compensate(&attempt_context, operation.payload())
            .await
            .into();

        let (cause, will_retry) = match attempt {
            RollbackAttempt::Done => {
                slot.update(|record| record.status = RollbackStatus::Done);
                OrchestratorStats::incr(&inner.stats.rollbacks_completed);
                record_event(
                    inner.journal.as_ref(),
                    inner.txn_id,
                    TransactionEvent::RollbackCompleted {
                        operation_id: operation_id.clone(),
                        attempts,
                    },
                );
                inner
                    .observer
                    .on_rollback_completed(inner.txn_id, &operation_id, attempts);
                return Ok(attempts);
            }
            RollbackAttempt::Retryable(cause) => (cause, attempts < max_attempts),
            RollbackAttempt::Fatal(cause) => (cause, false),
        };

        let error = TransactionError::RollbackFailure {
            operation_id: operation_id.clone(),
            attempt: attempts,
            cause: cause.clone(),
        };
        tracing::debug!(
            txn_id = %inner.txn_id,
            error = %error,
            will_retry,
            elapsed_ms = attempt_context.elapsed_millis(),
            "Compensation attempt failed"
        );
        record_event(
            inner.journal.as_ref(),
            inner.txn_id,
            TransactionEvent::RollbackAttemptFailed {
                operation_id: operation_id.clone(),
                attempt: attempts,
                error: cause.clone(),
                will_retry,
            },
        );
        slot.update(|record| record.last_error = Some(cause.clone()));
        last_error = cause;

        if !will_retry {
            break;
        }
        tokio::time::sleep(inner.policy.delay_for_attempt(attempts)).await;
    }

    let failure = RollbackFailure {
        operation_id: operation_id.clone(),
        attempts,
        last_error,
    };
    slot.update(|record| record.status = RollbackStatus::Failed);
    OrchestratorStats::incr(&inner.stats.rollbacks_exhausted);
    record_event(
        inner.journal.as_ref(),
        inner.txn_id,
        TransactionEvent::RollbackExhausted {
            operation_id,
            attempts,
            error: failure.last_error.clone(),
        },
    );
    inner.observer.on_rollback_failed(inner.txn_id, &failure);
    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_tracing, CallLog, ScriptedOperation};
    use crate::{InMemoryJournal, NoOpObserver};
    use std::time::Duration;

    fn coordinator(
        policy: RetryPolicy,
    ) -> (RollbackCoordinator, Arc<InMemoryJournal>, Arc<OrchestratorStats>) {
        init_tracing();
        let journal = Arc::new(InMemoryJournal::new());
        let stats = Arc::new(OrchestratorStats::new());
        let coordinator = RollbackCoordinator::new(
            TransactionId::next(),
            StepContext::now_millis(),
            policy,
            journal.clone(),
            Arc::new(NoOpObserver),
            stats.clone(),
        );
        (coordinator, journal, stats)
    }

    #[tokio::test]
    async fn concurrent_requests_invoke_compensation_once() {
        let (coordinator, _, stats) = coordinator(RetryPolicy::fixed(3, Duration::from_millis(1)));
        let log = CallLog::new();
        let op = ScriptedOperation::new("a", &log)
            .compensate_delay(Duration::from_millis(20))
            .shared();

        let first = coordinator.request(0, &op);
        let second = coordinator.request(0, &op);
        let (first, second) = tokio::join!(first.wait(), second.wait());

        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(1));
        assert_eq!(log.count("a", StepPhase::Compensate), 1);
        assert_eq!(stats.snapshot().rollbacks_coalesced, 1);
    }

    #[tokio::test]
    async fn completed_rollback_is_memoized() {
        let (coordinator, _, _) = coordinator(RetryPolicy::default());
        let log = CallLog::new();
        let op = ScriptedOperation::new("a", &log).shared();

        assert_eq!(coordinator.rollback(0, &op).await, Ok(1));
        assert_eq!(coordinator.rollback(0, &op).await, Ok(1));

        assert_eq!(log.count("a", StepPhase::Compensate), 1);
        let record = coordinator.record(&"a".into()).unwrap();
        assert_eq!(record.status, RollbackStatus::Done);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_is_fatal() {
        let (coordinator, journal, _) =
            coordinator(RetryPolicy::fixed(4, Duration::from_millis(250)));
        let log = CallLog::new();
        let op = ScriptedOperation::new("a", &log)
            .compensate_always_fails()
            .shared();

        let started = tokio::time::Instant::now();
        let failure = coordinator.rollback(0, &op).await.unwrap_err();

        assert_eq!(failure.operation_id, OperationId::from("a"));
        assert_eq!(failure.attempts, 4);
        assert_eq!(log.count("a", StepPhase::Compensate), 4);
        // three delays between four attempts
        assert_eq!(started.elapsed(), Duration::from_millis(750));

        let record = coordinator.record(&"a".into()).unwrap();
        assert_eq!(record.status, RollbackStatus::Failed);
        assert!(journal
            .events(coordinator.txn_id())
            .iter()
            .any(|e| matches!(e, TransactionEvent::RollbackExhausted { attempts: 4, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (coordinator, _, _) = coordinator(RetryPolicy::fixed(3, Duration::from_millis(10)));
        let log = CallLog::new();
        let op = ScriptedOperation::new("a", &log)
            .compensate_fails_times(2)
            .shared();

        assert_eq!(coordinator.rollback(0, &op).await, Ok(3));
        assert_eq!(log.count("a", StepPhase::Compensate), 3);
    }

    #[tokio::test]
    async fn terminal_error_stops_retrying() {
        let (coordinator, _, _) = coordinator(RetryPolicy::fixed(5, Duration::from_millis(1)));
        let log = CallLog::new();
        let op = ScriptedOperation::new("a", &log)
            .compensate_terminal("account closed")
            .shared();

        let failure = coordinator.rollback(0, &op).await.unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(&*failure.last_error, "account closed");
        assert_eq!(log.count("a", StepPhase::Compensate), 1);
    }

    #[tokio::test]
    async fn rollback_all_reports_each_operation() {
        let (coordinator, _, _) = coordinator(RetryPolicy::fixed(1, Duration::ZERO));
        let log = CallLog::new();
        let ok = ScriptedOperation::new("ok", &log).shared();
        let bad = ScriptedOperation::new("bad", &log)
            .compensate_always_fails()
            .shared();
        let ops = [ok, bad];

        let outcome = coordinator
            .rollback_all(ops.iter().enumerate())
            .await;

        match outcome {
            RollbackOutcome::RollbackFailed { rolled_back, failures } => {
                assert_eq!(rolled_back, vec![OperationId::from("ok")]);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].operation_id, OperationId::from("bad"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(coordinator.records().len(), 2);
    }

    #[tokio::test]
    async fn panicking_compensation_fails_the_record() {
        let (coordinator, _, _) = coordinator(RetryPolicy::fixed(3, Duration::ZERO));
        let log = CallLog::new();
        let op = ScriptedOperation::new("a", &log)
            .compensate_panics()
            .shared();

        let failure = coordinator.rollback(0, &op).await.unwrap_err();

        assert_eq!(&*failure.last_error, "compensation panicked");
        assert_eq!(
            coordinator.record(&"a".into()).unwrap().status,
            RollbackStatus::Failed
        );
    }
}
