//! Transaction orchestrator entry point

use crate::timeout::{self, DetachedExecutors};
use crate::transaction::ExecutionEnv;
use crate::{
    saga, two_phase, ExecutionMode, NoOpJournal, Operation, OrchestratorStats,
    OrchestratorStatsSnapshot, RollbackCoordinator, TracingObserver, Transaction, TransactionError,
    TransactionEvent, TransactionId, TransactionJournal, TransactionObserver, TransactionOptions,
    TransactionOutcome, TransactionReport,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runs transactions in either execution mode.
///
/// Each call to [`run`](Self::run) owns its own transaction and rollback
/// table; the orchestrator itself only holds configuration, observability
/// sinks and the executors that outlived their deadline.
pub struct TransactionOrchestrator {
    options: TransactionOptions,
    journal: Arc<dyn TransactionJournal>,
    observer: Arc<dyn TransactionObserver>,
    stats: Arc<OrchestratorStats>,
    detached: DetachedExecutors,
}

impl TransactionOrchestrator {
    pub fn new(options: TransactionOptions) -> Self {
        Self {
            options,
            journal: Arc::new(NoOpJournal),
            observer: Arc::new(TracingObserver),
            stats: Arc::new(OrchestratorStats::new()),
            detached: DetachedExecutors::new(),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn TransactionJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn journal(&self) -> &Arc<dyn TransactionJournal> {
        &self.journal
    }

    pub fn stats(&self) -> OrchestratorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Executors still tracked after losing to their deadline
    pub fn detached_count(&self) -> usize {
        self.detached.len()
    }

    /// Drop finished detached executors; returns how many were removed
    pub fn reap_detached(&self) -> usize {
        self.detached.reap()
    }

    /// Wait for every detached executor to finish
    pub async fn drain_detached(&self) -> usize {
        self.detached.drain().await
    }

    /// Run with the orchestrator's default options
    pub async fn run(
        &self,
        operations: Vec<Arc<dyn Operation>>,
    ) -> Result<TransactionReport, TransactionError> {
        self.run_with(operations, &self.options).await
    }

    /// Run with explicit options.
    ///
    /// Returns `Err` only for malformed input, before any phase call is made.
    /// Phase failures come back as a failed [`TransactionReport`]; the call
    /// never returns while a compensation is still running.
    pub async fn run_with(
        &self,
        operations: Vec<Arc<dyn Operation>>,
        options: &TransactionOptions,
    ) -> Result<TransactionReport, TransactionError> {
        options.validate()?;

        let txn_id = TransactionId::next();
        let started = tokio::time::Instant::now();
        let deadline = started + options.timeout();
        let txn = Transaction::new(txn_id, options.mode, operations)?;

        if txn.is_empty() {
            tracing::debug!(txn_id = %txn_id, "Empty transaction, nothing to do");
            return Ok(TransactionReport {
                transaction_id: txn_id,
                outcome: TransactionOutcome::Committed,
                rollback_records: BTreeMap::new(),
                elapsed_millis: 0,
            });
        }

        OrchestratorStats::incr(&self.stats.transactions_started);
        crate::journal::record_event(
            self.journal.as_ref(),
            txn_id,
            TransactionEvent::TransactionStarted {
                mode: options.mode,
                operation_count: txn.len(),
                timeout_millis: options.timeout_millis,
            },
        );
        self.observer
            .on_transaction_started(txn_id, options.mode, txn.len());

        let rollback = RollbackCoordinator::new(
            txn_id,
            txn.started_at_millis(),
            options.rollback_retry.clone(),
            self.journal.clone(),
            self.observer.clone(),
            self.stats.clone(),
        );
        let env = ExecutionEnv::new(
            txn_id,
            options.timeout_millis,
            rollback,
            self.journal.clone(),
            self.observer.clone(),
            self.stats.clone(),
        );

        let operations = txn.operations().clone();
        let executor = match options.mode {
            ExecutionMode::TwoPhase => tokio::spawn(two_phase::execute(txn, env.clone())),
            ExecutionMode::Saga => tokio::spawn(saga::execute(txn, env.clone())),
        };
        let outcome = timeout::guard(
            &env,
            operations,
            deadline,
            executor,
            &self.detached,
            options.abort_on_timeout,
        )
        .await;
        let elapsed_millis = started.elapsed().as_millis() as u64;

        match &outcome {
            TransactionOutcome::Committed => {
                OrchestratorStats::incr(&self.stats.transactions_committed);
                self.observer.on_transaction_committed(txn_id, elapsed_millis);
            }
            TransactionOutcome::Failed { reason, .. } => {
                OrchestratorStats::incr(&self.stats.transactions_failed);
                self.observer.on_transaction_failed(txn_id, reason);
            }
        }
        env.record(TransactionEvent::TransactionFinished {
            success: outcome.is_committed(),
            phase: outcome.phase(),
        });

        Ok(TransactionReport {
            transaction_id: txn_id,
            outcome,
            rollback_records: env.rollback.records(),
            elapsed_millis,
        })
    }
}

impl Default for TransactionOrchestrator {
    fn default() -> Self {
        Self::new(TransactionOptions::default())
    }
}

/// Run one transaction with a throwaway orchestrator.
///
/// An executor that outlives its deadline here is left running unobserved;
/// use a long-lived [`TransactionOrchestrator`] to reap or drain it.
pub async fn run(
    operations: Vec<Arc<dyn Operation>>,
    options: TransactionOptions,
) -> Result<TransactionReport, TransactionError> {
    TransactionOrchestrator::new(options).run(operations).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_tracing, CallLog, ScriptedOperation};
    use crate::{
        FailureReason, InMemoryJournal, OperationId, RollbackOutcome, RollbackStatus, StepPhase,
        TransactionPhase,
    };
    use std::time::Duration;

    fn orchestrator(
        options: TransactionOptions,
    ) -> (TransactionOrchestrator, Arc<InMemoryJournal>) {
        init_tracing();
        let journal = Arc::new(InMemoryJournal::new());
        let orchestrator = TransactionOrchestrator::new(options).with_journal(journal.clone());
        (orchestrator, journal)
    }

    fn fast_retry(options: TransactionOptions) -> TransactionOptions {
        options
            .with_max_rollback_attempts(3)
            .with_rollback_retry_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn scenario_a_commit_failure_rolls_back_both() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log).shared(),
            ScriptedOperation::new("B", &log).commit_errors().shared(),
        ];
        let (orchestrator, _) = orchestrator(fast_retry(TransactionOptions::two_phase()));

        let report = orchestrator.run(ops).await.unwrap();

        assert!(!report.success());
        assert_eq!(report.failed_operation_id(), Some(&OperationId::from("B")));
        assert_eq!(log.count("A", StepPhase::Compensate), 1);
        assert_eq!(log.count("B", StepPhase::Compensate), 1);
        assert_eq!(report.rollback_records.len(), 2);
        assert!(report
            .rollback_records
            .values()
            .all(|record| record.status == RollbackStatus::Done));
        assert!(matches!(report.into_result(), Err(TransactionError::CommitFailure(_))));
    }

    #[tokio::test]
    async fn scenario_b_empty_set_succeeds_in_any_mode() {
        for options in [TransactionOptions::two_phase(), TransactionOptions::saga()] {
            let (orchestrator, journal) = orchestrator(options);

            let report = orchestrator.run(Vec::new()).await.unwrap();

            assert!(report.success());
            assert!(report.rollback_records.is_empty());
            assert_eq!(report.rollback_status(), &RollbackOutcome::NotAttempted);
            assert!(journal.list_transactions().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn scenario_c_saga_compensates_only_prior_steps() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log).shared(),
            ScriptedOperation::new("B", &log).commit_errors().shared(),
            ScriptedOperation::new("C", &log).shared(),
        ];
        let (orchestrator, _) = orchestrator(fast_retry(TransactionOptions::saga()));

        let report = orchestrator.run(ops).await.unwrap();

        assert!(!report.success());
        assert_eq!(log.ids_for(StepPhase::Compensate), ["A"]);
        assert_eq!(log.count("C", StepPhase::Forward), 0);
        assert_eq!(report.failed_operation_id(), Some(&OperationId::from("B")));
    }

    #[tokio::test]
    async fn successful_run_never_compensates() {
        let log = CallLog::new();
        let ops = (0..5u64)
            .map(|id| ScriptedOperation::new(id, &log).shared())
            .collect();
        let (orchestrator, journal) = orchestrator(TransactionOptions::two_phase());

        let report = orchestrator.run(ops).await.unwrap();

        assert!(report.success());
        assert!(log.ids_for(StepPhase::Compensate).is_empty());
        assert_eq!(orchestrator.stats().transactions_committed, 1);
        assert!(journal
            .events(report.transaction_id)
            .contains(&TransactionEvent::TransactionFinished {
                success: true,
                phase: TransactionPhase::Committed,
            }));
    }

    #[tokio::test]
    async fn invalid_operations_fail_before_any_call() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log).shared(),
            ScriptedOperation::new("A", &log).shared(),
        ];
        let (orchestrator, _) = orchestrator(TransactionOptions::default());

        let err = orchestrator.run(ops).await.unwrap_err();

        assert!(matches!(err, TransactionError::InvalidOperationSpec { index: 1, .. }));
        assert!(log.is_empty());
        assert_eq!(orchestrator.stats().transactions_started, 0);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let log = CallLog::new();
        let ops = vec![ScriptedOperation::new("A", &log).shared()];

        let err = run(ops, TransactionOptions::default().with_max_rollback_attempts(0))
            .await
            .unwrap_err();

        assert!(matches!(err, TransactionError::InvalidInput(_)));
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rollback_is_fatal_and_compound() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log)
                .compensate_always_fails()
                .shared(),
            ScriptedOperation::new("B", &log).prepare_votes_no().shared(),
        ];
        let options = TransactionOptions::two_phase()
            .with_max_rollback_attempts(4)
            .with_rollback_retry_delay(Duration::from_millis(100));
        let (orchestrator, _) = orchestrator(options);

        let report = orchestrator.run(ops).await.unwrap();

        assert_eq!(log.count("A", StepPhase::Compensate), 4);
        assert_eq!(report.outcome.phase(), TransactionPhase::RollbackFailed);
        assert_eq!(report.rollback_records[&OperationId::from("A")].attempts, 4);

        match report.into_result() {
            Err(TransactionError::RollbackFailed { cause, failures }) => {
                assert!(matches!(cause, FailureReason::PrepareFailure { index: 1, .. }));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].operation_id, OperationId::from("A"));
                assert_eq!(failures[0].attempts, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(orchestrator.stats().rollbacks_exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_at_deadline_and_detaches_executor() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log).shared(),
            ScriptedOperation::new("B", &log)
                .commit_delay(Duration::from_secs(10))
                .shared(),
        ];
        let options =
            fast_retry(TransactionOptions::two_phase()).with_timeout(Duration::from_millis(100));
        let (orchestrator, journal) = orchestrator(options);

        let started = tokio::time::Instant::now();
        let report = orchestrator.run(ops).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert!(matches!(
            report.failure_reason(),
            Some(FailureReason::TimeoutFailure { timeout_millis: 100 })
        ));
        assert!(matches!(
            report.rollback_status(),
            RollbackOutcome::RolledBack { operations } if operations.len() == 2
        ));
        assert_eq!(
            transitions_after_timeout(&journal, report.transaction_id),
            [
                (TransactionPhase::Committing, TransactionPhase::CommitFailed),
                (TransactionPhase::CommitFailed, TransactionPhase::RollingBack),
                (TransactionPhase::RollingBack, TransactionPhase::RolledBack),
            ]
        );
        assert_eq!(orchestrator.detached_count(), 1);
        assert_eq!(orchestrator.stats().timeouts, 1);

        // the background executor keeps going and finishes its commits
        assert_eq!(orchestrator.drain_detached().await, 1);
        assert_eq!(log.count("B", StepPhase::Commit), 1);
        assert_eq!(log.count("B", StepPhase::Compensate), 1);
        assert_eq!(orchestrator.detached_count(), 0);
    }

    fn transitions_after_timeout(
        journal: &InMemoryJournal,
        txn_id: TransactionId,
    ) -> Vec<(TransactionPhase, TransactionPhase)> {
        let events = journal.events(txn_id);
        let timed_out = events
            .iter()
            .position(|e| matches!(e, TransactionEvent::TimedOut { .. }))
            .unwrap();
        events[timed_out..]
            .iter()
            .filter_map(|e| match e {
                TransactionEvent::PhaseChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_saga_rollback_keeps_executor_failure() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log)
                .compensate_delay(Duration::from_millis(500))
                .shared(),
            ScriptedOperation::new("B", &log).commit_errors().shared(),
            ScriptedOperation::new("C", &log).shared(),
        ];
        let options =
            fast_retry(TransactionOptions::saga()).with_timeout(Duration::from_millis(100));
        let (orchestrator, journal) = orchestrator(options);

        let started = tokio::time::Instant::now();
        let report = orchestrator.run(ops).await.unwrap();

        // the run waits for the executor's compensation instead of timing out
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert!(matches!(
            report.failure_reason(),
            Some(FailureReason::CommitFailure { index: 1, .. })
        ));
        assert_eq!(report.failed_operation_id(), Some(&OperationId::from("B")));
        assert_eq!(log.ids_for(StepPhase::Forward), ["A", "B"]);
        assert_eq!(log.ids_for(StepPhase::Compensate), ["A"]);
        assert_eq!(report.rollback_records.len(), 1);

        assert_eq!(orchestrator.stats().timeouts, 0);
        assert_eq!(orchestrator.detached_count(), 0);
        assert!(!journal
            .events(report.transaction_id)
            .iter()
            .any(|e| matches!(e, TransactionEvent::TimedOut { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_prepare_rollback_keeps_prepare_failure() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log)
                .compensate_delay(Duration::from_millis(500))
                .shared(),
            ScriptedOperation::new("B", &log).prepare_votes_no().shared(),
        ];
        let options =
            fast_retry(TransactionOptions::two_phase()).with_timeout(Duration::from_millis(100));
        let (orchestrator, _) = orchestrator(options);

        let report = orchestrator.run(ops).await.unwrap();

        assert!(matches!(
            report.failure_reason(),
            Some(FailureReason::PrepareFailure { index: 1, .. })
        ));
        assert_eq!(report.outcome.phase(), TransactionPhase::RolledBack);
        assert_eq!(log.count("A", StepPhase::Compensate), 1);
        assert_eq!(log.count("B", StepPhase::Compensate), 1);
        assert_eq!(orchestrator.stats().timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_prepare_compensates_everything() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log).shared(),
            ScriptedOperation::new("B", &log)
                .prepare_delay(Duration::from_millis(500))
                .shared(),
            ScriptedOperation::new("C", &log).shared(),
        ];
        let options =
            fast_retry(TransactionOptions::two_phase()).with_timeout(Duration::from_millis(100));
        let (orchestrator, journal) = orchestrator(options);

        let report = orchestrator.run(ops).await.unwrap();

        assert!(matches!(
            report.failure_reason(),
            Some(FailureReason::TimeoutFailure { timeout_millis: 100 })
        ));
        assert_eq!(log.ids_for(StepPhase::Prepare), ["A", "B"]);
        assert_eq!(log.ids_for(StepPhase::Compensate).len(), 3);
        assert_eq!(
            transitions_after_timeout(&journal, report.transaction_id),
            [
                (TransactionPhase::Preparing, TransactionPhase::CommitFailed),
                (TransactionPhase::CommitFailed, TransactionPhase::RollingBack),
                (TransactionPhase::RollingBack, TransactionPhase::RolledBack),
            ]
        );

        // the detached executor finishes preparing and commits every operation
        assert_eq!(orchestrator.drain_detached().await, 1);
        assert_eq!(log.ids_for(StepPhase::Prepare), ["A", "B", "C"]);
        assert_eq!(log.ids_for(StepPhase::Commit).len(), 3);
        for id in ["A", "B", "C"] {
            assert_eq!(log.count(id, StepPhase::Compensate), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_on_timeout_stops_further_steps() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log)
                .commit_delay(Duration::from_millis(500))
                .shared(),
            ScriptedOperation::new("B", &log).shared(),
        ];
        let options = fast_retry(TransactionOptions::saga())
            .with_timeout(Duration::from_millis(100))
            .with_abort_on_timeout(true);
        let (orchestrator, _) = orchestrator(options);

        let report = orchestrator.run(ops).await.unwrap();
        assert!(!report.success());
        orchestrator.drain_detached().await;

        assert_eq!(log.ids_for(StepPhase::Forward), ["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_saga_keeps_forwarding_by_default() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("A", &log)
                .commit_delay(Duration::from_millis(500))
                .shared(),
            ScriptedOperation::new("B", &log).shared(),
        ];
        let options =
            fast_retry(TransactionOptions::saga()).with_timeout(Duration::from_millis(100));
        let (orchestrator, _) = orchestrator(options);

        let report = orchestrator.run(ops).await.unwrap();
        assert!(!report.success());
        orchestrator.drain_detached().await;

        assert_eq!(log.ids_for(StepPhase::Forward), ["A", "B"]);
        // the guard already compensated both; nothing ran twice
        assert_eq!(log.count("A", StepPhase::Compensate), 1);
        assert_eq!(log.count("B", StepPhase::Compensate), 1);
    }

    #[tokio::test]
    async fn runs_are_isolated() {
        let log = CallLog::new();
        let (orchestrator, _) = orchestrator(fast_retry(TransactionOptions::two_phase()));
        let make = || {
            vec![
                ScriptedOperation::new("A", &log).shared(),
                ScriptedOperation::new("B", &log).commit_returns_false().shared(),
            ]
        };

        let (first, second) = tokio::join!(orchestrator.run(make()), orchestrator.run(make()));

        assert_ne!(first.unwrap().transaction_id, second.unwrap().transaction_id);
        // same IDs in two transactions are compensated independently
        assert_eq!(log.count("A", StepPhase::Compensate), 2);
        assert_eq!(orchestrator.stats().transactions_failed, 2);
    }
}
