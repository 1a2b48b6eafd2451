//! Run-scoped transaction state

use crate::journal::record_event;
use crate::{
    ExecutionMode, FailureReason, Operation, OperationId, OrchestratorStats, RollbackCoordinator,
    RollbackOutcome, StepContext, StepPhase, TransactionError, TransactionEvent, TransactionId,
    TransactionJournal, TransactionObserver, TransactionOutcome, TransactionPhase,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Ordered operation set, validated and shared read-only for one run
pub type OperationSet = Arc<[Arc<dyn Operation>]>;

/// Check the operation contract before any phase call is made.
///
/// Every operation must declare `commit` and `compensate`, and IDs must be
/// non-empty and unique within the set.
pub fn validate_operations(operations: &[Arc<dyn Operation>]) -> Result<(), TransactionError> {
    let mut seen: HashSet<&OperationId> = HashSet::with_capacity(operations.len());

    for (index, operation) in operations.iter().enumerate() {
        let id = operation.id();
        if id.is_empty() {
            return Err(TransactionError::InvalidOperationSpec {
                index,
                reason: "operation id is empty".into(),
            });
        }
        if let Some(missing) = operation.capabilities().missing_required() {
            return Err(TransactionError::InvalidOperationSpec {
                index,
                reason: format!("operation {id} does not implement {missing}").into(),
            });
        }
        if !seen.insert(id) {
            return Err(TransactionError::InvalidOperationSpec {
                index,
                reason: format!("duplicate operation id {id}").into(),
            });
        }
    }

    Ok(())
}

/// The rollback a transaction committed to, and why
#[derive(Clone, Debug)]
pub(crate) struct RollbackClaim {
    pub indices: Vec<usize>,
    pub reason: FailureReason,
}

/// Everything an executor shares with the timeout guard
#[derive(Clone)]
pub(crate) struct ExecutionEnv {
    pub txn_id: TransactionId,
    pub timeout_millis: u64,
    pub rollback: RollbackCoordinator,
    pub journal: Arc<dyn TransactionJournal>,
    pub observer: Arc<dyn TransactionObserver>,
    pub stats: Arc<OrchestratorStats>,
    abort: Arc<AtomicBool>,
    claim: Arc<OnceLock<RollbackClaim>>,
    phase: Arc<Mutex<TransactionPhase>>,
}

impl ExecutionEnv {
    pub fn new(
        txn_id: TransactionId,
        timeout_millis: u64,
        rollback: RollbackCoordinator,
        journal: Arc<dyn TransactionJournal>,
        observer: Arc<dyn TransactionObserver>,
        stats: Arc<OrchestratorStats>,
    ) -> Self {
        Self {
            txn_id,
            timeout_millis,
            rollback,
            journal,
            observer,
            stats,
            abort: Arc::new(AtomicBool::new(false)),
            claim: Arc::new(OnceLock::new()),
            phase: Arc::new(Mutex::new(TransactionPhase::Pending)),
        }
    }

    pub fn record(&self, event: TransactionEvent) {
        record_event(self.journal.as_ref(), self.txn_id, event);
    }

    /// Ask the executor to stop issuing phase calls
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Claim the transaction's rollback. Only the first claim wins; the
    /// executor and the timeout guard both race for it.
    pub fn claim_rollback(&self, indices: Vec<usize>, reason: FailureReason) -> bool {
        self.claim.set(RollbackClaim { indices, reason }).is_ok()
    }

    pub fn rollback_claim(&self) -> Option<&RollbackClaim> {
        self.claim.get()
    }

    /// Last phase journaled for this transaction
    pub fn current_phase(&self) -> TransactionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal a transition and notify the observer
    pub fn phase_changed(&self, from: TransactionPhase, to: TransactionPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = to;
        self.record(TransactionEvent::PhaseChanged { from, to });
        self.observer.on_phase_changed(self.txn_id, from, to);
    }
}

/// A transaction owned by one executor for the duration of a run
pub struct Transaction {
    id: TransactionId,
    mode: ExecutionMode,
    operations: OperationSet,
    phase: TransactionPhase,
    succeeded: Vec<usize>,
    started_at_millis: u64,
}

impl Transaction {
    /// Validate the operations and build a `Pending` transaction
    pub fn new(
        id: TransactionId,
        mode: ExecutionMode,
        operations: Vec<Arc<dyn Operation>>,
    ) -> Result<Self, TransactionError> {
        validate_operations(&operations)?;
        Ok(Self {
            id,
            mode,
            operations: operations.into(),
            phase: TransactionPhase::Pending,
            succeeded: Vec::new(),
            started_at_millis: StepContext::now_millis(),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn operations(&self) -> &OperationSet {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn started_at_millis(&self) -> u64 {
        self.started_at_millis
    }

    /// Indices of operations whose commit or forward step succeeded, in order
    pub fn succeeded(&self) -> &[usize] {
        &self.succeeded
    }

    pub(crate) fn mark_succeeded(&mut self, index: usize) {
        self.succeeded.push(index);
    }

    pub(crate) fn step_context(&self, index: usize, phase: StepPhase) -> StepContext {
        StepContext::new(
            self.id,
            self.operations[index].id().clone(),
            index,
            phase,
            self.started_at_millis,
        )
    }

    /// Move to the next phase, journaling the transition
    pub(crate) fn advance(&mut self, next: TransactionPhase, env: &ExecutionEnv) {
        let from = self.phase;
        if !from.can_transition_to(next) {
            tracing::error!(
                txn_id = %self.id,
                from = %from,
                to = %next,
                "Illegal phase transition"
            );
            debug_assert!(false, "illegal phase transition {from} -> {next}");
        }
        self.phase = next;
        env.phase_changed(from, next);
    }

    /// Record a failed phase call
    pub(crate) fn step_failed(&self, index: usize, cause: &str, env: &ExecutionEnv) {
        let operation_id = self.operations[index].id().clone();
        env.observer.on_step_failed(self.id, &operation_id, cause);
        env.record(TransactionEvent::StepFailed {
            operation_id,
            index,
            error: cause.into(),
        });
    }

    /// Compensate the operations at `indices`, in that order, and build the
    /// failed outcome. Returns only after every compensation has finished.
    ///
    /// Claims the rollback first so a deadline passing mid-rollback waits for
    /// this one instead of compensating the whole set.
    pub(crate) async fn roll_back(
        &mut self,
        indices: Vec<usize>,
        reason: FailureReason,
        env: &ExecutionEnv,
    ) -> TransactionOutcome {
        if !env.claim_rollback(indices.clone(), reason.clone()) {
            tracing::debug!(txn_id = %self.id, "Timeout guard already owns the rollback");
        }
        self.advance(TransactionPhase::RollingBack, env);
        let operations = self.operations.clone();
        let rollback = env
            .rollback
            .rollback_all(indices.iter().map(|&index| (index, &operations[index])))
            .await;
        self.advance(rollback.terminal_phase(), env);
        TransactionOutcome::failed(reason, rollback)
    }

    /// Stop after the timeout guard asked for an abort.
    ///
    /// The guard owns the rollback in that case, so none is attempted here.
    pub(crate) fn abandon(&mut self, env: &ExecutionEnv) -> TransactionOutcome {
        tracing::debug!(
            txn_id = %self.id,
            phase = %self.phase,
            "Executor stopping after timeout"
        );
        self.advance(TransactionPhase::CommitFailed, env);
        TransactionOutcome::failed(
            FailureReason::TimeoutFailure {
                timeout_millis: env.timeout_millis,
            },
            RollbackOutcome::NotAttempted,
        )
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .field("operations", &self.operations.len())
            .field("succeeded", &self.succeeded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallLog, ScriptedOperation};
    use crate::{Capabilities, FnOperation};

    #[test]
    fn rejects_duplicate_ids() {
        let log = CallLog::new();
        let ops = vec![
            ScriptedOperation::new("a", &log).shared(),
            ScriptedOperation::new("b", &log).shared(),
            ScriptedOperation::new("a", &log).shared(),
        ];

        let err = validate_operations(&ops).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidOperationSpec { index: 2, .. }));
    }

    #[test]
    fn rejects_missing_capabilities() {
        let log = CallLog::new();
        let no_compensate = ScriptedOperation::new("a", &log)
            .with_capabilities(Capabilities {
                compensate: false,
                ..Capabilities::default()
            })
            .shared();
        let no_commit = FnOperation::new("b")
            .on_compensate(|_, _| async { Ok(()) })
            .into_shared();

        assert!(matches!(
            validate_operations(&[no_compensate]),
            Err(TransactionError::InvalidOperationSpec { index: 0, .. })
        ));
        let err = validate_operations(&[no_commit]).unwrap_err();
        assert!(err.to_string().contains("commit"));
        assert!(log.is_empty());
    }

    #[test]
    fn rejects_empty_id() {
        let log = CallLog::new();
        let ops = vec![ScriptedOperation::new("", &log).shared()];

        assert!(matches!(
            validate_operations(&ops),
            Err(TransactionError::InvalidOperationSpec { index: 0, .. })
        ));
    }

    #[test]
    fn prepare_is_optional() {
        let op = FnOperation::new("a")
            .on_commit(|_, _| async { Ok(true) })
            .on_compensate(|_, _| async { Ok(()) })
            .into_shared();

        assert!(validate_operations(&[op]).is_ok());
    }
}
