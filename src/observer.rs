//! Transaction observer trait

use super::{
    ExecutionMode, FailureReason, OperationId, RollbackFailure, TransactionId, TransactionPhase,
};

/// Observer trait for external observability
pub trait TransactionObserver: Send + Sync + 'static {
    fn on_transaction_started(&self, txn_id: TransactionId, mode: ExecutionMode, operations: usize);
    fn on_phase_changed(&self, txn_id: TransactionId, from: TransactionPhase, to: TransactionPhase);
    fn on_step_failed(&self, txn_id: TransactionId, operation_id: &OperationId, error: &str);
    fn on_rollback_started(&self, txn_id: TransactionId, operation_id: &OperationId);
    fn on_rollback_completed(
        &self,
        txn_id: TransactionId,
        operation_id: &OperationId,
        attempts: u32,
    );
    fn on_rollback_failed(&self, txn_id: TransactionId, failure: &RollbackFailure);
    fn on_timed_out(&self, txn_id: TransactionId, timeout_millis: u64);
    fn on_transaction_committed(&self, txn_id: TransactionId, duration_millis: u64);
    fn on_transaction_failed(&self, txn_id: TransactionId, reason: &FailureReason);
}

/// No-op observer
pub struct NoOpObserver;

impl TransactionObserver for NoOpObserver {
    fn on_transaction_started(
        &self,
        _txn_id: TransactionId,
        _mode: ExecutionMode,
        _operations: usize,
    ) {
    }
    fn on_phase_changed(
        &self,
        _txn_id: TransactionId,
        _from: TransactionPhase,
        _to: TransactionPhase,
    ) {
    }
    fn on_step_failed(&self, _txn_id: TransactionId, _operation_id: &OperationId, _error: &str) {}
    fn on_rollback_started(&self, _txn_id: TransactionId, _operation_id: &OperationId) {}
    fn on_rollback_completed(
        &self,
        _txn_id: TransactionId,
        _operation_id: &OperationId,
        _attempts: u32,
    ) {
    }
    fn on_rollback_failed(&self, _txn_id: TransactionId, _failure: &RollbackFailure) {}
    fn on_timed_out(&self, _txn_id: TransactionId, _timeout_millis: u64) {}
    fn on_transaction_committed(&self, _txn_id: TransactionId, _duration_millis: u64) {}
    fn on_transaction_failed(&self, _txn_id: TransactionId, _reason: &FailureReason) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl TransactionObserver for TracingObserver {
    fn on_transaction_started(
        &self,
        txn_id: TransactionId,
        mode: ExecutionMode,
        operations: usize,
    ) {
        tracing::info!(txn_id = %txn_id, mode = %mode, operations, "Transaction started");
    }

    fn on_phase_changed(
        &self,
        txn_id: TransactionId,
        from: TransactionPhase,
        to: TransactionPhase,
    ) {
        tracing::debug!(txn_id = %txn_id, from = %from, to = %to, "Phase changed");
    }

    fn on_step_failed(&self, txn_id: TransactionId, operation_id: &OperationId, error: &str) {
        tracing::warn!(
            txn_id = %txn_id,
            operation_id = %operation_id,
            error = %error,
            "Step failed"
        );
    }

    fn on_rollback_started(&self, txn_id: TransactionId, operation_id: &OperationId) {
        tracing::info!(txn_id = %txn_id, operation_id = %operation_id, "Rollback started");
    }

    fn on_rollback_completed(
        &self,
        txn_id: TransactionId,
        operation_id: &OperationId,
        attempts: u32,
    ) {
        tracing::info!(
            txn_id = %txn_id,
            operation_id = %operation_id,
            attempts,
            "Rollback completed"
        );
    }

    fn on_rollback_failed(&self, txn_id: TransactionId, failure: &RollbackFailure) {
        tracing::error!(
            txn_id = %txn_id,
            operation_id = %failure.operation_id,
            attempts = failure.attempts,
            error = %failure.last_error,
            "Rollback failed"
        );
    }

    fn on_timed_out(&self, txn_id: TransactionId, timeout_millis: u64) {
        tracing::warn!(txn_id = %txn_id, timeout_ms = timeout_millis, "Transaction timed out");
    }

    fn on_transaction_committed(&self, txn_id: TransactionId, duration_millis: u64) {
        tracing::info!(txn_id = %txn_id, duration_ms = duration_millis, "Transaction committed");
    }

    fn on_transaction_failed(&self, txn_id: TransactionId, reason: &FailureReason) {
        tracing::error!(txn_id = %txn_id, reason = %reason, "Transaction failed");
    }
}
