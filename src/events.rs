//! Transaction journal events

use crate::{ExecutionMode, OperationId, TransactionPhase};
use serde::{Deserialize, Serialize};

/// Events recorded in the transaction journal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TransactionEvent {
    // Lifecycle
    TransactionStarted { mode: ExecutionMode, operation_count: usize, timeout_millis: u64 },
    PhaseChanged { from: TransactionPhase, to: TransactionPhase },
    TransactionFinished { success: bool, phase: TransactionPhase },
    TimedOut { timeout_millis: u64 },

    // Steps
    StepPrepared { operation_id: OperationId, index: usize },
    StepCommitted { operation_id: OperationId, index: usize },
    StepFailed { operation_id: OperationId, index: usize, error: Box<str> },

    // Rollback
    RollbackStarted { operation_id: OperationId },
    RollbackCoalesced { operation_id: OperationId },
    RollbackAttemptFailed {
        operation_id: OperationId,
        attempt: u32,
        error: Box<str>,
        will_retry: bool,
    },
    RollbackCompleted { operation_id: OperationId, attempts: u32 },
    RollbackExhausted { operation_id: OperationId, attempts: u32, error: Box<str> },
}

impl TransactionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TransactionStarted { .. } => "transaction_started",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::TransactionFinished { .. } => "transaction_finished",
            Self::TimedOut { .. } => "timed_out",
            Self::StepPrepared { .. } => "step_prepared",
            Self::StepCommitted { .. } => "step_committed",
            Self::StepFailed { .. } => "step_failed",
            Self::RollbackStarted { .. } => "rollback_started",
            Self::RollbackCoalesced { .. } => "rollback_coalesced",
            Self::RollbackAttemptFailed { .. } => "rollback_attempt_failed",
            Self::RollbackCompleted { .. } => "rollback_completed",
            Self::RollbackExhausted { .. } => "rollback_exhausted",
        }
    }

    /// Operation the event concerns, if any
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            Self::StepPrepared { operation_id, .. }
            | Self::StepCommitted { operation_id, .. }
            | Self::StepFailed { operation_id, .. }
            | Self::RollbackStarted { operation_id }
            | Self::RollbackCoalesced { operation_id }
            | Self::RollbackAttemptFailed { operation_id, .. }
            | Self::RollbackCompleted { operation_id, .. }
            | Self::RollbackExhausted { operation_id, .. } => Some(operation_id),
            _ => None,
        }
    }
}
