//! Transaction outcomes and reports

use crate::{
    FailureReason, OperationId, RollbackFailure, RollbackRecord, TransactionError, TransactionId,
    TransactionPhase,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What happened to the compensations that accompanied a failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackOutcome {
    /// No rollback was requested
    NotAttempted,
    /// Every requested compensation applied (possibly none)
    RolledBack {
        /// Compensated operations, in request order
        operations: Vec<OperationId>,
    },
    /// At least one compensation exhausted its retry budget
    RollbackFailed {
        /// Operations that were compensated
        rolled_back: Vec<OperationId>,
        /// Operations that could not be compensated
        failures: Vec<RollbackFailure>,
    },
}

impl RollbackOutcome {
    /// Reduce per-operation results, kept in request order
    pub fn from_results(results: Vec<(OperationId, Result<u32, RollbackFailure>)>) -> Self {
        let mut rolled_back = Vec::new();
        let mut failures = Vec::new();
        for (operation_id, result) in results {
            match result {
                Ok(_) => rolled_back.push(operation_id),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Self::RolledBack {
                operations: rolled_back,
            }
        } else {
            Self::RollbackFailed {
                rolled_back,
                failures,
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Short status name
    pub fn status(&self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::RolledBack { .. } => "rolled_back",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }

    /// Terminal phase this rollback leaves the transaction in
    pub fn terminal_phase(&self) -> TransactionPhase {
        match self {
            Self::RollbackFailed { .. } => TransactionPhase::RollbackFailed,
            Self::NotAttempted | Self::RolledBack { .. } => TransactionPhase::RolledBack,
        }
    }
}

/// Aggregated result of one transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutcome {
    Committed,
    Failed {
        reason: FailureReason,
        rollback: RollbackOutcome,
    },
}

impl TransactionOutcome {
    pub fn failed(reason: FailureReason, rollback: RollbackOutcome) -> Self {
        Self::Failed { reason, rollback }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Terminal phase of the transaction
    pub fn phase(&self) -> TransactionPhase {
        match self {
            Self::Committed => TransactionPhase::Committed,
            Self::Failed { rollback, .. } => rollback.terminal_phase(),
        }
    }

    /// Convert into the error taxonomy
    pub fn into_result(self) -> Result<(), TransactionError> {
        match self {
            Self::Committed => Ok(()),
            Self::Failed {
                reason,
                rollback: RollbackOutcome::RollbackFailed { failures, .. },
            } => Err(TransactionError::RollbackFailed {
                cause: reason,
                failures,
            }),
            Self::Failed { reason, .. } => Err(reason.into()),
        }
    }
}

/// Report returned by a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReport {
    pub transaction_id: TransactionId,
    pub outcome: TransactionOutcome,
    /// Rollback record of every operation a rollback was requested for
    pub rollback_records: BTreeMap<OperationId, RollbackRecord>,
    pub elapsed_millis: u64,
}

impl TransactionReport {
    pub fn success(&self) -> bool {
        self.outcome.is_committed()
    }

    pub fn failed_operation_id(&self) -> Option<&OperationId> {
        match &self.outcome {
            TransactionOutcome::Committed => None,
            TransactionOutcome::Failed { reason, .. } => reason.failed_operation_id(),
        }
    }

    pub fn rollback_status(&self) -> &RollbackOutcome {
        const NONE: &RollbackOutcome = &RollbackOutcome::NotAttempted;
        match &self.outcome {
            TransactionOutcome::Committed => NONE,
            TransactionOutcome::Failed { rollback, .. } => rollback,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.outcome {
            TransactionOutcome::Committed => None,
            TransactionOutcome::Failed { reason, .. } => Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), TransactionError> {
        self.outcome.into_result()
    }
}
