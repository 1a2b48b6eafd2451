//! Error types for phase calls, compensation and transactions

use crate::OperationId;
use serde::{Deserialize, Serialize};

/// Error from a prepare, commit or forward call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StepError {
    /// The call raised an error while performing its work
    #[error("step failed: {reason}")]
    Failed {
        /// Error description
        reason: Box<str>,
    },
    /// The operation refused the call (e.g. a negative prepare vote)
    #[error("step rejected: {reason}")]
    Rejected {
        /// Error description
        reason: Box<str>,
    },
}

impl StepError {
    /// Build a `Failed` error
    pub fn failed(reason: impl Into<Box<str>>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Build a `Rejected` error
    pub fn rejected(reason: impl Into<Box<str>>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Check if the operation declined rather than failed
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// The error description
    pub fn reason(&self) -> &str {
        match self {
            Self::Failed { reason } | Self::Rejected { reason } => reason,
        }
    }
}

/// Error from compensation execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CompensationError {
    /// Safe to retry - no side effects were applied
    #[error("compensation failed (safe to retry): {reason}")]
    SafeToRetry {
        /// Error description
        reason: Box<str>,
    },
    /// Ambiguous state - compensation may or may not have applied
    #[error("compensation outcome ambiguous: {reason}")]
    Ambiguous {
        /// Error description
        reason: Box<str>,
    },
    /// Terminal failure - cannot compensate
    #[error("compensation failed terminally: {reason}")]
    Terminal {
        /// Error description
        reason: Box<str>,
    },
}

impl CompensationError {
    /// Build a `SafeToRetry` error
    pub fn retry(reason: impl Into<Box<str>>) -> Self {
        Self::SafeToRetry {
            reason: reason.into(),
        }
    }

    /// Build a `Terminal` error
    pub fn terminal(reason: impl Into<Box<str>>) -> Self {
        Self::Terminal {
            reason: reason.into(),
        }
    }

    /// Check if safe to retry
    pub fn is_safe_to_retry(&self) -> bool {
        matches!(self, Self::SafeToRetry { .. })
    }

    /// Check if state is ambiguous
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// The error description
    pub fn reason(&self) -> &str {
        match self {
            Self::SafeToRetry { reason }
            | Self::Ambiguous { reason }
            | Self::Terminal { reason } => reason,
        }
    }
}

/// Result of a single compensation attempt, driving the retry loop.
///
/// Ambiguous failures are retried: compensations must tolerate being applied
/// to an operation whose effect is already undone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackAttempt {
    /// The compensation applied
    Done,
    /// The attempt failed and may be retried
    Retryable(Box<str>),
    /// The attempt failed and must not be retried
    Fatal(Box<str>),
}

impl From<Result<(), CompensationError>> for RollbackAttempt {
    fn from(result: Result<(), CompensationError>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(CompensationError::Terminal { reason }) => Self::Fatal(reason),
            Err(err) => Self::Retryable(err.to_string().into_boxed_str()),
        }
    }
}

/// An operation whose compensation could not be completed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("rollback of operation {operation_id} failed after {attempts} attempt(s): {last_error}")]
pub struct RollbackFailure {
    /// Operation that could not be compensated
    pub operation_id: OperationId,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Error reported by the last attempt
    pub last_error: Box<str>,
}

/// Why a transaction did not commit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FailureReason {
    /// A prepare vote was negative or errored
    #[error("prepare failed for operation {operation_id} at index {index}: {cause}")]
    PrepareFailure {
        /// Position of the failing operation
        index: usize,
        /// Failing operation
        operation_id: OperationId,
        /// Failure description
        cause: Box<str>,
    },
    /// One or more commits (or a saga forward step) failed
    #[error("commit failed for {failed:?} (first at index {index}): {cause}")]
    CommitFailure {
        /// Index of the first failing operation
        index: usize,
        /// Every failed operation, in input order
        failed: Vec<OperationId>,
        /// Failure description of the first failing operation
        cause: Box<str>,
    },
    /// The deadline expired before the executor finished
    #[error("transaction timed out after {timeout_millis}ms")]
    TimeoutFailure {
        /// Configured deadline
        timeout_millis: u64,
    },
    /// The executor stopped without producing an outcome (it panicked)
    #[error("executor aborted: {cause}")]
    ExecutorAborted {
        /// Failure description
        cause: Box<str>,
    },
}

impl FailureReason {
    /// Operation identified as the cause of the failure, if any
    pub fn failed_operation_id(&self) -> Option<&OperationId> {
        match self {
            Self::PrepareFailure { operation_id, .. } => Some(operation_id),
            Self::CommitFailure { failed, .. } => failed.first(),
            Self::TimeoutFailure { .. } | Self::ExecutorAborted { .. } => None,
        }
    }
}

/// Errors surfaced to callers of the orchestrator
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// An operation is malformed; raised before any phase starts
    #[error("invalid operation at index {index}: {reason}")]
    InvalidOperationSpec {
        /// Position of the malformed operation
        index: usize,
        /// What is wrong with it
        reason: Box<str>,
    },
    /// The call arguments or options are malformed
    #[error("invalid input: {0}")]
    InvalidInput(Box<str>),
    /// Prepare failed; the operation set was rolled back
    #[error("{0}")]
    PrepareFailure(FailureReason),
    /// Commit failed; the operation set was rolled back
    #[error("{0}")]
    CommitFailure(FailureReason),
    /// A single compensation attempt failed; retried within the budget
    #[error("rollback attempt {attempt} for operation {operation_id} failed: {cause}")]
    RollbackFailure {
        /// Operation being compensated
        operation_id: OperationId,
        /// Attempt number
        attempt: u32,
        /// Error reported by the attempt
        cause: Box<str>,
    },
    /// The retry budget was exhausted for at least one compensation
    #[error("{cause}; rollback failed: {}", join_failures(.failures))]
    RollbackFailed {
        /// Original failure that triggered the rollback
        cause: FailureReason,
        /// Every compensation that could not be completed
        failures: Vec<RollbackFailure>,
    },
    /// The deadline expired; the operation set was rolled back
    #[error("{0}")]
    TimeoutFailure(FailureReason),
}

impl From<FailureReason> for TransactionError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::PrepareFailure { .. } => Self::PrepareFailure(reason),
            FailureReason::CommitFailure { .. } | FailureReason::ExecutorAborted { .. } => {
                Self::CommitFailure(reason)
            }
            FailureReason::TimeoutFailure { .. } => Self::TimeoutFailure(reason),
        }
    }
}

fn join_failures(failures: &[RollbackFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
