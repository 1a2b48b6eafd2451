//! Transaction options

use crate::{RetryPolicy, TransactionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default global deadline for a transaction
pub const DEFAULT_TIMEOUT_MILLIS: u64 = 30_000;

/// Which protocol drives the operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Sequential prepare, parallel commit, full-set rollback on failure
    #[default]
    #[serde(rename = "2pc")]
    TwoPhase,
    /// Sequential forward steps, reverse compensation of the succeeded prefix
    #[serde(rename = "saga")]
    Saga,
}

impl ExecutionMode {
    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoPhase => "2pc",
            Self::Saga => "saga",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Global deadline for the executor (milliseconds)
    pub timeout_millis: u64,
    /// Retry policy for compensation attempts
    pub rollback_retry: RetryPolicy,
    /// Execution protocol
    pub mode: ExecutionMode,
    /// After a timeout, stop the detached executor from issuing further
    /// phase calls. In-flight calls are never interrupted.
    pub abort_on_timeout: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout_millis: DEFAULT_TIMEOUT_MILLIS,
            rollback_retry: RetryPolicy::default(),
            mode: ExecutionMode::default(),
            abort_on_timeout: false,
        }
    }
}

impl TransactionOptions {
    /// Options for a two-phase commit run
    pub fn two_phase() -> Self {
        Self::default()
    }

    /// Options for a saga run
    pub fn saga() -> Self {
        Self {
            mode: ExecutionMode::Saga,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_millis = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_rollback_attempts(mut self, max_attempts: u32) -> Self {
        self.rollback_retry.max_attempts = max_attempts;
        self
    }

    pub fn with_rollback_retry_delay(mut self, delay: Duration) -> Self {
        let millis = delay.as_millis() as u64;
        self.rollback_retry.initial_delay_millis = millis;
        self.rollback_retry.max_delay_millis = self.rollback_retry.max_delay_millis.max(millis);
        self
    }

    pub fn with_rollback_retry(mut self, policy: RetryPolicy) -> Self {
        self.rollback_retry = policy;
        self
    }

    pub fn with_abort_on_timeout(mut self, abort: bool) -> Self {
        self.abort_on_timeout = abort;
        self
    }

    /// Global deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    /// Reject options no run could honour
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.timeout_millis == 0 {
            return Err(TransactionError::InvalidInput(
                "timeout_millis must be greater than zero".into(),
            ));
        }
        if self.rollback_retry.max_attempts == 0 {
            return Err(TransactionError::InvalidInput(
                "rollback_retry.max_attempts must be at least 1".into(),
            ));
        }
        let multiplier = self.rollback_retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(TransactionError::InvalidInput(
                format!(
                    "rollback_retry.backoff_multiplier must be finite and >= 1.0, got {multiplier}"
                )
                    .into(),
            ));
        }
        Ok(())
    }
}
