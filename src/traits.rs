//! Core traits for transaction operations

use crate::{CompensationError, OperationId, StepContext, StepError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A unit of work driven by the coordinator.
///
/// The same contract serves both execution modes: in two-phase mode the
/// coordinator calls `prepare` then `commit`, in saga mode `commit` is the
/// forward action. `compensate` undoes the effect in either mode and must be
/// safe to call for an operation whose commit never ran.
///
/// # Example
///
/// ```rust,ignore
/// #[async_trait]
/// impl Operation for ReserveStock {
///     fn id(&self) -> &OperationId { &self.id }
///
///     async fn prepare(&self, _ctx: &StepContext, payload: &[u8]) -> Result<bool, StepError> {
///         Ok(self.inventory.available(payload).await)
///     }
///
///     async fn commit(&self, ctx: &StepContext, payload: &[u8]) -> Result<bool, StepError> {
///         self.inventory.reserve(ctx.idempotency_key(), payload).await
///     }
///
///     async fn compensate(
///         &self,
///         ctx: &StepContext,
///         _payload: &[u8],
///     ) -> Result<(), CompensationError> {
///         self.inventory.release(ctx.idempotency_key()).await
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Stable identifier, unique within a transaction
    fn id(&self) -> &OperationId;

    /// Opaque payload passed to every phase call
    fn payload(&self) -> &[u8] {
        &[]
    }

    /// Which phase calls this operation implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Vote on whether the operation can commit.
    ///
    /// Returning `Ok(false)` or an error aborts the transaction.
    async fn prepare(&self, _context: &StepContext, _payload: &[u8]) -> Result<bool, StepError> {
        Ok(true)
    }

    /// Apply the effect.
    ///
    /// Returning `Ok(false)` or an error fails the transaction.
    async fn commit(&self, context: &StepContext, payload: &[u8]) -> Result<bool, StepError>;

    /// Undo the effect
    async fn compensate(
        &self,
        context: &StepContext,
        payload: &[u8],
    ) -> Result<(), CompensationError>;
}

/// Capabilities an operation declares.
///
/// Validated once when the transaction is built; an operation lacking
/// `commit` or `compensate` is rejected before any phase runs. Operations
/// without `prepare` are treated as always prepared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Implements `prepare`
    pub prepare: bool,
    /// Implements `commit`
    pub commit: bool,
    /// Implements `compensate`
    pub compensate: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            prepare: true,
            commit: true,
            compensate: true,
        }
    }
}

impl Capabilities {
    /// Describe the first missing required capability
    pub fn missing_required(&self) -> Option<&'static str> {
        if !self.commit {
            Some("commit")
        } else if !self.compensate {
            Some("compensate")
        } else {
            None
        }
    }
}

/// Retry policy for compensation attempts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds)
    pub initial_delay_millis: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_millis: u64,
    /// Backoff multiplier; `1.0` keeps the delay fixed
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_millis: 1000,
            max_delay_millis: 30000,
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy
    pub fn fixed(max_attempts: u32, delay: std::time::Duration) -> Self {
        let delay_millis = delay.as_millis() as u64;
        Self {
            max_attempts,
            initial_delay_millis: delay_millis,
            max_delay_millis: delay_millis,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate the delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        if attempt == 0 {
            return std::time::Duration::from_millis(0);
        }

        let delay = self.initial_delay_millis as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = delay.min(self.max_delay_millis.max(self.initial_delay_millis) as f64);
        std::time::Duration::from_millis(capped as u64)
    }
}
