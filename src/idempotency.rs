//! Idempotency key generation for phase calls

use crate::{OperationId, StepContext, StepPhase, TransactionId};
use serde::{Deserialize, Serialize};

/// Idempotency key for deduplicating side effects inside operations
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub Box<str>);

impl IdempotencyKey {
    /// Create an idempotency key for a forward-direction call (prepare, commit, forward)
    pub fn for_step(txn_id: TransactionId, operation_id: &OperationId, phase: StepPhase) -> Self {
        Self(format!("txn:{}:{}:{}", txn_id.0, phase, operation_id).into_boxed_str())
    }

    /// Create an idempotency key for compensation.
    ///
    /// Stable across retry attempts so an operation can recognise a repeated
    /// compensation of the same effect.
    pub fn for_compensation(txn_id: TransactionId, operation_id: &OperationId) -> Self {
        Self(format!("txn:{}:compensate:{}", txn_id.0, operation_id).into_boxed_str())
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl StepContext {
    /// Idempotency key for this call
    pub fn idempotency_key(&self) -> IdempotencyKey {
        match self.phase {
            StepPhase::Compensate => {
                IdempotencyKey::for_compensation(self.txn_id, &self.operation_id)
            }
            phase => IdempotencyKey::for_step(self.txn_id, &self.operation_id, phase),
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
