//! Transaction context and identity types

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a transaction execution
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Create a transaction ID from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-unique transaction ID
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of an operation, unique within one transaction.
///
/// Used as the rollback deduplication key. Numeric identifiers are stored in
/// their decimal form so `OperationId::from(7)` and `OperationId::from("7")`
/// name the same operation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Box<str>);

impl OperationId {
    /// Create an operation ID
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the ID carries no characters
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

impl From<u64> for OperationId {
    fn from(value: u64) -> Self {
        Self(value.to_string().into_boxed_str())
    }
}

impl std::fmt::Debug for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Protocol phase a step call belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepPhase {
    /// 2PC prepare vote
    Prepare,
    /// 2PC commit
    Commit,
    /// Saga forward action
    Forward,
    /// Rollback / compensation
    Compensate,
}

impl StepPhase {
    /// Short lowercase name used in logs and keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Commit => "commit",
            Self::Forward => "forward",
            Self::Compensate => "compensate",
        }
    }
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation context passed with every phase call
#[derive(Clone, Serialize, Deserialize)]
pub struct StepContext {
    /// Transaction this call belongs to
    pub txn_id: TransactionId,
    /// Operation being driven
    pub operation_id: OperationId,
    /// Position of the operation in the input sequence
    pub step_index: usize,
    /// Phase of this call
    pub phase: StepPhase,
    /// Attempt number (1 = first attempt)
    pub attempt: u32,
    /// Distributed tracing ID
    pub trace_id: u64,
    /// When the transaction started (millis since UNIX epoch)
    pub txn_started_at_millis: u64,
    /// Timestamp of this call (millis since UNIX epoch)
    pub call_timestamp_millis: u64,
}

impl StepContext {
    /// Create the context for the first attempt of a phase call
    pub fn new(
        txn_id: TransactionId,
        operation_id: OperationId,
        step_index: usize,
        phase: StepPhase,
        txn_started_at_millis: u64,
    ) -> Self {
        Self {
            txn_id,
            operation_id,
            step_index,
            phase,
            attempt: 1,
            trace_id: Self::next_trace_id(),
            txn_started_at_millis,
            call_timestamp_millis: Self::now_millis(),
        }
    }

    /// Get current time in milliseconds since UNIX epoch
    pub fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Create a context for the given retry attempt
    pub fn retry(&self, attempt: u32) -> Self {
        Self {
            attempt,
            trace_id: Self::next_trace_id(),
            call_timestamp_millis: Self::now_millis(),
            ..self.clone()
        }
    }

    /// Calculate elapsed time since the transaction started
    pub fn elapsed_millis(&self) -> u64 {
        self.call_timestamp_millis
            .saturating_sub(self.txn_started_at_millis)
    }

    fn next_trace_id() -> u64 {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("txn_id", &self.txn_id)
            .field("operation_id", &self.operation_id)
            .field("step_index", &self.step_index)
            .field("phase", &self.phase)
            .field("attempt", &self.attempt)
            .finish()
    }
}
