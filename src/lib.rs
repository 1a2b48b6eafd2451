//! In-process distributed transaction orchestrator
//!
//! Runs an ordered set of [`Operation`]s as one atomic unit, either with
//! two-phase commit (prepare every operation, then commit all of them) or as
//! a saga (forward each step in order, compensating completed steps in
//! reverse on failure). Rollback is idempotent per operation within a
//! transaction, retried within a bounded budget, and every run is raced
//! against a deadline.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use icanact_txn_coordinator::{FnOperation, TransactionOptions, TransactionOrchestrator};
//!
//! let reserve = FnOperation::new("reserve-stock")
//!     .on_prepare(|_ctx, _payload| async { Ok(true) })
//!     .on_commit(|_ctx, _payload| async { Ok(true) })
//!     .on_compensate(|_ctx, _payload| async { Ok(()) })
//!     .into_shared();
//!
//! let orchestrator = TransactionOrchestrator::new(TransactionOptions::two_phase());
//! let report = orchestrator.run(vec![reserve]).await?;
//! assert!(report.success());
//! ```

// === Core Types ===
mod context;
mod errors;
mod events;
mod idempotency;
mod options;
mod state;

// === Traits ===
mod step;
mod traits;

// === Execution ===
mod orchestrator;
mod outcome;
mod saga;
mod timeout;
mod transaction;
mod two_phase;

// === Rollback ===
mod dedupe;
mod rollback;

// === Storage ===
mod journal;

// === Observability ===
mod observer;
mod stats;

#[cfg(any(test, feature = "test-harness"))]
pub mod testing;

// === Re-exports ===

// Types
pub use context::{OperationId, StepContext, StepPhase, TransactionId};
pub use idempotency::IdempotencyKey;
pub use options::{ExecutionMode, TransactionOptions, DEFAULT_TIMEOUT_MILLIS};
pub use state::TransactionPhase;

// Events
pub use events::TransactionEvent;

// Errors
pub use errors::{
    CompensationError, FailureReason, RollbackAttempt, RollbackFailure, StepError,
    TransactionError,
};

// Traits
pub use step::FnOperation;
pub use traits::{Capabilities, Operation, RetryPolicy};

// Execution
pub use orchestrator::{run, TransactionOrchestrator};
pub use outcome::{RollbackOutcome, TransactionOutcome, TransactionReport};
pub use timeout::DetachedExecutors;
pub use transaction::{validate_operations, OperationSet, Transaction};

// Rollback
pub use dedupe::{RollbackRecord, RollbackStatus, RollbackTable};
pub use rollback::{RollbackCoordinator, RollbackHandle};

// Storage
pub use journal::{InMemoryJournal, JournalEntry, JournalError, NoOpJournal, TransactionJournal};

// Observability
pub use observer::{NoOpObserver, TracingObserver, TransactionObserver};
pub use stats::{OrchestratorStats, OrchestratorStatsSnapshot};
