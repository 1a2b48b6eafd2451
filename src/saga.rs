//! Forward/compensate executor
//!
//! Steps run one at a time in input order. When step `k` fails only steps
//! `0..k` that actually succeeded are compensated, started in reverse order.

use crate::transaction::ExecutionEnv;
use crate::{
    FailureReason, OrchestratorStats, StepPhase, Transaction, TransactionEvent, TransactionOutcome,
    TransactionPhase,
};

pub(crate) async fn execute(mut txn: Transaction, env: ExecutionEnv) -> TransactionOutcome {
    txn.advance(TransactionPhase::Forwarding, &env);
    let operations = txn.operations().clone();

    for (index, operation) in operations.iter().enumerate() {
        if env.abort_requested() {
            return txn.abandon(&env);
        }

        let operation_id = operation.id().clone();
        let context = txn.step_context(index, StepPhase::Forward);
        let cause: Box<str> = match operation.commit(&context, operation.payload()).await {
            Ok(true) => {
                txn.mark_succeeded(index);
                env.record(TransactionEvent::StepCommitted { operation_id, index });
                continue;
            }
            Ok(false) => "forward step returned false".into(),
            Err(err) => err.to_string().into(),
        };

        txn.step_failed(index, &cause, &env);
        OrchestratorStats::incr(&env.stats.commit_failures);
        txn.advance(TransactionPhase::CommitFailed, &env);

        let compensate: Vec<usize> = txn.succeeded().iter().rev().copied().collect();
        let reason = FailureReason::CommitFailure {
            index,
            failed: vec![operation_id],
            cause,
        };
        return txn.roll_back(compensate, reason, &env).await;
    }

    txn.advance(TransactionPhase::Committed, &env);
    TransactionOutcome::Committed
}
