//! Prepare/commit executor
//!
//! Prepare runs sequentially in input order and stops at the first negative
//! vote. Commit fans out to every operation and waits for all of them to
//! settle, so the failure set handed to rollback is complete. Any failure
//! rolls back the whole operation set, including operations that never
//! prepared or committed.

use crate::transaction::ExecutionEnv;
use crate::{
    FailureReason, OperationId, OrchestratorStats, StepPhase, Transaction, TransactionEvent,
    TransactionOutcome, TransactionPhase,
};

pub(crate) async fn execute(mut txn: Transaction, env: ExecutionEnv) -> TransactionOutcome {
    txn.advance(TransactionPhase::Preparing, &env);

    if let Some(outcome) = prepare_pass(&mut txn, &env).await {
        return outcome;
    }
    txn.advance(TransactionPhase::Prepared, &env);

    if env.abort_requested() {
        return txn.abandon(&env);
    }
    commit_pass(&mut txn, &env).await
}

/// Returns the final outcome when prepare did not fully succeed
async fn prepare_pass(txn: &mut Transaction, env: &ExecutionEnv) -> Option<TransactionOutcome> {
    let operations = txn.operations().clone();

    for (index, operation) in operations.iter().enumerate() {
        if env.abort_requested() {
            return Some(txn.abandon(env));
        }

        let operation_id = operation.id().clone();
        if !operation.capabilities().prepare {
            env.record(TransactionEvent::StepPrepared { operation_id, index });
            continue;
        }

        let context = txn.step_context(index, StepPhase::Prepare);
        let cause: Box<str> = match operation.prepare(&context, operation.payload()).await {
            Ok(true) => {
                env.record(TransactionEvent::StepPrepared { operation_id, index });
                continue;
            }
            Ok(false) => "prepare vote was negative".into(),
            Err(err) => err.to_string().into(),
        };

        txn.step_failed(index, &cause, env);
        OrchestratorStats::incr(&env.stats.prepare_failures);
        txn.advance(TransactionPhase::PrepareFailed, env);

        let reason = FailureReason::PrepareFailure {
            index,
            operation_id,
            cause,
        };
        let everything = (0..txn.len()).collect();
        return Some(txn.roll_back(everything, reason, env).await);
    }

    None
}

async fn commit_pass(txn: &mut Transaction, env: &ExecutionEnv) -> TransactionOutcome {
    txn.advance(TransactionPhase::Committing, env);
    let operations = txn.operations().clone();

    let contexts: Vec<_> = (0..operations.len())
        .map(|index| txn.step_context(index, StepPhase::Commit))
        .collect();
    let commits = operations
        .iter()
        .zip(contexts)
        .map(|(operation, context)| async move {
            operation.commit(&context, operation.payload()).await
        });
    let results = futures::future::join_all(commits).await;

    let mut failed: Vec<OperationId> = Vec::new();
    let mut first_failure: Option<(usize, Box<str>)> = None;

    for (index, result) in results.into_iter().enumerate() {
        let operation_id = operations[index].id().clone();
        let cause: Box<str> = match result {
            Ok(true) => {
                txn.mark_succeeded(index);
                env.record(TransactionEvent::StepCommitted { operation_id, index });
                continue;
            }
            Ok(false) => "commit returned false".into(),
            Err(err) => err.to_string().into(),
        };

        txn.step_failed(index, &cause, env);
        failed.push(operation_id);
        first_failure.get_or_insert((index, cause));
    }

    let Some((index, cause)) = first_failure else {
        txn.advance(TransactionPhase::Committed, env);
        return TransactionOutcome::Committed;
    };

    tracing::debug!(
        txn_id = %txn.id(),
        failed = failed.len(),
        committed = txn.succeeded().len(),
        "Commit pass failed"
    );
    OrchestratorStats::incr(&env.stats.commit_failures);
    txn.advance(TransactionPhase::CommitFailed, env);

    let reason = FailureReason::CommitFailure {
        index,
        failed,
        cause,
    };
    let everything = (0..txn.len()).collect();
    txn.roll_back(everything, reason, env).await
}
