//! Closure-backed operations

use crate::{Capabilities, CompensationError, Operation, OperationId, StepContext, StepError};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

type PhaseFn =
    Arc<dyn Fn(StepContext, Vec<u8>) -> BoxFuture<'static, Result<bool, StepError>> + Send + Sync>;
type CompensateFn = Arc<
    dyn Fn(StepContext, Vec<u8>) -> BoxFuture<'static, Result<(), CompensationError>>
        + Send
        + Sync,
>;

/// Operation assembled from async closures.
///
/// Capabilities follow the closures supplied: an `FnOperation` built without
/// `on_commit` or `on_compensate` is rejected when the transaction is built.
///
/// ```rust,ignore
/// let debit = FnOperation::new("debit")
///     .with_payload(b"acct-1:100".to_vec())
///     .on_commit(|_ctx, payload| async move { ledger::debit(&payload).await })
///     .on_compensate(|_ctx, payload| async move { ledger::credit(&payload).await });
/// ```
#[derive(Clone)]
pub struct FnOperation {
    id: OperationId,
    payload: Vec<u8>,
    prepare: Option<PhaseFn>,
    commit: Option<PhaseFn>,
    compensate: Option<CompensateFn>,
}

impl FnOperation {
    /// Create an operation with no phase closures
    pub fn new(id: impl Into<OperationId>) -> Self {
        Self {
            id: id.into(),
            payload: Vec::new(),
            prepare: None,
            commit: None,
            compensate: None,
        }
    }

    /// Set the payload passed to every phase call
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the prepare vote
    pub fn on_prepare<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
    {
        self.prepare = Some(Arc::new(move |ctx: StepContext, payload: Vec<u8>| {
            f(ctx, payload).boxed()
        }));
        self
    }

    /// Set the commit (or saga forward) action
    pub fn on_commit<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
    {
        self.commit = Some(Arc::new(move |ctx: StepContext, payload: Vec<u8>| {
            f(ctx, payload).boxed()
        }));
        self
    }

    /// Set the compensation
    pub fn on_compensate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CompensationError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |ctx: StepContext, payload: Vec<u8>| {
            f(ctx, payload).boxed()
        }));
        self
    }

    /// Wrap into a shared trait object
    pub fn into_shared(self) -> Arc<dyn Operation> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for FnOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperation")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[async_trait]
impl Operation for FnOperation {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            prepare: self.prepare.is_some(),
            commit: self.commit.is_some(),
            compensate: self.compensate.is_some(),
        }
    }

    async fn prepare(&self, context: &StepContext, payload: &[u8]) -> Result<bool, StepError> {
        match &self.prepare {
            Some(f) => f(context.clone(), payload.to_vec()).await,
            None => Ok(true),
        }
    }

    async fn commit(&self, context: &StepContext, payload: &[u8]) -> Result<bool, StepError> {
        match &self.commit {
            Some(f) => f(context.clone(), payload.to_vec()).await,
            None => Err(StepError::failed("operation has no commit action")),
        }
    }

    async fn compensate(
        &self,
        context: &StepContext,
        payload: &[u8],
    ) -> Result<(), CompensationError> {
        match &self.compensate {
            Some(f) => f(context.clone(), payload.to_vec()).await,
            None => Err(CompensationError::terminal("operation has no compensation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StepPhase, TransactionId};

    fn ctx(phase: StepPhase) -> StepContext {
        StepContext::new(TransactionId::new(1), "op".into(), 0, phase, 0)
    }

    #[test]
    fn capabilities_follow_closures() {
        let op = FnOperation::new("op").on_commit(|_, _| async { Ok(true) });
        let caps = op.capabilities();

        assert!(!caps.prepare);
        assert!(caps.commit);
        assert_eq!(caps.missing_required(), Some("compensate"));
    }

    #[tokio::test]
    async fn closures_receive_payload() {
        let op = FnOperation::new("op")
            .with_payload(b"42".to_vec())
            .on_commit(|_, payload| async move { Ok(payload == b"42") })
            .on_compensate(|_, _| async { Ok(()) });

        assert_eq!(op.commit(&ctx(StepPhase::Commit), op.payload()).await, Ok(true));
        assert_eq!(op.prepare(&ctx(StepPhase::Prepare), op.payload()).await, Ok(true));
        assert!(op.compensate(&ctx(StepPhase::Compensate), op.payload()).await.is_ok());
    }
}
