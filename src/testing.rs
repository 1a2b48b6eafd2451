//! Test fixtures: tracing setup, a call log and scriptable operations

use crate::{
    Capabilities, CompensationError, Operation, OperationId, StepContext, StepError, StepPhase,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered record of phase calls, shared between operations
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(OperationId, StepPhase)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, operation_id: &OperationId, phase: StepPhase) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((operation_id.clone(), phase));
    }

    pub fn calls(&self) -> Vec<(OperationId, StepPhase)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// IDs that received a call for `phase`, in call order
    pub fn ids_for(&self, phase: StepPhase) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, p)| *p == phase)
            .map(|(id, _)| id.as_str().to_owned())
            .collect()
    }

    pub fn count(&self, operation_id: &str, phase: StepPhase) -> usize {
        self.calls()
            .iter()
            .filter(|(id, p)| id.as_str() == operation_id && *p == phase)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.calls().is_empty()
    }
}

#[derive(Clone, Copy)]
enum Vote {
    Yes,
    No,
    Error,
}

#[derive(Clone, Copy)]
enum CommitBehavior {
    Succeed,
    ReturnFalse,
    Error,
}

#[derive(Clone)]
enum CompensateBehavior {
    Succeed,
    FailTimes(u32),
    AlwaysFail,
    Terminal(Box<str>),
    Panic,
}

/// Operation whose behaviour is configured per phase.
///
/// Every call is recorded in the shared [`CallLog`] before any delay, so the
/// log reflects the order in which calls were issued.
#[derive(Clone)]
pub struct ScriptedOperation {
    id: OperationId,
    log: CallLog,
    payload: Vec<u8>,
    capabilities: Capabilities,
    vote: Vote,
    commit: CommitBehavior,
    compensate: CompensateBehavior,
    prepare_delay: Duration,
    commit_delay: Duration,
    compensate_delay: Duration,
    compensate_calls: Arc<AtomicU32>,
}

impl ScriptedOperation {
    pub fn new(id: impl Into<OperationId>, log: &CallLog) -> Self {
        Self {
            id: id.into(),
            log: log.clone(),
            payload: Vec::new(),
            capabilities: Capabilities::default(),
            vote: Vote::Yes,
            commit: CommitBehavior::Succeed,
            compensate: CompensateBehavior::Succeed,
            prepare_delay: Duration::ZERO,
            commit_delay: Duration::ZERO,
            compensate_delay: Duration::ZERO,
            compensate_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn prepare_votes_no(mut self) -> Self {
        self.vote = Vote::No;
        self
    }

    pub fn prepare_errors(mut self) -> Self {
        self.vote = Vote::Error;
        self
    }

    pub fn prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = delay;
        self
    }

    pub fn commit_returns_false(mut self) -> Self {
        self.commit = CommitBehavior::ReturnFalse;
        self
    }

    pub fn commit_errors(mut self) -> Self {
        self.commit = CommitBehavior::Error;
        self
    }

    pub fn commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    pub fn compensate_fails_times(mut self, times: u32) -> Self {
        self.compensate = CompensateBehavior::FailTimes(times);
        self
    }

    pub fn compensate_always_fails(mut self) -> Self {
        self.compensate = CompensateBehavior::AlwaysFail;
        self
    }

    pub fn compensate_terminal(mut self, reason: &str) -> Self {
        self.compensate = CompensateBehavior::Terminal(reason.into());
        self
    }

    pub fn compensate_panics(mut self) -> Self {
        self.compensate = CompensateBehavior::Panic;
        self
    }

    pub fn compensate_delay(mut self, delay: Duration) -> Self {
        self.compensate_delay = delay;
        self
    }

    pub fn shared(self) -> Arc<dyn Operation> {
        Arc::new(self)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Operation for ScriptedOperation {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn prepare(&self, context: &StepContext, _payload: &[u8]) -> Result<bool, StepError> {
        self.log.push(&self.id, context.phase);
        pause(self.prepare_delay).await;
        match self.vote {
            Vote::Yes => Ok(true),
            Vote::No => Ok(false),
            Vote::Error => Err(StepError::failed(format!("{} cannot prepare", self.id))),
        }
    }

    async fn commit(&self, context: &StepContext, _payload: &[u8]) -> Result<bool, StepError> {
        self.log.push(&self.id, context.phase);
        pause(self.commit_delay).await;
        match self.commit {
            CommitBehavior::Succeed => Ok(true),
            CommitBehavior::ReturnFalse => Ok(false),
            CommitBehavior::Error => Err(StepError::failed(format!("{} commit failed", self.id))),
        }
    }

    async fn compensate(
        &self,
        context: &StepContext,
        _payload: &[u8],
    ) -> Result<(), CompensationError> {
        self.log.push(&self.id, context.phase);
        let call = self.compensate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        pause(self.compensate_delay).await;
        match &self.compensate {
            CompensateBehavior::Succeed => Ok(()),
            CompensateBehavior::FailTimes(times) if call <= *times => {
                Err(CompensationError::retry(format!(
                    "{} compensation attempt {call} failed",
                    self.id
                )))
            }
            CompensateBehavior::FailTimes(_) => Ok(()),
            CompensateBehavior::AlwaysFail => {
                Err(CompensationError::retry(format!("{} compensation failed", self.id)))
            }
            CompensateBehavior::Terminal(reason) => {
                Err(CompensationError::terminal(reason.clone()))
            }
            CompensateBehavior::Panic => panic!("{} compensation panicked", self.id),
        }
    }
}
