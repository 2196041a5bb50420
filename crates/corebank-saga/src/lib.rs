//! Saga orchestration.
//!
//! A saga is an ordered list of steps, each with an `execute` and a
//! `compensate` half. The orchestrator owns a durable progress record and
//! persists it around every step, so a crashed saga can be picked up by the
//! recovery scan and driven to a terminal state. Steps must be idempotent;
//! the downstream reference-id discipline makes replays harmless.

#![deny(unsafe_code)]

pub mod recovery;
pub mod store;

pub use recovery::RecoveryScan;
pub use store::{InMemorySagaStore, SagaStore, SharedSagaStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corebank_types::{Clock, ErrorKind, SharedClock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    Running,
    Compensating,
    Completed,
    Compensated,
    Failed,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }
}

/// Durable saga progress record. Persisted before and after every step so
/// the executed-step list is never ahead of reality by more than one write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_id: String,
    pub aggregate_ref: String,
    pub executed_step_ids: Vec<String>,
    pub state: SagaState,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn new(saga_id: impl Into<String>, aggregate_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            saga_id: saga_id.into(),
            aggregate_ref: aggregate_ref.into(),
            executed_step_ids: Vec::new(),
            state: SagaState::Running,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga '{0}' was cancelled")]
    Cancelled(String),

    #[error("saga '{0}' exceeded its deadline")]
    DeadlineExceeded(String),

    #[error("saga store error: {0}")]
    Store(String),

    #[error("saga record references unknown step '{0}'")]
    UnknownStep(String),
}

impl SagaError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled(_) | Self::DeadlineExceeded(_) => ErrorKind::Dependency,
            Self::Store(_) => ErrorKind::Dependency,
            Self::UnknownStep(_) => ErrorKind::Dependency,
        }
    }
}

/// Why a step refused to go forward (or backward).
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub message: String,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Cooperative cancellation handle shared with callers.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-run context handed to every step. Cancellation and the deadline are
/// checked before each side effect, never mid-step.
#[derive(Clone)]
pub struct SagaContext {
    pub saga_id: String,
    cancel: CancelHandle,
    deadline: Option<DateTime<Utc>>,
    clock: SharedClock,
}

impl SagaContext {
    pub fn new(saga_id: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            saga_id: saga_id.into(),
            cancel: CancelHandle::default(),
            deadline: None,
            clock,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn interruption(&self) -> Option<SagaError> {
        if self.cancel.is_cancelled() {
            return Some(SagaError::Cancelled(self.saga_id.clone()));
        }
        if let Some(deadline) = self.deadline {
            if self.clock.now() > deadline {
                return Some(SagaError::DeadlineExceeded(self.saga_id.clone()));
            }
        }
        None
    }
}

/// One unit of forward work with its inverse.
#[async_trait]
pub trait SagaStep<A>: Send + Sync {
    fn step_id(&self) -> &'static str;

    async fn execute(&self, ctx: &SagaContext, aggregate: &mut A) -> Result<(), StepFailure>;

    async fn compensate(&self, ctx: &SagaContext, aggregate: &mut A) -> Result<(), StepFailure>;
}

/// Terminal outcome of a saga run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Completed,
    Compensated { failed_step: String, reason: String },
    Failed { reason: String },
}

/// Drives an ordered step list against one aggregate.
///
/// Steps execute sequentially within a saga; distinct sagas run in parallel
/// and no cross-saga ordering exists.
pub struct SagaOrchestrator<A> {
    steps: Vec<Arc<dyn SagaStep<A>>>,
    store: SharedSagaStore,
    clock: SharedClock,
}

impl<A: Send> SagaOrchestrator<A> {
    pub fn new(steps: Vec<Arc<dyn SagaStep<A>>>, store: SharedSagaStore, clock: SharedClock) -> Self {
        Self {
            steps,
            store,
            clock,
        }
    }

    pub async fn run(
        &self,
        ctx: &SagaContext,
        aggregate_ref: &str,
        aggregate: &mut A,
    ) -> Result<SagaOutcome, SagaError> {
        let record = SagaRecord::new(ctx.saga_id.clone(), aggregate_ref, self.clock.now());
        self.store.save(record.clone()).await?;
        self.drive(ctx, record, aggregate).await
    }

    /// Continue a previously persisted saga: already executed steps are
    /// skipped (their side effects are idempotent anyway) and the next
    /// pending step runs. A record found COMPENSATING resumes its rollback.
    pub async fn resume(
        &self,
        ctx: &SagaContext,
        record: SagaRecord,
        aggregate: &mut A,
    ) -> Result<SagaOutcome, SagaError> {
        match record.state {
            SagaState::Running => self.drive(ctx, record, aggregate).await,
            SagaState::Compensating => {
                let reason = record
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "resumed compensation".to_string());
                self.compensate(ctx, record, aggregate, "resume", reason).await
            }
            terminal => {
                tracing::debug!(saga = %record.saga_id, state = ?terminal, "resume skipped, saga already terminal");
                Ok(match terminal {
                    SagaState::Completed => SagaOutcome::Completed,
                    SagaState::Compensated => SagaOutcome::Compensated {
                        failed_step: "unknown".to_string(),
                        reason: record.last_error.unwrap_or_default(),
                    },
                    _ => SagaOutcome::Failed {
                        reason: record.last_error.unwrap_or_default(),
                    },
                })
            }
        }
    }

    async fn drive(
        &self,
        ctx: &SagaContext,
        mut record: SagaRecord,
        aggregate: &mut A,
    ) -> Result<SagaOutcome, SagaError> {
        for step in &self.steps {
            let step_id = step.step_id();
            if record.executed_step_ids.iter().any(|id| id == step_id) {
                continue;
            }

            if let Some(interruption) = ctx.interruption() {
                tracing::warn!(saga = %ctx.saga_id, step = step_id, error = %interruption, "saga interrupted before step");
                return self
                    .compensate(ctx, record, aggregate, step_id, interruption.to_string())
                    .await;
            }

            tracing::info!(saga = %ctx.saga_id, step = step_id, "step started");
            match step.execute(ctx, aggregate).await {
                Ok(()) => {
                    record.executed_step_ids.push(step_id.to_string());
                    record.updated_at = self.clock.now();
                    self.store.save(record.clone()).await?;
                    tracing::info!(saga = %ctx.saga_id, step = step_id, "step succeeded");
                }
                Err(failure) => {
                    tracing::warn!(saga = %ctx.saga_id, step = step_id, reason = %failure.message, "step failed");
                    return self
                        .compensate(ctx, record, aggregate, step_id, failure.message)
                        .await;
                }
            }
        }

        record.state = SagaState::Completed;
        record.updated_at = self.clock.now();
        self.store.save(record.clone()).await?;
        Ok(SagaOutcome::Completed)
    }

    async fn compensate(
        &self,
        ctx: &SagaContext,
        mut record: SagaRecord,
        aggregate: &mut A,
        failed_step: &str,
        reason: String,
    ) -> Result<SagaOutcome, SagaError> {
        record.state = SagaState::Compensating;
        record.last_error = Some(reason.clone());
        record.updated_at = self.clock.now();
        self.store.save(record.clone()).await?;

        for step_id in record.executed_step_ids.clone().into_iter().rev() {
            let step = self
                .steps
                .iter()
                .find(|step| step.step_id() == step_id)
                .ok_or_else(|| SagaError::UnknownStep(step_id.clone()))?;

            tracing::info!(saga = %ctx.saga_id, step = %step_id, "compensating step");
            if let Err(failure) = step.compensate(ctx, aggregate).await {
                // Compensation failures are never retried automatically.
                record.state = SagaState::Failed;
                record.last_error = Some(format!(
                    "compensation of '{}' failed ({}); manual intervention required",
                    step_id, failure.message
                ));
                record.updated_at = self.clock.now();
                self.store.save(record.clone()).await?;
                tracing::error!(
                    saga = %ctx.saga_id,
                    step = %step_id,
                    reason = %failure.message,
                    "compensation failed, manual intervention required"
                );
                return Ok(SagaOutcome::Failed {
                    reason: record.last_error.unwrap_or_default(),
                });
            }
            record.executed_step_ids.pop();
            record.updated_at = self.clock.now();
            self.store.save(record.clone()).await?;
        }

        record.state = SagaState::Compensated;
        record.updated_at = self.clock.now();
        self.store.save(record.clone()).await?;
        Ok(SagaOutcome::Compensated {
            failed_step: failed_step.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_types::SystemClock;
    use tokio::sync::Mutex;

    #[derive(Debug, Default)]
    struct Journal {
        entries: Vec<String>,
    }

    struct RecordingStep {
        id: &'static str,
        fail_execute: bool,
        fail_compensate: bool,
        journal: Arc<Mutex<Journal>>,
    }

    #[async_trait]
    impl SagaStep<()> for RecordingStep {
        fn step_id(&self) -> &'static str {
            self.id
        }

        async fn execute(&self, _ctx: &SagaContext, _aggregate: &mut ()) -> Result<(), StepFailure> {
            if self.fail_execute {
                return Err(StepFailure::new(format!("{} exploded", self.id)));
            }
            self.journal.lock().await.entries.push(format!("exec:{}", self.id));
            Ok(())
        }

        async fn compensate(
            &self,
            _ctx: &SagaContext,
            _aggregate: &mut (),
        ) -> Result<(), StepFailure> {
            if self.fail_compensate {
                return Err(StepFailure::new(format!("{} cannot be undone", self.id)));
            }
            self.journal.lock().await.entries.push(format!("comp:{}", self.id));
            Ok(())
        }
    }

    fn step(
        id: &'static str,
        journal: Arc<Mutex<Journal>>,
        fail_execute: bool,
        fail_compensate: bool,
    ) -> Arc<dyn SagaStep<()>> {
        Arc::new(RecordingStep {
            id,
            fail_execute,
            fail_compensate,
            journal,
        })
    }

    fn harness(steps: Vec<Arc<dyn SagaStep<()>>>) -> (SagaOrchestrator<()>, SharedSagaStore) {
        let store: SharedSagaStore = Arc::new(InMemorySagaStore::new());
        let orchestrator = SagaOrchestrator::new(steps, store.clone(), Arc::new(SystemClock));
        (orchestrator, store)
    }

    #[tokio::test]
    async fn all_steps_complete_in_order() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let (orchestrator, store) = harness(vec![
            step("a", journal.clone(), false, false),
            step("b", journal.clone(), false, false),
        ]);

        let ctx = SagaContext::new("saga-1", Arc::new(SystemClock));
        let outcome = orchestrator.run(&ctx, "agg-1", &mut ()).await.unwrap();
        assert_eq!(outcome, SagaOutcome::Completed);
        assert_eq!(journal.lock().await.entries, vec!["exec:a", "exec:b"]);

        let record = store.load("saga-1").await.unwrap().unwrap();
        assert_eq!(record.state, SagaState::Completed);
        assert_eq!(record.executed_step_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failure_compensates_executed_steps_in_reverse() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let (orchestrator, store) = harness(vec![
            step("a", journal.clone(), false, false),
            step("b", journal.clone(), false, false),
            step("c", journal.clone(), true, false),
        ]);

        let ctx = SagaContext::new("saga-2", Arc::new(SystemClock));
        let outcome = orchestrator.run(&ctx, "agg-2", &mut ()).await.unwrap();
        assert!(matches!(
            outcome,
            SagaOutcome::Compensated { ref failed_step, .. } if failed_step == "c"
        ));
        assert_eq!(
            journal.lock().await.entries,
            vec!["exec:a", "exec:b", "comp:b", "comp:a"]
        );

        let record = store.load("saga-2").await.unwrap().unwrap();
        assert_eq!(record.state, SagaState::Compensated);
        assert!(record.executed_step_ids.is_empty());
    }

    #[tokio::test]
    async fn compensation_failure_is_terminal() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let (orchestrator, store) = harness(vec![
            step("a", journal.clone(), false, true),
            step("b", journal.clone(), true, false),
        ]);

        let ctx = SagaContext::new("saga-3", Arc::new(SystemClock));
        let outcome = orchestrator.run(&ctx, "agg-3", &mut ()).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Failed { .. }));

        let record = store.load("saga-3").await.unwrap().unwrap();
        assert_eq!(record.state, SagaState::Failed);
        assert!(record
            .last_error
            .as_deref()
            .unwrap()
            .contains("manual intervention required"));
    }

    #[tokio::test]
    async fn cancellation_after_work_compensates() {
        let journal = Arc::new(Mutex::new(Journal::default()));

        struct CancellingStep {
            inner: RecordingStep,
            handle: CancelHandle,
        }

        #[async_trait]
        impl SagaStep<()> for CancellingStep {
            fn step_id(&self) -> &'static str {
                self.inner.id
            }

            async fn execute(&self, ctx: &SagaContext, aggregate: &mut ()) -> Result<(), StepFailure> {
                self.inner.execute(ctx, aggregate).await?;
                self.handle.cancel();
                Ok(())
            }

            async fn compensate(
                &self,
                ctx: &SagaContext,
                aggregate: &mut (),
            ) -> Result<(), StepFailure> {
                self.inner.compensate(ctx, aggregate).await
            }
        }

        let ctx = SagaContext::new("saga-4", Arc::new(SystemClock));
        let steps: Vec<Arc<dyn SagaStep<()>>> = vec![
            Arc::new(CancellingStep {
                inner: RecordingStep {
                    id: "a",
                    fail_execute: false,
                    fail_compensate: false,
                    journal: journal.clone(),
                },
                handle: ctx.cancel_handle(),
            }),
            step("b", journal.clone(), false, false),
        ];
        let (orchestrator, store) = harness(steps);

        let outcome = orchestrator.run(&ctx, "agg-4", &mut ()).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Compensated { .. }));
        assert_eq!(journal.lock().await.entries, vec!["exec:a", "comp:a"]);

        let record = store.load("saga-4").await.unwrap().unwrap();
        assert_eq!(record.state, SagaState::Compensated);
    }

    #[tokio::test]
    async fn resume_skips_already_executed_steps() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let (orchestrator, store) = harness(vec![
            step("a", journal.clone(), false, false),
            step("b", journal.clone(), false, false),
        ]);

        let clock: SharedClock = Arc::new(SystemClock);
        let mut record = SagaRecord::new("saga-5", "agg-5", clock.now());
        record.executed_step_ids.push("a".to_string());
        store.save(record.clone()).await.unwrap();

        let ctx = SagaContext::new("saga-5", clock);
        let outcome = orchestrator.resume(&ctx, record, &mut ()).await.unwrap();
        assert_eq!(outcome, SagaOutcome::Completed);
        // "a" is never re-executed.
        assert_eq!(journal.lock().await.entries, vec!["exec:b"]);
    }
}
