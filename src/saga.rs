//! Saga execution engine
//!
//! A [`Saga`] is an ephemeral per-transaction instance: a shared definition
//! bound to a `saga_id` and the ambient collaborators. `execute` drives it
//! forward through local steps, suspends at remote steps, and unwinds through
//! the compensation driver when anything fails. Nothing is held in memory
//! between a suspension and the reply that resumes it; the reply router
//! rebuilds an instance from the `saga_id` alone.

use crate::broker::{MessageBroker, MessageId};
use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError};
use crate::payload::ErrorPayload;
use crate::state::{step_status, SagaState, SagaStateRepository, StepPhase, STATUS_FAILED, STATUS_SUCCEEDED};
use crate::step::{Step, StepContext, StepKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

/// Observable terminal (or suspension) a saga run ended on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaOutcome {
    /// Every step completed; `on_saga_success` has run
    Completed,

    /// A remote step dispatched its task; the saga awaits the reply
    Suspended { step: String },

    /// A step failed and every preceding step was compensated
    Compensated { failed_step: String },

    /// A compensation failed; rollback stopped and the saga needs an operator
    CompensationStuck {
        failed_step: String,
        compensation_failed_step: String,
    },
}

/// Saga-level hooks the saga author fills in.
///
/// Defaults log and carry on, matching what most sagas want for the happy
/// path; override to publish events, notify operators, or record metrics.
#[async_trait]
pub trait SagaLifecycle: Send + Sync {
    /// Runs when the saga fully completes with success
    async fn on_saga_success(&self, saga_id: i64) -> Result<()> {
        info!(saga_id, "saga succeeded");
        Ok(())
    }

    /// Runs when the saga has failed, after all compensations finished
    async fn on_saga_failure(
        &self,
        saga_id: i64,
        failed_step: &Step,
        initial_failure_payload: &Value,
    ) -> Result<()> {
        info!(
            saga_id,
            step = %failed_step.name(),
            failure = %initial_failure_payload,
            "saga failed"
        );
        Ok(())
    }

    /// Runs when a compensation itself failed and rollback cannot finish
    async fn on_compensation_failure(
        &self,
        saga_id: i64,
        initially_failed_step: &Step,
        initial_failure_payload: &Value,
        compensation_failed_step: &Step,
        compensation_error: &SagaError,
    ) -> Result<()> {
        error!(
            saga_id,
            initially_failed_step = %initially_failed_step.name(),
            compensation_failed_step = %compensation_failed_step.name(),
            error = %compensation_error,
            initial_failure = %initial_failure_payload,
            "compensation failed; saga requires operator attention"
        );
        Ok(())
    }
}

/// Lifecycle that keeps the default logging behavior
pub struct LoggingLifecycle;

impl SagaLifecycle for LoggingLifecycle {}

/// One business transaction's saga instance
pub struct Saga {
    definition: Arc<SagaDefinition>,
    saga_id: i64,
    broker: Arc<dyn MessageBroker>,
    lifecycle: Arc<dyn SagaLifecycle>,
    repository: Option<Arc<dyn SagaStateRepository>>,
    cached_state: OnceCell<SagaState>,
}

impl Saga {
    pub(crate) fn new(
        definition: Arc<SagaDefinition>,
        saga_id: i64,
        broker: Arc<dyn MessageBroker>,
        lifecycle: Arc<dyn SagaLifecycle>,
        repository: Option<Arc<dyn SagaStateRepository>>,
    ) -> Self {
        Self {
            definition,
            saga_id,
            broker,
            lifecycle,
            repository,
            cached_state: OnceCell::new(),
        }
    }

    /// Correlation token this instance is bound to
    pub fn saga_id(&self) -> i64 {
        self.saga_id
    }

    /// The shared definition this instance executes
    pub fn definition(&self) -> &SagaDefinition {
        &self.definition
    }

    /// The persisted state record, fetched once and cached for this instance
    pub async fn saga_state(&self) -> Result<SagaState> {
        let repository = self.repository.as_ref().ok_or_else(|| {
            SagaError::Repository("no state repository configured".to_string())
        })?;
        self.cached_state
            .get_or_try_init(|| repository.get_saga_state_by_id(self.saga_id))
            .await
            .map(SagaState::clone)
    }

    /// Advance the saga forward from `starting_step` (default: the first step).
    ///
    /// Returns when all steps completed (`Completed`), a remote step
    /// dispatched and the saga awaits its reply (`Suspended`), or a step
    /// failed and rollback ran (`Compensated` / `CompensationStuck`).
    /// Repository errors on this forward path propagate as `Err` without
    /// starting a rollback.
    pub async fn execute(&self, starting_step: Option<&str>) -> Result<SagaOutcome> {
        let mut step = match starting_step {
            Some(name) => self.definition.step_by_name(name)?.clone(),
            None => self.definition.first_step().clone(),
        };

        loop {
            if let Err(err) = self.run_step(&step).await {
                if err.is_repository() {
                    return Err(err);
                }
                warn!(
                    saga_id = self.saga_id,
                    step = %step.name(),
                    error = %err,
                    "step failed; rolling back"
                );
                let payload = ErrorPayload::from_error(&err).to_value();
                return self.compensate(&step, &payload).await;
            }

            match step.kind() {
                StepKind::Local => {
                    self.record_status(&step_status(step.name(), StepPhase::Succeeded))
                        .await?;
                    match self.definition.next_step(&step) {
                        Some(next) => step = next.clone(),
                        None => return self.finish_success().await,
                    }
                }
                StepKind::Remote(_) => {
                    info!(
                        saga_id = self.saga_id,
                        step = %step.name(),
                        "saga suspended awaiting reply"
                    );
                    return Ok(SagaOutcome::Suspended {
                        step: step.name().to_string(),
                    });
                }
            }
        }
    }

    /// Run one step's forward action
    async fn run_step(&self, step: &Arc<Step>) -> Result<()> {
        self.record_status(&step_status(step.name(), StepPhase::Running))
            .await?;
        info!(saga_id = self.saga_id, step = %step.name(), "running step");
        (step.action())(self.step_context(step, None)).await
    }

    /// Apply a success reply to a remote step: run its hook, then finish the
    /// saga or resume at the next step.
    pub async fn on_step_success(&self, step: &Arc<Step>, payload: &Value) -> Result<SagaOutcome> {
        let spec = step
            .remote_spec()
            .ok_or_else(|| SagaError::NotRemote(step.name().to_string()))?;

        self.record_status(&step_status(step.name(), StepPhase::Succeeded))
            .await?;
        info!(
            saga_id = self.saga_id,
            step = %step.name(),
            "running on_success for step"
        );
        (spec.on_success)(step, payload)?;

        if self.definition.is_last_step(step) {
            self.finish_success().await
        } else {
            match self.definition.next_step(step) {
                Some(next) => {
                    let next_name = next.name().to_string();
                    self.execute(Some(&next_name)).await
                }
                None => self.finish_success().await,
            }
        }
    }

    /// Apply a failure reply to a remote step: run its hook, then compensate
    pub async fn on_step_failure(&self, step: &Arc<Step>, payload: &Value) -> Result<SagaOutcome> {
        let spec = step
            .remote_spec()
            .ok_or_else(|| SagaError::NotRemote(step.name().to_string()))?;

        self.record_status(&step_status(step.name(), StepPhase::Failed))
            .await?;
        info!(
            saga_id = self.saga_id,
            step = %step.name(),
            "running on_failure for step"
        );
        (spec.on_failure)(step, payload)?;

        self.compensate(step, payload).await
    }

    /// Walk the steps before `failed_step` in reverse, compensating each.
    ///
    /// The failed step itself is not compensated: it never completed. Any
    /// error during the walk stops it immediately and surfaces through
    /// `on_compensation_failure`.
    pub async fn compensate(
        &self,
        failed_step: &Arc<Step>,
        initial_failure_payload: &Value,
    ) -> Result<SagaOutcome> {
        if let Some(repository) = &self.repository {
            if let Err(err) = repository
                .on_step_failure(self.saga_id, failed_step, initial_failure_payload)
                .await
            {
                return self
                    .compensation_stuck(failed_step, initial_failure_payload, failed_step, err)
                    .await;
            }
        }

        let mut current = self.definition.previous_step(failed_step).cloned();
        while let Some(step) = current {
            if let Err(err) = self.compensate_step(&step, initial_failure_payload).await {
                return self
                    .compensation_stuck(failed_step, initial_failure_payload, &step, err)
                    .await;
            }
            current = self.definition.previous_step(&step).cloned();
        }

        self.lifecycle
            .on_saga_failure(self.saga_id, failed_step, initial_failure_payload)
            .await?;
        self.record_status(STATUS_FAILED).await?;

        Ok(SagaOutcome::Compensated {
            failed_step: failed_step.name().to_string(),
        })
    }

    /// Run one step's compensation
    async fn compensate_step(&self, step: &Arc<Step>, initial_failure_payload: &Value) -> Result<()> {
        self.record_status(&step_status(step.name(), StepPhase::Compensating))
            .await?;
        info!(saga_id = self.saga_id, step = %step.name(), "compensating step");
        (step.compensation())(self.step_context(step, Some(initial_failure_payload.clone())))
            .await?;
        self.record_status(&step_status(step.name(), StepPhase::Compensated))
            .await?;
        Ok(())
    }

    /// Publish a remote step's task `[saga_id, payload]` to its queue,
    /// optionally under an explicit task name
    pub async fn send_message_to_other_service(
        &self,
        step: &Arc<Step>,
        payload: Value,
        task_name: Option<&str>,
    ) -> Result<MessageId> {
        let ctx = self.step_context(step, None);
        match task_name {
            Some(name) => ctx.send_message_as(name, payload).await,
            None => ctx.send_message(payload).await,
        }
    }

    fn step_context(&self, step: &Arc<Step>, initial_failure: Option<Value>) -> StepContext {
        StepContext::new(
            self.saga_id,
            Arc::clone(step),
            Arc::clone(&self.broker),
            initial_failure,
        )
    }

    async fn finish_success(&self) -> Result<SagaOutcome> {
        self.lifecycle.on_saga_success(self.saga_id).await?;
        self.record_status(STATUS_SUCCEEDED).await?;
        Ok(SagaOutcome::Completed)
    }

    async fn compensation_stuck(
        &self,
        initially_failed_step: &Arc<Step>,
        initial_failure_payload: &Value,
        compensation_failed_step: &Arc<Step>,
        compensation_error: SagaError,
    ) -> Result<SagaOutcome> {
        self.lifecycle
            .on_compensation_failure(
                self.saga_id,
                initially_failed_step,
                initial_failure_payload,
                compensation_failed_step,
                &compensation_error,
            )
            .await?;
        Ok(SagaOutcome::CompensationStuck {
            failed_step: initially_failed_step.name().to_string(),
            compensation_failed_step: compensation_failed_step.name().to_string(),
        })
    }

    async fn record_status(&self, status: &str) -> Result<()> {
        if let Some(repository) = &self.repository {
            repository.update_status(self.saga_id, status).await?;
        }
        Ok(())
    }
}
