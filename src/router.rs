//! Reply routing
//!
//! The orchestrator side of the correlation protocol. At worker startup,
//! [`SagaOrchestrator::register_reply_handlers`] binds an inbound handler for
//! both derived reply names of every remote step. When a reply arrives, the
//! handler rebuilds a fresh [`Saga`] for the delivered `saga_id` and routes
//! the payload to the matched step as a success or failure.

use crate::broker::{MessageBroker, TaskDelivery, TaskHandler};
use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError};
use crate::naming::{failure_task_name, success_task_name};
use crate::saga::{LoggingLifecycle, Saga, SagaLifecycle, SagaOutcome};
use crate::state::{is_terminal_status, SagaStateRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Saga-type-level entry point: owns the definition and shared collaborators,
/// builds per-transaction [`Saga`] instances, and registers reply handlers.
pub struct SagaOrchestrator {
    definition: Arc<SagaDefinition>,
    broker: Arc<dyn MessageBroker>,
    lifecycle: Arc<dyn SagaLifecycle>,
    repository: Option<Arc<dyn SagaStateRepository>>,
}

impl SagaOrchestrator {
    pub fn new(definition: SagaDefinition, broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            definition: Arc::new(definition),
            broker,
            lifecycle: Arc::new(LoggingLifecycle),
            repository: None,
        }
    }

    /// Replace the default logging lifecycle hooks
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn SagaLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Persist status transitions through `repository`, making every saga of
    /// this type stateful
    pub fn with_state_repository(mut self, repository: Arc<dyn SagaStateRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn definition(&self) -> &SagaDefinition {
        &self.definition
    }

    /// Build the saga instance for one business transaction
    pub fn saga(&self, saga_id: i64) -> Saga {
        Saga::new(
            Arc::clone(&self.definition),
            saga_id,
            Arc::clone(&self.broker),
            Arc::clone(&self.lifecycle),
            self.repository.clone(),
        )
    }

    /// Start the saga for `saga_id` from its first step
    pub async fn execute(&self, saga_id: i64) -> Result<SagaOutcome> {
        self.saga(saga_id).execute(None).await
    }

    /// Bind reply handlers for every remote step of the definition.
    ///
    /// Exactly two bindings per remote step, one per derived reply name.
    /// Run once at broker-worker startup; duplicate bindings (another saga
    /// type already claimed a reply name on this broker) fail registration.
    pub async fn register_reply_handlers(&self) -> Result<()> {
        let handler: Arc<dyn TaskHandler> = Arc::new(ReplyHandler {
            definition: Arc::clone(&self.definition),
            broker: Arc::clone(&self.broker),
            lifecycle: Arc::clone(&self.lifecycle),
            repository: self.repository.clone(),
        });

        for step in self.definition.remote_steps() {
            let Some(spec) = step.remote_spec() else {
                continue;
            };

            self.broker
                .bind_handler(&success_task_name(&spec.base_task_name), Arc::clone(&handler))
                .await?;
            self.broker
                .bind_handler(&failure_task_name(&spec.base_task_name), Arc::clone(&handler))
                .await?;
            info!(
                saga = %self.definition.name(),
                step = %step.name(),
                base_task = %spec.base_task_name,
                "registered reply handlers"
            );
        }
        Ok(())
    }
}

/// Broker handler that resolves replies back to a saga instance and step
struct ReplyHandler {
    definition: Arc<SagaDefinition>,
    broker: Arc<dyn MessageBroker>,
    lifecycle: Arc<dyn SagaLifecycle>,
    repository: Option<Arc<dyn SagaStateRepository>>,
}

impl ReplyHandler {
    fn saga(&self, saga_id: i64) -> Saga {
        Saga::new(
            Arc::clone(&self.definition),
            saga_id,
            Arc::clone(&self.broker),
            Arc::clone(&self.lifecycle),
            self.repository.clone(),
        )
    }

    /// A reply for a saga that already reached a terminal status is stale
    /// (at-least-once redelivery, or a step that failed after dispatching).
    async fn is_stale(&self, saga_id: i64) -> Result<bool> {
        let Some(repository) = &self.repository else {
            return Ok(false);
        };
        let state = repository.get_saga_state_by_id(saga_id).await?;
        Ok(state.status.as_deref().is_some_and(is_terminal_status))
    }
}

#[async_trait]
impl TaskHandler for ReplyHandler {
    async fn handle(&self, delivery: TaskDelivery) -> Result<()> {
        if self.is_stale(delivery.saga_id).await? {
            warn!(
                saga_id = delivery.saga_id,
                task = %delivery.task_name,
                "ignoring reply for terminated saga"
            );
            return Ok(());
        }

        let definition = &self.definition;
        let saga = self.saga(delivery.saga_id);

        if let Some(step) = definition.remote_step_by_success_task_name(&delivery.task_name) {
            saga.on_step_success(step, &delivery.payload).await?;
        } else if let Some(step) = definition.remote_step_by_failure_task_name(&delivery.task_name)
        {
            saga.on_step_failure(step, &delivery.payload).await?;
        } else {
            error!(
                saga_id = delivery.saga_id,
                task = %delivery.task_name,
                saga = %definition.name(),
                "reply does not match any remote step"
            );
            return Err(SagaError::UnroutableReply(delivery.task_name));
        }
        Ok(())
    }
}
