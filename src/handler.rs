//! Worker-side step handlers
//!
//! Helpers for the services that execute remote steps. [`SagaStepHandler`]
//! wraps the actual work and answers the orchestrator by convention: the
//! returned payload rides a `<task>.response.success` reply, a failure is
//! serialized into an [`ErrorPayload`] and rides `<task>.response.failure`.
//! [`RetryingHandler`] adds bounded retries in front of any handler.

use crate::broker::{MessageBroker, MessageId, TaskDelivery, TaskHandler};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::naming::{failure_task_name, success_task_name};
use crate::payload::ErrorPayload;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Boxed async work closure a step handler runs: `(saga_id, payload) -> response payload`
pub type StepWork = Box<dyn Fn(i64, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Publish a reply task `[saga_id, payload]` to the orchestrator's response queue
pub async fn send_saga_response(
    broker: &dyn MessageBroker,
    response_task_name: &str,
    response_queue: &str,
    saga_id: i64,
    payload: Value,
) -> Result<MessageId> {
    broker
        .send_task(response_task_name, saga_id, payload, response_queue)
        .await
}

/// Runs a remote step's work and reports its outcome back by convention
pub struct SagaStepHandler {
    broker: Arc<dyn MessageBroker>,
    response_queue: Option<String>,
    work: StepWork,
}

impl SagaStepHandler {
    /// Handler that replies on `response_queue` after running `work`
    pub fn new<F, Fut>(
        broker: Arc<dyn MessageBroker>,
        response_queue: impl Into<String>,
        work: F,
    ) -> Self
    where
        F: Fn(i64, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            broker,
            response_queue: Some(response_queue.into()),
            work: Box::new(move |saga_id, payload| Box::pin(work(saga_id, payload))),
        }
    }

    /// Handler for steps the orchestrator does not await a reply from
    pub fn without_response<F, Fut>(broker: Arc<dyn MessageBroker>, work: F) -> Self
    where
        F: Fn(i64, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            broker,
            response_queue: None,
            work: Box::new(move |saga_id, payload| Box::pin(work(saga_id, payload))),
        }
    }
}

#[async_trait]
impl TaskHandler for SagaStepHandler {
    async fn handle(&self, delivery: TaskDelivery) -> Result<()> {
        let (response_task_name, response_payload) =
            match (self.work)(delivery.saga_id, delivery.payload).await {
                Ok(response) => {
                    info!(
                        saga_id = delivery.saga_id,
                        task = %delivery.task_name,
                        "saga step handled"
                    );
                    (success_task_name(&delivery.task_name), response)
                }
                Err(err) => {
                    error!(
                        saga_id = delivery.saga_id,
                        task = %delivery.task_name,
                        error = %err,
                        "saga step handler failed"
                    );
                    (
                        failure_task_name(&delivery.task_name),
                        ErrorPayload::from_error(&err).to_value(),
                    )
                }
            };

        if let Some(queue) = &self.response_queue {
            send_saga_response(
                self.broker.as_ref(),
                &response_task_name,
                queue,
                delivery.saga_id,
                response_payload,
            )
            .await?;
        }
        Ok(())
    }
}

/// Retries a delegate handler with exponential backoff, then yields the
/// original error. Worker-side only: the orchestrator itself never retries.
pub struct RetryingHandler {
    inner: Arc<dyn TaskHandler>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryingHandler {
    pub fn new(inner: Arc<dyn TaskHandler>, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_delay: Duration::from_millis(100),
        }
    }

    /// Build from the worker section of an orchestrator config
    pub fn from_config(inner: Arc<dyn TaskHandler>, config: &WorkerConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl TaskHandler for RetryingHandler {
    async fn handle(&self, delivery: TaskDelivery) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.inner.handle(delivery.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_retries => {
                    warn!(
                        saga_id = delivery.saga_id,
                        task = %delivery.task_name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %err,
                        "task handler failed; retrying"
                    );
                    tokio::time::sleep(self.base_delay * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::error::SagaError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_reply_rides_derived_name() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = SagaStepHandler::new(broker.clone(), "orchestrator_queue", |_, _| async {
            Ok(json!({"ticket_id": "111"}))
        });

        handler
            .handle(TaskDelivery {
                task_name: "ticket.create".to_string(),
                saga_id: 123,
                payload: json!({"table": 4}),
            })
            .await
            .unwrap();

        let sent = broker.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].task_name, "ticket.create.response.success");
        assert_eq!(sent[0].saga_id, 123);
        assert_eq!(sent[0].payload, json!({"ticket_id": "111"}));
        assert_eq!(sent[0].queue, "orchestrator_queue");
    }

    #[tokio::test]
    async fn test_failure_reply_carries_error_payload() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = SagaStepHandler::new(broker.clone(), "orchestrator_queue", |_, _| async {
            Err(SagaError::Action(anyhow::anyhow!("no free tables")))
        });

        handler
            .handle(TaskDelivery {
                task_name: "ticket.create".to_string(),
                saga_id: 123,
                payload: json!({}),
            })
            .await
            .unwrap();

        let sent = broker.sent_messages().await;
        assert_eq!(sent[0].task_name, "ticket.create.response.failure");
        let payload = ErrorPayload::from_value(&sent[0].payload).unwrap();
        assert_eq!(payload.error_type, "SagaError::Action");
        assert_eq!(payload.message, "no free tables");
        assert_eq!(payload.module, "sagakit::error");
        assert!(!payload.traceback.is_empty());
    }

    #[tokio::test]
    async fn test_without_response_publishes_nothing() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler =
            SagaStepHandler::without_response(broker.clone(), |_, _| async { Ok(json!({})) });

        handler
            .handle(TaskDelivery {
                task_name: "audit.log".to_string(),
                saga_id: 1,
                payload: json!({}),
            })
            .await
            .unwrap();

        assert!(broker.sent_messages().await.is_empty());
    }

    struct FlakyHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn handle(&self, _delivery: TaskDelivery) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(SagaError::Broker("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_retrying_handler_retries_then_succeeds() {
        let flaky = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let handler = RetryingHandler::new(flaky.clone(), 3)
            .with_base_delay(Duration::from_millis(1));

        handler
            .handle(TaskDelivery {
                task_name: "x".to_string(),
                saga_id: 1,
                payload: json!({}),
            })
            .await
            .unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retrying_handler_yields_original_error() {
        let flaky = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let handler = RetryingHandler::new(flaky.clone(), 2)
            .with_base_delay(Duration::from_millis(1));

        let err = handler
            .handle(TaskDelivery {
                task_name: "x".to_string(),
                saga_id: 1,
                payload: json!({}),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::Broker(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
