//! Message broker seam
//!
//! The orchestrator talks to its message broker through two operations only:
//! publish a task and bind a named inbound handler. Anything that can do both
//! with at-least-once delivery (Celery-style task queues, AMQP, an in-process
//! channel) can drive a saga.
//!
//! [`InMemoryBroker`] is the in-process implementation used by tests, demos,
//! and embedded deployments.

use crate::error::{Result, SagaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Broker-assigned identifier of a published message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound task as handed to a bound handler.
///
/// Carries the delivered task name so a handler bound under several names can
/// tell which one fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDelivery {
    pub task_name: String,
    pub saga_id: i64,
    pub payload: Value,
}

/// Published message as recorded by the in-memory broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub task_name: String,
    pub saga_id: i64,
    pub payload: Value,
    pub queue: String,
}

/// Processes inbound tasks delivered by the broker
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, delivery: TaskDelivery) -> Result<()>;
}

/// Send-task + bind-handler interface the orchestrator assumes of its broker
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a task named `task_name` with argument vector
    /// `[saga_id, payload]` to `queue`; returns the assigned message id
    async fn send_task(
        &self,
        task_name: &str,
        saga_id: i64,
        payload: Value,
        queue: &str,
    ) -> Result<MessageId>;

    /// Bind a handler for inbound tasks named `task_name`.
    ///
    /// Binding the same name twice is a registration error.
    async fn bind_handler(&self, task_name: &str, handler: Arc<dyn TaskHandler>) -> Result<()>;
}

/// In-process broker: a handler registry plus a pending-message queue.
///
/// Published messages land in the pending queue and in a send log.
/// [`process_pending`](InMemoryBroker::process_pending) or a spawned worker
/// drains the queue to bound handlers; messages for task names nothing here
/// is bound to are parked as unclaimed, since they belong to services living
/// in another process.
pub struct InMemoryBroker {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    pending_tx: flume::Sender<OutboundMessage>,
    pending_rx: flume::Receiver<OutboundMessage>,
    sent: Mutex<Vec<OutboundMessage>>,
    unclaimed: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = flume::unbounded();
        Self {
            handlers: RwLock::new(HashMap::new()),
            pending_tx,
            pending_rx,
            sent: Mutex::new(Vec::new()),
            unclaimed: Mutex::new(Vec::new()),
        }
    }

    /// Dispatch one task to its bound handler immediately.
    ///
    /// This is how a test (or an adjacent in-process service) emulates the
    /// broker delivering a message; an unbound task name is an error.
    pub async fn deliver(&self, task_name: &str, saga_id: i64, payload: Value) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .await
            .get(task_name)
            .cloned()
            .ok_or_else(|| SagaError::Broker(format!("no handler bound for task \"{task_name}\"")))?;

        handler
            .handle(TaskDelivery {
                task_name: task_name.to_string(),
                saga_id,
                payload,
            })
            .await
    }

    /// Drain the pending queue, dispatching every message whose task name has
    /// a bound handler. Returns how many messages were dispatched.
    ///
    /// Handlers may publish further messages while running; those are drained
    /// too before this returns.
    pub async fn process_pending(&self) -> Result<usize> {
        let mut dispatched = 0;
        while let Ok(message) = self.pending_rx.try_recv() {
            let handler = self.handlers.read().await.get(&message.task_name).cloned();
            match handler {
                Some(handler) => {
                    handler
                        .handle(TaskDelivery {
                            task_name: message.task_name,
                            saga_id: message.saga_id,
                            payload: message.payload,
                        })
                        .await?;
                    dispatched += 1;
                }
                None => self.unclaimed.lock().await.push(message),
            }
        }
        Ok(dispatched)
    }

    /// Run the drain loop on a background task until the broker is dropped.
    ///
    /// Handler failures are logged, not retried; at-least-once redelivery is
    /// the responsibility of a real broker backend.
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        let broker = self;
        tokio::spawn(async move {
            while let Ok(message) = broker.pending_rx.recv_async().await {
                let handler = broker.handlers.read().await.get(&message.task_name).cloned();
                match handler {
                    Some(handler) => {
                        let task_name = message.task_name.clone();
                        let saga_id = message.saga_id;
                        let delivery = TaskDelivery {
                            task_name: message.task_name,
                            saga_id: message.saga_id,
                            payload: message.payload,
                        };
                        if let Err(err) = handler.handle(delivery).await {
                            error!(
                                saga_id,
                                task = %task_name,
                                error = %err,
                                "task handler failed"
                            );
                        }
                    }
                    None => {
                        warn!(task = %message.task_name, "no handler bound; parking message");
                        broker.unclaimed.lock().await.push(message);
                    }
                }
            }
        })
    }

    /// Every message published through this broker, in publish order
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    /// Messages drained from the pending queue with no bound handler
    pub async fn unclaimed_messages(&self) -> Vec<OutboundMessage> {
        self.unclaimed.lock().await.clone()
    }

    /// Whether a handler is bound for `task_name`
    pub async fn has_handler(&self, task_name: &str) -> bool {
        self.handlers.read().await.contains_key(task_name)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send_task(
        &self,
        task_name: &str,
        saga_id: i64,
        payload: Value,
        queue: &str,
    ) -> Result<MessageId> {
        let message = OutboundMessage {
            id: MessageId::generate(),
            task_name: task_name.to_string(),
            saga_id,
            payload,
            queue: queue.to_string(),
        };
        debug!(
            saga_id,
            task = %task_name,
            queue = %queue,
            message_id = %message.id,
            "task published"
        );

        self.sent.lock().await.push(message.clone());
        self.pending_tx
            .send(message.clone())
            .map_err(|err| SagaError::Broker(format!("pending queue closed: {err}")))?;
        Ok(message.id)
    }

    async fn bind_handler(&self, task_name: &str, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(task_name) {
            return Err(SagaError::HandlerAlreadyBound(task_name.to_string()));
        }
        handlers.insert(task_name.to_string(), handler);
        Ok(())
    }
}
