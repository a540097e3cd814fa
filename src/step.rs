//! Step model for saga definitions
//!
//! A step is the unit of work in a saga. Local steps run synchronously inside
//! the orchestrator process; remote steps publish a task to another service
//! through the broker and suspend the saga until a reply arrives. Every step
//! carries a compensation that undoes its work during rollback.

use crate::broker::{MessageBroker, MessageId};
use crate::error::{Result, SagaError};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Boxed async callable run as a step's forward action or compensation
pub type StepAction = Box<dyn Fn(StepContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Callback run against a remote step when its reply arrives
pub type ReplyHook = Box<dyn Fn(&Step, &Value) -> Result<()> + Send + Sync>;

fn no_action() -> StepAction {
    Box::new(|_ctx: StepContext| -> BoxFuture<'static, Result<()>> { Box::pin(async { Ok(()) }) })
}

fn no_reply_hook() -> ReplyHook {
    Box::new(|_step: &Step, _payload: &Value| Ok(()))
}

/// Immutable description of a single saga step
pub struct Step {
    name: String,
    action: StepAction,
    compensation: StepAction,
    kind: StepKind,
}

/// Execution variant of a step
pub enum StepKind {
    /// Runs synchronously on the caller; the saga advances immediately
    Local,

    /// Publishes work to another service; the saga suspends awaiting a reply
    Remote(RemoteSpec),
}

/// Remote-only step attributes
pub struct RemoteSpec {
    /// Logical name of the remote operation; reply names derive from it
    pub base_task_name: String,

    /// Destination routing key for the outbound task
    pub queue: String,

    pub(crate) on_success: ReplyHook,
    pub(crate) on_failure: ReplyHook,
}

impl Step {
    /// Create a local step with no-op action and compensation
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: no_action(),
            compensation: no_action(),
            kind: StepKind::Local,
        }
    }

    /// Create a remote step bound to a base task name and destination queue
    pub fn remote(
        name: impl Into<String>,
        base_task_name: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            action: no_action(),
            compensation: no_action(),
            kind: StepKind::Remote(RemoteSpec {
                base_task_name: base_task_name.into(),
                queue: queue.into(),
                on_success: no_reply_hook(),
                on_failure: no_reply_hook(),
            }),
        }
    }

    /// Set the forward action.
    ///
    /// A remote step's action is responsible for publishing the outbound task
    /// via [`StepContext::send_message`].
    pub fn with_action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.action = Box::new(move |ctx| Box::pin(action(ctx)));
        self
    }

    /// Set the compensation invoked during rollback
    pub fn with_compensation<F, Fut>(mut self, compensation: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.compensation = Box::new(move |ctx| Box::pin(compensation(ctx)));
        self
    }

    /// Set the hook run when a success reply for this step arrives.
    ///
    /// # Panics
    ///
    /// Panics on a local step: only remote steps receive replies.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Step, &Value) -> Result<()> + Send + Sync + 'static,
    {
        match &mut self.kind {
            StepKind::Remote(spec) => spec.on_success = Box::new(hook),
            StepKind::Local => panic!("on_success hook only applies to remote steps"),
        }
        self
    }

    /// Set the hook run when a failure reply for this step arrives.
    ///
    /// # Panics
    ///
    /// Panics on a local step: only remote steps receive replies.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Step, &Value) -> Result<()> + Send + Sync + 'static,
    {
        match &mut self.kind {
            StepKind::Remote(spec) => spec.on_failure = Box::new(hook),
            StepKind::Local => panic!("on_failure hook only applies to remote steps"),
        }
        self
    }

    /// Step name, unique within a saga definition
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution variant
    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, StepKind::Remote(_))
    }

    /// Remote attributes, if this is a remote step
    pub fn remote_spec(&self) -> Option<&RemoteSpec> {
        match &self.kind {
            StepKind::Remote(spec) => Some(spec),
            StepKind::Local => None,
        }
    }

    pub(crate) fn action(&self) -> &StepAction {
        &self.action
    }

    pub(crate) fn compensation(&self) -> &StepAction {
        &self.compensation
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Step");
        dbg.field("name", &self.name);
        match &self.kind {
            StepKind::Local => {
                dbg.field("kind", &"local");
            }
            StepKind::Remote(spec) => {
                dbg.field("kind", &"remote")
                    .field("base_task_name", &spec.base_task_name)
                    .field("queue", &spec.queue);
            }
        }
        dbg.finish()
    }
}

/// Everything a step callable may need: the saga's correlation id, the step
/// itself, the failure payload during rollback, and outbound dispatch.
#[derive(Clone)]
pub struct StepContext {
    saga_id: i64,
    step: Arc<Step>,
    broker: Arc<dyn MessageBroker>,
    initial_failure: Option<Value>,
}

impl StepContext {
    pub(crate) fn new(
        saga_id: i64,
        step: Arc<Step>,
        broker: Arc<dyn MessageBroker>,
        initial_failure: Option<Value>,
    ) -> Self {
        Self {
            saga_id,
            step,
            broker,
            initial_failure,
        }
    }

    /// Correlation token of the saga this step runs under
    pub fn saga_id(&self) -> i64 {
        self.saga_id
    }

    /// The step being executed or compensated
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// The serialized failure that triggered rollback, during compensation
    pub fn initial_failure(&self) -> Option<&Value> {
        self.initial_failure.as_ref()
    }

    /// Publish this step's task `[saga_id, payload]` to its destination queue
    pub async fn send_message(&self, payload: Value) -> Result<MessageId> {
        self.send(None, payload).await
    }

    /// Publish under an explicit task name instead of the step's base name
    pub async fn send_message_as(&self, task_name: &str, payload: Value) -> Result<MessageId> {
        self.send(Some(task_name), payload).await
    }

    async fn send(&self, task_name: Option<&str>, payload: Value) -> Result<MessageId> {
        let spec = self
            .step
            .remote_spec()
            .ok_or_else(|| SagaError::NotRemote(self.step.name().to_string()))?;

        let task_name = task_name.unwrap_or(&spec.base_task_name);
        debug!(
            saga_id = self.saga_id,
            step = %self.step.name(),
            task = %task_name,
            queue = %spec.queue,
            "dispatching outbound task"
        );
        self.broker
            .send_task(task_name, self.saga_id, payload, &spec.queue)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use serde_json::json;

    fn context(step: Step) -> (Arc<InMemoryBroker>, StepContext) {
        let broker = Arc::new(InMemoryBroker::new());
        let ctx = StepContext::new(123, Arc::new(step), broker.clone(), None);
        (broker, ctx)
    }

    #[tokio::test]
    async fn test_default_callables_are_no_ops() {
        let step = Step::local("reserve");
        let (_broker, ctx) = context(Step::local("reserve"));

        (step.action())(ctx.clone()).await.unwrap();
        (step.compensation())(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_message_uses_base_task_name_and_queue() {
        let step = Step::remote("book_hotel", "hotel.book", "hotel_service");
        let (broker, ctx) = context(step);

        ctx.send_message(json!({"nights": 2})).await.unwrap();

        let sent = broker.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].task_name, "hotel.book");
        assert_eq!(sent[0].saga_id, 123);
        assert_eq!(sent[0].queue, "hotel_service");
        assert_eq!(sent[0].payload, json!({"nights": 2}));
    }

    #[tokio::test]
    async fn test_send_message_as_overrides_task_name() {
        let step = Step::remote("book_hotel", "hotel.book", "hotel_service");
        let (broker, ctx) = context(step);

        ctx.send_message_as("hotel.book.v2", json!({})).await.unwrap();

        let sent = broker.sent_messages().await;
        assert_eq!(sent[0].task_name, "hotel.book.v2");
    }

    #[tokio::test]
    async fn test_send_message_on_local_step_is_rejected() {
        let (_broker, ctx) = context(Step::local("reserve"));

        let err = ctx.send_message(json!({})).await.unwrap_err();
        assert!(matches!(err, SagaError::NotRemote(_)));
    }

    #[test]
    #[should_panic(expected = "on_success hook only applies to remote steps")]
    fn test_reply_hook_on_local_step_panics() {
        let _ = Step::local("reserve").on_success(|_, _| Ok(()));
    }
}
