//! Saga Orchestration Library
//!
//! A saga is a linearly ordered sequence of steps that together realize a
//! business transaction spanning multiple services. This crate drives such
//! sagas: it advances through local (synchronous) and remote (asynchronous,
//! message-broker mediated) steps, correlates inbound replies back to the
//! originating saga and step, and unwinds partially applied work through
//! compensations when anything fails.
//!
//! Building blocks:
//! - Step model and validated saga definitions
//! - Execution engine with compensation-based rollback
//! - Reply router binding `<task>.response.{success,failure}` handlers
//! - Optional persisted status trail via a state repository
//! - Worker-side helpers for the services executing remote steps
//!
//! # Example
//!
//! ```rust,no_run
//! use sagakit::{InMemoryBroker, SagaDefinition, SagaOrchestrator, Step};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let definition = SagaDefinition::new(
//!         "create_order",
//!         vec![
//!             Step::local("reserve_order"),
//!             Step::remote("create_ticket", "restaurant.create_ticket", "restaurant_queue")
//!                 .with_action(|ctx| async move {
//!                     ctx.send_message(serde_json::json!({"table": 4})).await?;
//!                     Ok(())
//!                 }),
//!         ],
//!     )?;
//!
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let orchestrator = Arc::new(SagaOrchestrator::new(definition, broker));
//!     orchestrator.register_reply_handlers().await?;
//!
//!     let outcome = orchestrator.execute(123).await?;
//!     println!("saga suspended as: {outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod definition;
pub mod error;
pub mod handler;
pub mod naming;
pub mod payload;
pub mod router;
pub mod saga;
pub mod state;
pub mod step;

// Re-export main types
pub use broker::{
    InMemoryBroker, MessageBroker, MessageId, OutboundMessage, TaskDelivery, TaskHandler,
};
pub use config::{BrokerConfig, OrchestratorConfig, WorkerConfig};
pub use definition::SagaDefinition;
pub use error::{Result, SagaError};
pub use handler::{send_saga_response, RetryingHandler, SagaStepHandler};
pub use naming::{failure_task_name, success_task_name};
pub use payload::ErrorPayload;
pub use router::SagaOrchestrator;
pub use saga::{LoggingLifecycle, Saga, SagaLifecycle, SagaOutcome};
pub use state::{
    is_terminal_status, step_status, InMemorySagaStateRepository, SagaState, SagaStateRepository,
    StepPhase, STATUS_FAILED, STATUS_SUCCEEDED,
};
pub use step::{RemoteSpec, Step, StepContext, StepKind};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
