//! Trip booking demo
//!
//! Runs a three-step saga (reserve order locally, book a hotel remotely,
//! charge the card remotely) over the in-memory broker, with worker-side
//! step handlers answering by convention and a state repository recording
//! the status trail. The saga is driven twice: a happy path and a payment
//! failure that rolls the trip back.

use sagakit::{
    InMemoryBroker, InMemorySagaStateRepository, MessageBroker, OrchestratorConfig,
    RetryingHandler, SagaDefinition, SagaOrchestrator, SagaStateRepository, SagaStepHandler,
    Step, TaskHandler,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

fn trip_definition() -> sagakit::Result<SagaDefinition> {
    SagaDefinition::new(
        "book_trip",
        vec![
            Step::local("reserve_order")
                .with_action(|ctx| async move {
                    info!(saga_id = ctx.saga_id(), "order reserved");
                    Ok(())
                })
                .with_compensation(|ctx| async move {
                    info!(saga_id = ctx.saga_id(), "order released");
                    Ok(())
                }),
            Step::remote("book_hotel", "hotel.book", "hotel_service")
                .with_action(|ctx| async move {
                    ctx.send_message(json!({"nights": 2})).await?;
                    Ok(())
                })
                .with_compensation(|ctx| async move {
                    ctx.send_message_as("hotel.cancel", json!({})).await?;
                    Ok(())
                })
                .on_success(|step, payload| {
                    info!(step = %step.name(), %payload, "hotel booked");
                    Ok(())
                })
                .on_failure(|step, payload| {
                    warn!(step = %step.name(), %payload, "hotel booking failed");
                    Ok(())
                }),
            Step::remote("charge_payment", "payment.charge", "payment_service")
                .with_action(|ctx| async move {
                    ctx.send_message(json!({"amount_cents": 12900})).await?;
                    Ok(())
                })
                .on_failure(|step, payload| {
                    warn!(step = %step.name(), %payload, "payment was declined");
                    Ok(())
                }),
        ],
    )
}

async fn run_trip(saga_id: i64, decline_payment: bool) -> anyhow::Result<()> {
    let config = OrchestratorConfig::default();
    let broker = Arc::new(InMemoryBroker::new());
    let repository = Arc::new(InMemorySagaStateRepository::new());
    repository.create(saga_id).await;

    let orchestrator = Arc::new(
        SagaOrchestrator::new(trip_definition()?, broker.clone())
            .with_state_repository(repository.clone()),
    );
    orchestrator.register_reply_handlers().await?;

    let hotel_handler: Arc<dyn TaskHandler> = Arc::new(SagaStepHandler::new(
        broker.clone(),
        config.response_queue.clone(),
        |saga_id, _payload| async move {
            info!(saga_id, "hotel service booked a room");
            Ok(json!({"confirmation": "H-42"}))
        },
    ));
    broker
        .bind_handler(
            "hotel.book",
            Arc::new(RetryingHandler::from_config(hotel_handler, &config.worker)),
        )
        .await?;

    let payment_handler = SagaStepHandler::new(
        broker.clone(),
        config.response_queue.clone(),
        move |saga_id, _payload| async move {
            if decline_payment {
                Err(anyhow::anyhow!("card declined").into())
            } else {
                info!(saga_id, "payment service charged the card");
                Ok(json!({"charge_id": "ch_123"}))
            }
        },
    );
    broker
        .bind_handler("payment.charge", Arc::new(payment_handler))
        .await?;

    let outcome = orchestrator.execute(saga_id).await?;
    info!(saga_id, ?outcome, "forward execution returned");

    while broker.process_pending().await? > 0 {}

    let state = repository.get_saga_state_by_id(saga_id).await?;
    let history = repository.status_history(saga_id).await;
    info!(
        saga_id,
        status = state.status.as_deref().unwrap_or("<none>"),
        ?history,
        "saga finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("--- happy path ---");
    run_trip(1001, false).await?;

    info!("--- payment declined, trip rolls back ---");
    run_trip(1002, true).await?;

    Ok(())
}
