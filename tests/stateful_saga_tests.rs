//! Persisted status trail of stateful sagas

mod common;

use common::{CallLog, RecordingLifecycle};
use sagakit::{
    InMemoryBroker, InMemorySagaStateRepository, SagaDefinition, SagaError, SagaOrchestrator,
    SagaOutcome, SagaStateRepository, Step,
};
use serde_json::json;
use std::sync::Arc;

const SAGA_ID: i64 = 123;

struct Fixture {
    broker: Arc<InMemoryBroker>,
    repository: Arc<InMemorySagaStateRepository>,
    orchestrator: Arc<SagaOrchestrator>,
    log: CallLog,
    lifecycle: Arc<RecordingLifecycle>,
}

async fn fixture() -> Fixture {
    let log = CallLog::new();
    let lifecycle = RecordingLifecycle::new();
    let broker = Arc::new(InMemoryBroker::new());
    let repository = Arc::new(InMemorySagaStateRepository::new());
    repository.create(SAGA_ID).await;

    let compensation_log = log.clone();
    let success_log = log.clone();
    let definition = SagaDefinition::new(
        "stateful_saga",
        vec![
            Step::local("step_A").with_compensation(move |_ctx| {
                let log = compensation_log.clone();
                async move {
                    log.push("step_A.compensation");
                    Ok(())
                }
            }),
            Step::remote("step_B", "b_task", "q")
                .with_action(|ctx| async move {
                    ctx.send_message(json!({"note": "book it"})).await?;
                    Ok(())
                })
                .on_success(move |_step, _payload| {
                    success_log.push("step_B.on_success");
                    Ok(())
                }),
        ],
    )
    .unwrap();

    let orchestrator = Arc::new(
        SagaOrchestrator::new(definition, broker.clone())
            .with_lifecycle(lifecycle.clone())
            .with_state_repository(repository.clone()),
    );
    orchestrator.register_reply_handlers().await.unwrap();

    Fixture {
        broker,
        repository,
        orchestrator,
        log,
        lifecycle,
    }
}

#[tokio::test]
async fn test_status_trace_for_successful_saga() {
    let f = fixture().await;

    let outcome = f.orchestrator.execute(SAGA_ID).await.unwrap();
    assert_eq!(
        outcome,
        SagaOutcome::Suspended {
            step: "step_B".to_string()
        }
    );
    assert_eq!(
        f.repository.status_history(SAGA_ID).await,
        vec!["step_A.running", "step_A.succeeded", "step_B.running"]
    );

    f.broker
        .deliver("b_task.response.success", SAGA_ID, json!({"ticket_id": "111"}))
        .await
        .unwrap();

    assert_eq!(
        f.repository.status_history(SAGA_ID).await,
        vec![
            "step_A.running",
            "step_A.succeeded",
            "step_B.running",
            "step_B.succeeded",
            "succeeded",
        ]
    );
    let state = f.repository.get_saga_state_by_id(SAGA_ID).await.unwrap();
    assert_eq!(state.status.as_deref(), Some("succeeded"));
    assert_eq!(f.log.count_of("step_B.on_success"), 1);
}

#[tokio::test]
async fn test_status_trace_for_failed_saga() {
    let f = fixture().await;
    f.orchestrator.execute(SAGA_ID).await.unwrap();

    let failure_payload = json!({
        "type": "X",
        "message": "m",
        "module": "mod",
        "traceback": "trace",
    });
    f.broker
        .deliver("b_task.response.failure", SAGA_ID, failure_payload.clone())
        .await
        .unwrap();

    assert_eq!(
        f.repository.status_history(SAGA_ID).await,
        vec![
            "step_A.running",
            "step_A.succeeded",
            "step_B.running",
            "step_B.failed",
            "step_A.compensating",
            "step_A.compensated",
            "failed",
        ]
    );
    assert_eq!(f.log.count_of("step_A.compensation"), 1);
    assert_eq!(f.lifecycle.count_of("saga_failure:123:step_B"), 1);

    let state = f.repository.get_saga_state_by_id(SAGA_ID).await.unwrap();
    assert_eq!(state.status.as_deref(), Some("failed"));
    assert_eq!(state.fields["failed_step"], json!("step_B"));
    assert_eq!(state.fields["last_failure"], failure_payload);
}

#[tokio::test]
async fn test_late_reply_after_terminal_status_is_ignored() {
    let f = fixture().await;
    f.orchestrator.execute(SAGA_ID).await.unwrap();

    f.broker
        .deliver("b_task.response.success", SAGA_ID, json!({}))
        .await
        .unwrap();
    let history_at_terminal = f.repository.status_history(SAGA_ID).await;
    assert_eq!(f.log.count_of("step_B.on_success"), 1);

    // at-least-once redelivery of the same reply
    f.broker
        .deliver("b_task.response.success", SAGA_ID, json!({}))
        .await
        .unwrap();

    assert_eq!(f.repository.status_history(SAGA_ID).await, history_at_terminal);
    assert_eq!(f.log.count_of("step_B.on_success"), 1);
    assert_eq!(f.lifecycle.count_of("saga_success:123"), 1);
}

#[tokio::test]
async fn test_reply_for_unknown_saga_id_is_an_error() {
    let f = fixture().await;
    f.orchestrator.execute(SAGA_ID).await.unwrap();

    let err = f
        .broker
        .deliver("b_task.response.success", 999, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::StateNotFound(999)));
}

#[tokio::test]
async fn test_saga_state_is_readable_from_an_instance() {
    let f = fixture().await;
    f.orchestrator.execute(SAGA_ID).await.unwrap();

    let saga = f.orchestrator.saga(SAGA_ID);
    let state = saga.saga_state().await.unwrap();
    assert_eq!(state.saga_id, SAGA_ID);
    assert_eq!(state.status.as_deref(), Some("step_B.running"));
}
