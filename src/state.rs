//! Persisted saga state
//!
//! The stateful layer records a status string for every engine transition so
//! saga progress is externally observable and recoverable. The vocabulary is
//! fixed: per-step `"<step>.running"`, `"<step>.succeeded"`, `"<step>.failed"`,
//! `"<step>.compensating"`, `"<step>.compensated"`, and the terminal
//! `"succeeded"` / `"failed"`.

use crate::error::{Result, SagaError};
use crate::step::Step;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Terminal status of a fully completed saga
pub const STATUS_SUCCEEDED: &str = "succeeded";

/// Terminal status of a fully compensated saga
pub const STATUS_FAILED: &str = "failed";

/// Per-step phases that map onto persisted status strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Running,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
}

impl StepPhase {
    fn suffix(self) -> &'static str {
        match self {
            StepPhase::Running => "running",
            StepPhase::Succeeded => "succeeded",
            StepPhase::Failed => "failed",
            StepPhase::Compensating => "compensating",
            StepPhase::Compensated => "compensated",
        }
    }
}

/// Persisted status string for a step in a given phase
pub fn step_status(step_name: &str, phase: StepPhase) -> String {
    format!("{step_name}.{}", phase.suffix())
}

/// Whether a persisted status marks a saga that has finished for good
pub fn is_terminal_status(status: &str) -> bool {
    status == STATUS_SUCCEEDED || status == STATUS_FAILED
}

/// Repository-owned record of one saga's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    pub saga_id: i64,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Free-form columns beyond the status, written through `update`
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

impl SagaState {
    pub fn new(saga_id: i64) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            status: None,
            created_at: now,
            updated_at: now,
            fields: HashMap::new(),
        }
    }
}

/// Persistence seam for saga status transitions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SagaStateRepository: Send + Sync {
    /// Fetch the record for `saga_id`; an unknown id is an error
    async fn get_saga_state_by_id(&self, saga_id: i64) -> Result<SagaState>;

    /// Overwrite the status string, returning the updated record
    async fn update_status(&self, saga_id: i64, status: &str) -> Result<SagaState>;

    /// Merge free-form fields into the record
    async fn update(&self, saga_id: i64, fields: HashMap<String, Value>) -> Result<SagaState>;

    /// Record that a step failed and its saga is about to roll back
    async fn on_step_failure(
        &self,
        saga_id: i64,
        failed_step: &Step,
        initial_failure_payload: &Value,
    ) -> Result<()>;
}

/// In-process repository keeping records and the full status history per saga
pub struct InMemorySagaStateRepository {
    states: RwLock<HashMap<i64, SagaState>>,
    history: Mutex<HashMap<i64, Vec<String>>>,
}

impl InMemorySagaStateRepository {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Create a fresh record for `saga_id`, replacing any previous one
    pub async fn create(&self, saga_id: i64) -> SagaState {
        let state = SagaState::new(saga_id);
        self.states.write().await.insert(saga_id, state.clone());
        self.history.lock().await.insert(saga_id, Vec::new());
        state
    }

    /// Every status ever written for `saga_id`, in write order
    pub async fn status_history(&self, saga_id: i64) -> Vec<String> {
        self.history
            .lock()
            .await
            .get(&saga_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemorySagaStateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SagaStateRepository for InMemorySagaStateRepository {
    async fn get_saga_state_by_id(&self, saga_id: i64) -> Result<SagaState> {
        self.states
            .read()
            .await
            .get(&saga_id)
            .cloned()
            .ok_or(SagaError::StateNotFound(saga_id))
    }

    async fn update_status(&self, saga_id: i64, status: &str) -> Result<SagaState> {
        let mut states = self.states.write().await;
        let state = states
            .get_mut(&saga_id)
            .ok_or(SagaError::StateNotFound(saga_id))?;
        state.status = Some(status.to_string());
        state.updated_at = Utc::now();
        debug!(saga_id, status = %status, "saga status updated");

        self.history
            .lock()
            .await
            .entry(saga_id)
            .or_default()
            .push(status.to_string());
        Ok(state.clone())
    }

    async fn update(&self, saga_id: i64, fields: HashMap<String, Value>) -> Result<SagaState> {
        let mut states = self.states.write().await;
        let state = states
            .get_mut(&saga_id)
            .ok_or(SagaError::StateNotFound(saga_id))?;
        state.fields.extend(fields);
        state.updated_at = Utc::now();
        Ok(state.clone())
    }

    async fn on_step_failure(
        &self,
        saga_id: i64,
        failed_step: &Step,
        initial_failure_payload: &Value,
    ) -> Result<()> {
        debug!(
            saga_id,
            step = %failed_step.name(),
            "recording step failure before rollback"
        );
        let fields = HashMap::from([
            (
                "failed_step".to_string(),
                Value::String(failed_step.name().to_string()),
            ),
            ("last_failure".to_string(), initial_failure_payload.clone()),
        ]);
        self.update(saga_id, fields).await?;
        Ok(())
    }
}
