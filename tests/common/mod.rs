//! Shared test support: call recording for step callables and lifecycle hooks
#![allow(dead_code)]

use async_trait::async_trait;
use sagakit::{Result, SagaError, SagaLifecycle, Step};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Thread-safe append-only log of callable invocations
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count_of(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

/// Lifecycle that records every hook invocation and the payloads it saw
#[derive(Default)]
pub struct RecordingLifecycle {
    pub events: Mutex<Vec<String>>,
    pub last_failure_payload: Mutex<Option<Value>>,
}

impl RecordingLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    pub fn last_failure_payload(&self) -> Option<Value> {
        self.last_failure_payload.lock().unwrap().clone()
    }
}

#[async_trait]
impl SagaLifecycle for RecordingLifecycle {
    async fn on_saga_success(&self, saga_id: i64) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("saga_success:{saga_id}"));
        Ok(())
    }

    async fn on_saga_failure(
        &self,
        saga_id: i64,
        failed_step: &Step,
        initial_failure_payload: &Value,
    ) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("saga_failure:{saga_id}:{}", failed_step.name()));
        *self.last_failure_payload.lock().unwrap() = Some(initial_failure_payload.clone());
        Ok(())
    }

    async fn on_compensation_failure(
        &self,
        saga_id: i64,
        initially_failed_step: &Step,
        initial_failure_payload: &Value,
        compensation_failed_step: &Step,
        _compensation_error: &SagaError,
    ) -> Result<()> {
        self.events.lock().unwrap().push(format!(
            "compensation_failure:{saga_id}:{}:{}",
            initially_failed_step.name(),
            compensation_failed_step.name()
        ));
        *self.last_failure_payload.lock().unwrap() = Some(initial_failure_payload.clone());
        Ok(())
    }
}
