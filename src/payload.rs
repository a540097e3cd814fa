//! Wire-safe serialization of failures
//!
//! When a step fails, the failure travels through the broker as a plain JSON
//! mapping so that any service (or operator tooling) can read it without
//! sharing Rust types with the orchestrator.

use crate::error::{Result, SagaError, ERROR_MODULE_PATH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;

/// Uniform error record carried in failure replies and compensation payloads.
///
/// All four fields are strings; the record is stable for the same error value,
/// so it can double as a deduplication key in operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Most specific name available for the failure
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable failure message
    pub message: String,

    /// Namespace the failure originated from
    pub module: String,

    /// Multi-line rendering of the failure and its source chain
    pub traceback: String,
}

impl ErrorPayload {
    /// Serialize a saga error into a wire-safe record
    pub fn from_error(err: &SagaError) -> Self {
        Self {
            error_type: format!("SagaError::{}", err.name()),
            message: err.to_string(),
            module: ERROR_MODULE_PATH.to_string(),
            traceback: render_traceback(err),
        }
    }

    /// Convert into the JSON mapping shipped over the broker
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.error_type,
            "message": self.message,
            "module": self.module,
            "traceback": self.traceback,
        })
    }

    /// Parse a record back out of a broker payload
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Render the error and its source chain as log-friendly text.
///
/// The source chain is walked instead of capturing a live backtrace: frames
/// would differ between captures of the same error value, and the payload must
/// stay stable.
fn render_traceback(err: &SagaError) -> String {
    let mut out = format!("SagaError::{}: {}", err.name(), err);
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    out
}
