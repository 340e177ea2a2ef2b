//! Engine request/response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// One call to the remote engine.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Operation name (e.g. `extract_pose`)
    pub operation: String,
    /// Operation input
    pub payload: Value,
    /// Client-side deadline for the whole exchange
    pub deadline: Duration,
}

impl EngineRequest {
    pub fn new(operation: impl Into<String>, payload: Value, deadline: Duration) -> Self {
        Self {
            operation: operation.into(),
            payload,
            deadline,
        }
    }
}

/// Wire body sent to the engine.
#[derive(Debug, Serialize)]
pub(crate) struct OperationBody<'a> {
    pub operation: &'a str,
    pub payload: &'a Value,
}

/// Successful engine response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    /// Named outputs of the operation (image references, extracted data)
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

impl EngineResponse {
    pub fn new(outputs: Map<String, Value>) -> Self {
        Self { outputs }
    }

    /// Get a raw output value.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Get a required output value.
    pub fn require(&self, key: &str) -> EngineResult<&Value> {
        self.outputs
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| EngineError::invalid_response(format!("missing output '{key}'")))
    }

    /// Get a required string output.
    pub fn require_str(&self, key: &str) -> EngineResult<&str> {
        self.require(key)?
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::invalid_response(format!("output '{key}' is not a string")))
    }

    /// Get an optional string output.
    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).and_then(Value::as_str)
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_outputs() {
        let response: EngineResponse = serde_json::from_value(json!({
            "outputs": { "output_image": "/results/a.png", "pose": { "keypoints": [] }, "empty": "" }
        }))
        .unwrap();

        assert_eq!(response.require_str("output_image").unwrap(), "/results/a.png");
        assert!(response.require("pose").is_ok());
        assert!(response.require_str("pose").is_err());
        assert!(response.require_str("empty").is_err());
        assert!(response.require("mask").is_err());
        assert_eq!(response.optional_str("comparison_image"), None);
    }

    #[test]
    fn test_missing_outputs_field_defaults_empty() {
        let response: EngineResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.outputs.is_empty());
    }
}
