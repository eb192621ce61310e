//! The result type every fleet operation resolves to.
//!
//! Controllers never let errors escape their boundary; each operation
//! collapses into one `OperationResult`. Absence of a target ("stop a
//! container that is already gone") is a successful outcome carrying a
//! `not_found` status marker, not an error, which keeps stop/status
//! operations idempotent.

use rangebox_constants::status;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outcome of a single fleet operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation completed (absence of the target still counts).
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Operation payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Underlying error detail for failed operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    /// Successful outcome with a message only.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    /// Successful outcome carrying a payload.
    #[must_use]
    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    /// Successful outcome for an absent target.
    #[must_use]
    pub fn not_found(container: &str) -> Self {
        Self {
            success: true,
            message: format!("Container {container} not found"),
            data: Some(json!({
                "container": container,
                "status": status::NOT_FOUND,
            })),
            error: None,
        }
    }

    /// Failed outcome with underlying error detail.
    #[must_use]
    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// Failed outcome that still carries diagnostic payload.
    #[must_use]
    pub fn failed_with(
        message: impl Into<String>,
        error: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Some(data),
            error: Some(error.into()),
        }
    }

    /// Returns the `status` string from the payload, if present.
    #[must_use]
    pub fn status_marker(&self) -> Option<&str> {
        self.data.as_ref()?.get("status")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_success() {
        let result = OperationResult::not_found("js_3000");
        assert!(result.success);
        assert_eq!(result.status_marker(), Some(status::NOT_FOUND));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failed_keeps_payload() {
        let result = OperationResult::failed_with(
            "Failed to start container",
            "image missing",
            json!({"container": "js_3001", "port": 3001}),
        );
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("image missing"));
        assert_eq!(result.data.unwrap()["port"], 3001);
    }
}
