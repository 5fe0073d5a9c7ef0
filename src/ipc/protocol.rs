//! Wire types for the JSON-lines protocol shared by the parent↔core and
//! core↔worker channels. Both channels use the identical framing.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, OrchestratorError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub verb: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

impl IpcRequest {
    pub fn new(id: impl Into<String>, verb: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            verb: verb.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcErrorPayload>,
}

impl IpcResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(IpcErrorPayload {
                code: code.as_str().to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn from_result(id: impl Into<String>, result: Result<serde_json::Value, OrchestratorError>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(e) => Self::err(id, e.code(), e.to_string()),
        }
    }
}

/// The unsolicited startup record a worker (or this core, to its parent)
/// emits once all components are initialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyRecord {
    #[serde(rename = "type")]
    pub record_type: String,
}

impl ReadyRecord {
    pub fn new() -> Self {
        Self {
            record_type: "READY".to_string(),
        }
    }

    pub fn is_ready_line(value: &serde_json::Value) -> bool {
        value.get("type").and_then(|t| t.as_str()) == Some("READY")
    }
}

impl Default for ReadyRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_ok_has_no_error_field() {
        let resp = IpcResponse::ok("1", json!({"a": 1}));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["success"], json!(true));
    }

    #[test]
    fn response_err_has_no_result_field() {
        let resp = IpcResponse::err("1", ErrorCode::NotFound, "missing");
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], json!("NOT_FOUND"));
    }

    #[test]
    fn ready_record_serializes_as_bare_type() {
        let ready = ReadyRecord::new();
        let value = serde_json::to_value(&ready).unwrap();
        assert!(ReadyRecord::is_ready_line(&value));
    }
}
