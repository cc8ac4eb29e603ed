use serde::{Deserialize, Serialize};

/// One request line on the wire.  The payload shape depends on `type`; unused
/// payloads are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { kind: kind.into(), payload }
    }
}

/// One response line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            kind: "response".to_string(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            kind: "response".to_string(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

fn default_conversation() -> String {
    "cli".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParams {
    pub message: String,
    #[serde(default = "default_conversation")]
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearParams {
    #[serde(default = "default_conversation")]
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub model: String,
    /// Interface flags: "configured" or "not set", keyed by front-end.
    pub discord: String,
    pub active_timers: usize,
    pub connected_clients: usize,
    pub uptime_secs: u64,
}

// ── Tests ────────────────────────────────────────────────────────────────────
