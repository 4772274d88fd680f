/// A JSON-RPC 2.0 `error` object, surfaced verbatim to the caller (never
/// retried — see §7 kind 3, "RPC error").
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// The `-32603` "Internal error" code this crate synthesizes when a
    /// backend returns a malformed or missing JSON-RPC envelope.
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }

    pub fn http_status(status: u16, reason: &str, body: impl Into<serde_json::Value>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            message: format!("HTTP {status}: {reason}"),
            data: Some(body.into()),
        }
    }
}
