//! The two non-SDK rungs of the HTTP fallback ladder: legacy SSE framing
//! and the plain JSON-RPC-over-POST baseline. Streamable HTTP (the first
//! rung) is handled entirely by `rmcp`; these two are hand-rolled because
//! `rmcp` only speaks the current streamable-HTTP wire format.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use mcpg_errors::{RpcError, TransportError};
use reqwest::Client;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const POOL_MAX_IDLE_PER_HOST: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const ENDPOINT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Process-wide monotonic JSON-RPC request id counter, shared by every
/// HTTP-backed connection (§4.4: "a process-wide atomic monotonic
/// counter").
static REQUEST_ID_COUNTER: AtomicI64 = AtomicI64::new(1);

fn next_request_id() -> i64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Counter backing the synthesized `awmg-init-<n>` session id a plain
/// JSON-RPC connection uses until the backend supplies a real one.
static INIT_SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn synthesize_session_id() -> String {
    format!("awmg-init-{}", INIT_SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Builds the client the ladder's HTTP rungs share: 5s connect timeout so
/// a dead rung fails fast, 120s overall request timeout, and a small idle
/// connection pool (10 per host, 90s idle timeout) since most deployments
/// talk to a handful of backends.
fn build_http_client(backend: &str, transport: &'static str, default_headers: reqwest::header::HeaderMap) -> Result<Client, TransportError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .default_headers(default_headers)
        .build()
        .map_err(|e| TransportError::HttpTransportFailed {
            backend: backend.to_string(),
            transport,
            message: e.to_string(),
        })
}

fn header_map(headers: &HashMap<String, String>) -> Result<reqwest::header::HeaderMap, String> {
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("invalid header name '{key}': {e}"))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| format!("invalid header value for '{key}': {e}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Fills `params.arguments` with an empty object when a `tools/call`
/// request omits it or sends `null` (MCP protocol requirement).
fn fill_tool_call_arguments(method: &str, params: &mut Value) {
    if method != "tools/call" {
        return;
    }
    if let Some(obj) = params.as_object_mut() {
        let needs_fill = obj.get("arguments").map(Value::is_null).unwrap_or(true);
        if needs_fill {
            obj.insert("arguments".to_string(), json!({}));
        }
    }
}

fn extract_result(backend: &str, body: Value) -> Result<Value, RpcError> {
    if let Some(error) = body.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(RpcError::INTERNAL_ERROR);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("backend returned an RPC error")
            .to_string();
        return Err(RpcError {
            code,
            message: format!("{backend}: {message}"),
            data: error.get("data").cloned(),
        });
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| RpcError::internal(format!("{backend}: response had neither result nor error")))
}

/// Plain JSON-RPC over HTTP POST, no streaming: the last rung of the
/// fallback ladder. Carries a session id established on initialize,
/// since this is the rung used for backends with custom headers that
/// the SDK's session-aware transports cannot carry.
pub struct PlainJsonRpcClient {
    backend: String,
    url: String,
    client: Client,
    custom_headers: reqwest::header::HeaderMap,
    session_id: std::sync::Mutex<String>,
}

impl PlainJsonRpcClient {
    pub async fn connect(
        backend: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let custom_headers = header_map(headers).map_err(|message| TransportError::HttpTransportFailed {
            backend: backend.to_string(),
            transport: "plain",
            message,
        })?;
        let client = build_http_client(backend, "plain", reqwest::header::HeaderMap::new())?;

        let this = Self {
            backend: backend.to_string(),
            url: url.to_string(),
            client,
            custom_headers,
            session_id: std::sync::Mutex::new(synthesize_session_id()),
        };

        this.send(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "awmg", "version": "1.0.0"}
            }),
        )
        .await
        .map_err(|e| TransportError::HttpTransportFailed {
            backend: backend.to_string(),
            transport: "plain",
            message: e.to_string(),
        })?;

        Ok(this)
    }

    /// Current stored session id: the backend's `Mcp-Session-Id` response
    /// header if one was ever seen, else the synthesized temporary id.
    pub fn session_id(&self) -> String {
        self.session_id.lock().expect("session id poisoned").clone()
    }

    /// Standard request headers per §4.4: `Content-Type` (set by
    /// `.json()`), `Accept`, then all configured custom headers, then
    /// `Mcp-Session-Id` — a per-call `session_override` takes precedence
    /// over the connection-stored session id.
    async fn send_with_session(&self, method: &str, params: Value, session_override: Option<&str>) -> Result<Value, RpcError> {
        let id = next_request_id();
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let session_value = match session_override {
            Some(id) => id.to_string(),
            None => self.session_id(),
        };

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .headers(self.custom_headers.clone())
            .header(MCP_SESSION_ID_HEADER, &session_value)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| RpcError::internal(format!("{}: {e}", self.backend)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::http_status(status, &self.backend, body));
        }

        if let Some(response_session) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            *self.session_id.lock().expect("session id poisoned") = response_session;
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RpcError::internal(format!("{}: invalid JSON response: {e}", self.backend)))?;

        extract_result(&self.backend, body)
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.send_with_session(method, params, None).await
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, RpcError> {
        let result = self.send("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| RpcError::internal(format!("{}: malformed tools/list result: {e}", self.backend)))
    }

    pub async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult, RpcError> {
        let arguments = request.arguments.clone().unwrap_or_default();
        let result = self
            .send("tools/call", json!({"name": request.name, "arguments": arguments}))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::internal(format!("{}: malformed tools/call result: {e}", self.backend)))
    }

    /// Generic `send_request(method, params)`: marshals a JSON-RPC
    /// envelope for any method, including `resources/list`,
    /// `resources/read`, `prompts/list`, `prompts/get`.
    pub async fn send_request(&self, method: &str, mut params: Value) -> Result<Value, RpcError> {
        fill_tool_call_arguments(method, &mut params);
        self.send(method, params).await
    }
}

/// Legacy "HTTP+SSE" transport: a GET stream delivers an `endpoint` event
/// naming where to POST requests, then delivers `message` events carrying
/// JSON-RPC responses correlated by `id`.
pub struct SseClient {
    backend: String,
    post_url: String,
    client: Client,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>,
    reader_task: JoinHandle<()>,
}

impl SseClient {
    pub async fn connect(
        backend: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let default_headers = header_map(headers).map_err(|message| TransportError::HttpTransportFailed {
            backend: backend.to_string(),
            transport: "sse",
            message,
        })?;
        let client = build_http_client(backend, "sse", default_headers)?;

        let stream_response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::HttpTransportFailed {
                backend: backend.to_string(),
                transport: "sse",
                message: e.to_string(),
            })?;

        if !stream_response.status().is_success() {
            return Err(TransportError::HttpTransportFailed {
                backend: backend.to_string(),
                transport: "sse",
                message: format!("GET {url} returned {}", stream_response.status()),
            });
        }

        let pending: Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>> = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let task_pending = pending.clone();
        let task_backend = backend.to_string();
        let base_url = url.to_string();

        let reader_task = tokio::spawn(async move {
            let mut byte_stream = stream_response.bytes_stream();
            let mut buffer = String::new();
            let mut endpoint_tx = Some(endpoint_tx);

            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(boundary) = buffer.find("\n\n") {
                    let event_text = buffer[..boundary].to_string();
                    buffer.drain(..=boundary + 1);
                    handle_sse_event(&event_text, &base_url, &task_backend, &task_pending, &mut endpoint_tx)
                        .await;
                }
            }
        });

        let post_url = tokio::time::timeout(ENDPOINT_WAIT_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| TransportError::HttpTransportFailed {
                backend: backend.to_string(),
                transport: "sse",
                message: "timed out waiting for 'endpoint' event".to_string(),
            })?
            .map_err(|_| TransportError::HttpTransportFailed {
                backend: backend.to_string(),
                transport: "sse",
                message: "SSE stream closed before sending an 'endpoint' event".to_string(),
            })?;

        Ok(Self {
            backend: backend.to_string(),
            post_url,
            client,
            pending,
            reader_task,
        })
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.post_url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| RpcError::internal(format!("{}: {e}", self.backend)))?;

        if !response.status().is_success() {
            self.pending.lock().await.remove(&id);
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::http_status(status, &self.backend, body));
        }

        let body = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| {
                RpcError::internal(format!("{}: timed out waiting for SSE response", self.backend))
            })?
            .map_err(|_| RpcError::internal(format!("{}: SSE stream closed mid-request", self.backend)))?;

        extract_result(&self.backend, body)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, RpcError> {
        let result = self.call_raw("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| RpcError::internal(format!("{}: malformed tools/list result: {e}", self.backend)))
    }

    pub async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult, RpcError> {
        let arguments = request.arguments.clone().unwrap_or_default();
        let result = self
            .call_raw("tools/call", json!({"name": request.name, "arguments": arguments}))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::internal(format!("{}: malformed tools/call result: {e}", self.backend)))
    }

    /// Generic `send_request(method, params)`, same contract as
    /// [`PlainJsonRpcClient::send_request`].
    pub async fn send_request(&self, method: &str, mut params: Value) -> Result<Value, RpcError> {
        fill_tool_call_arguments(method, &mut params);
        self.call_raw(method, params).await
    }

    pub async fn close(self) {
        self.reader_task.abort();
    }
}

async fn handle_sse_event(
    event_text: &str,
    base_url: &str,
    backend: &str,
    pending: &Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
) {
    let mut event_name = "message".to_string();
    let mut data = String::new();

    for line in event_text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim());
        }
    }

    if data.is_empty() {
        return;
    }

    if event_name == "endpoint" {
        if let Some(tx) = endpoint_tx.take() {
            let resolved = reqwest::Url::parse(base_url)
                .and_then(|base| base.join(&data))
                .map(|u| u.to_string())
                .unwrap_or(data);
            let _ = tx.send(resolved);
        }
        return;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(&data) else {
        tracing::debug!(backend = %backend, "SSE event carried non-JSON data");
        return;
    };

    let Some(id) = parsed.get("id").and_then(Value::as_i64) else {
        return;
    };

    if let Some(tx) = pending.lock().await.remove(&id) {
        let _ = tx.send(parsed);
    }
}

#[cfg(test)]
#[path = "http_rung_tests.rs"]
mod tests;
