//! MCP Connection (C4): one live channel to a single backend.
//!
//! A stdio backend is a child process speaking JSON-RPC over stdin/stdout,
//! managed through `rmcp`. An HTTP backend is reached through a three-rung
//! transport ladder: streamable HTTP first, falling back to SSE, falling
//! back to plain JSON-RPC POST. Each rung is tried in order; the first one
//! that completes an MCP handshake wins.

use std::collections::HashMap;
use std::time::Duration;

use mcpg_config::BackendSpec;
use mcpg_errors::{RpcError, TransportError, classify_connect_error};
use rmcp::RoleClient;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, PaginatedRequestParam,
    ReadResourceRequestParam, Tool,
};
use rmcp::service::{RunningService, ServiceExt};
use serde_json::Value;
use tokio::process::Command;

use crate::http_rung::{PlainJsonRpcClient, SseClient};
use crate::ssrf::preflight_http_url;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// A live channel to one backend. Dropping a connection does not shut it
/// down gracefully; call [`Connection::shutdown`] explicitly.
pub enum Connection {
    Stdio {
        service: RunningService<RoleClient, ()>,
        child: Box<tokio::process::Child>,
    },
    HttpStreamable {
        service: RunningService<RoleClient, ()>,
    },
    HttpSse(SseClient),
    HttpPlain(PlainJsonRpcClient),
}

impl Connection {
    pub async fn connect(backend_id: &str, spec: &BackendSpec) -> Result<Self, TransportError> {
        match spec {
            BackendSpec::Stdio { command, args, env, .. } => {
                Self::connect_stdio(backend_id, command, args, env).await
            }
            BackendSpec::Http { url, headers, .. } => {
                Self::connect_http(backend_id, url, headers).await
            }
        }
    }

    async fn connect_stdio(
        backend_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.envs(env);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TransportError::ChildSpawnFailed {
            backend: backend_id.to_string(),
            message: e.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::EarlyEof { backend: backend_id.to_string() })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::EarlyEof { backend: backend_id.to_string() })?;

        if let Some(mut stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut sink = tokio::io::sink();
                let _ = tokio::io::copy(&mut stderr, &mut sink).await;
            });
        }

        let service = ().serve((stdout, stdin)).await.map_err(|e| {
            TransportError::ChildSpawnFailed {
                backend: backend_id.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Connection::Stdio {
            service,
            child: Box::new(child),
        })
    }

    async fn connect_http(
        backend_id: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        preflight_http_url(backend_id, url)?;

        // The SDK's streamable and SSE transports have no way to carry
        // custom headers, so a backend declaring any forces plain JSON-RPC
        // as the only rung tried.
        if !headers.is_empty() {
            tracing::debug!(backend = %backend_id, "custom headers declared, skipping SDK transports for plain JSON-RPC");
            return PlainJsonRpcClient::connect(backend_id, url, headers)
                .await
                .map(Connection::HttpPlain);
        }

        match Self::try_streamable(backend_id, url).await {
            Ok(conn) => return Ok(conn),
            Err(streamable_err) => {
                tracing::debug!(backend = %backend_id, error = %streamable_err, "streamable HTTP rung failed, trying SSE");

                match SseClient::connect(backend_id, url, headers).await {
                    Ok(client) => return Ok(Connection::HttpSse(client)),
                    Err(sse_err) => {
                        tracing::debug!(backend = %backend_id, error = %sse_err, "SSE rung failed, trying plain JSON-RPC");

                        match PlainJsonRpcClient::connect(backend_id, url, headers).await {
                            Ok(client) => Ok(Connection::HttpPlain(client)),
                            Err(plain_err) => Err(TransportError::AllTransportsFailed {
                                backend: backend_id.to_string(),
                                transport: "streamable+sse+plain",
                                message: format!(
                                    "streamable: {streamable_err}; sse: {sse_err}; plain: {plain_err}"
                                ),
                            }),
                        }
                    }
                }
            }
        }
    }

    async fn try_streamable(backend_id: &str, url: &str) -> Result<Self, TransportError> {
        use rmcp::transport::StreamableHttpClientTransport;

        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let service: RunningService<RoleClient, ()> = ().serve(transport).await.map_err(|e| {
            classify_connect_error(backend_id, url, &e.to_string())
        })?;
        Ok(Connection::HttpStreamable { service })
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, RpcError> {
        match self {
            Connection::Stdio { service, .. } | Connection::HttpStreamable { service } => service
                .list_tools(None)
                .await
                .map(|r| r.tools)
                .map_err(|e| RpcError::internal(e.to_string())),
            Connection::HttpSse(client) => client.list_tools().await,
            Connection::HttpPlain(client) => client.list_tools().await,
        }
    }

    pub async fn call_tool(&self, mut request: CallToolRequestParam) -> Result<CallToolResult, RpcError> {
        if request.arguments.is_none() {
            request.arguments = Some(serde_json::Map::new());
        }
        match self {
            Connection::Stdio { service, .. } | Connection::HttpStreamable { service } => service
                .call_tool(request)
                .await
                .map_err(|e| RpcError::internal(e.to_string())),
            Connection::HttpSse(client) => client.call_tool(request).await,
            Connection::HttpPlain(client) => client.call_tool(request).await,
        }
    }

    /// A single JSON-RPC 2.0 request/response round trip for any of
    /// `tools/list`, `tools/call`, `resources/list`, `resources/read`,
    /// `prompts/list`, `prompts/get`. SDK-backed transports route to their
    /// typed methods; plain-JSON and SSE marshal a JSON-RPC envelope
    /// directly. `tools/call` params missing or null `arguments` are
    /// filled with an empty object before send, per the MCP protocol.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match self {
            Connection::Stdio { service, .. } | Connection::HttpStreamable { service } => {
                send_request_via_service(service, method, params).await
            }
            Connection::HttpSse(client) => client.send_request(method, params).await,
            Connection::HttpPlain(client) => client.send_request(method, params).await,
        }
    }

    pub async fn shutdown(self) {
        match self {
            Connection::Stdio { service, mut child } => {
                let _ = service.cancel().await;
                match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        tracing::debug!(error = %error, "failed to wait on backend child process");
                    }
                    Err(_) => {
                        let _ = child.kill().await;
                    }
                }
            }
            Connection::HttpStreamable { service } => {
                let _ = service.cancel().await;
            }
            Connection::HttpSse(client) => client.close().await,
            Connection::HttpPlain(_) => {}
        }
    }
}

/// Dispatches a generic `send_request` call onto an SDK-backed
/// `RunningService`'s typed methods, converting `params`/the result
/// through `serde_json::Value` at the boundary.
async fn send_request_via_service(
    service: &RunningService<RoleClient, ()>,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let to_value = |result: Result<Value, String>| result.map_err(RpcError::internal);

    match method {
        "tools/list" => {
            let result = service.list_tools(None).await.map_err(|e| RpcError::internal(e.to_string()))?;
            to_value(serde_json::to_value(result).map_err(|e| e.to_string()))
        }
        "tools/call" => {
            let mut request: CallToolRequestParam = serde_json::from_value(params)
                .map_err(|e| RpcError::internal(format!("malformed tools/call params: {e}")))?;
            if request.arguments.is_none() {
                request.arguments = Some(serde_json::Map::new());
            }
            let result = service
                .call_tool(request)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            to_value(serde_json::to_value(result).map_err(|e| e.to_string()))
        }
        "resources/list" => {
            let request: PaginatedRequestParam = if params.is_null() {
                Default::default()
            } else {
                serde_json::from_value(params)
                    .map_err(|e| RpcError::internal(format!("malformed resources/list params: {e}")))?
            };
            let result = service
                .list_resources(request)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            to_value(serde_json::to_value(result).map_err(|e| e.to_string()))
        }
        "resources/read" => {
            let request: ReadResourceRequestParam = serde_json::from_value(params)
                .map_err(|e| RpcError::internal(format!("malformed resources/read params: {e}")))?;
            let result = service
                .read_resource(request)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            to_value(serde_json::to_value(result).map_err(|e| e.to_string()))
        }
        "prompts/list" => {
            let request: Option<PaginatedRequestParam> = if params.is_null() {
                None
            } else {
                serde_json::from_value(params)
                    .map_err(|e| RpcError::internal(format!("malformed prompts/list params: {e}")))?
            };
            let result = service
                .list_prompts(request)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            to_value(serde_json::to_value(result).map_err(|e| e.to_string()))
        }
        "prompts/get" => {
            let request: GetPromptRequestParam = serde_json::from_value(params)
                .map_err(|e| RpcError::internal(format!("malformed prompts/get params: {e}")))?;
            let result = service
                .get_prompt(request)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            to_value(serde_json::to_value(result).map_err(|e| e.to_string()))
        }
        other => Err(RpcError::internal(format!("unsupported method '{other}'"))),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
