//! System tools (C7): a built-in pseudo-backend that answers `tools/list`
//! and `tools/call` for gateway introspection, without going through the
//! connection pool or any real backend process.

use std::sync::Arc;

use mcpg_config::Config;
use mcpg_errors::RpcError;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use serde_json::json;

/// Reserved backend id; never present in `Config::servers`.
pub const SYSTEM_BACKEND_ID: &str = "__system__";

const SYS_INIT_TOOL: &str = "sys_init";
const SYS_LIST_SERVERS_TOOL: &str = "sys_list_servers";

pub struct SystemTools {
    config: Arc<Config>,
}

impl SystemTools {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        vec![
            tool_from_json(
                SYS_INIT_TOOL,
                "Reports that the gateway has initialized and lists configured servers",
                json!({"type": "object", "properties": {}}),
            ),
            tool_from_json(
                SYS_LIST_SERVERS_TOOL,
                "Returns a numbered list of configured backend ids",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    pub async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult, RpcError> {
        match request.name.as_ref() {
            SYS_INIT_TOOL => Ok(text_result(&self.sys_init_text())),
            SYS_LIST_SERVERS_TOOL => Ok(text_result(&self.sys_list_servers_text())),
            other => Err(RpcError::internal(format!("unknown system tool '{other}'"))),
        }
    }

    fn server_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.config.servers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn sys_init_text(&self) -> String {
        format!(
            "MCPG initialized. Available servers: [{}]",
            self.server_ids().join(", ")
        )
    }

    fn sys_list_servers_text(&self) -> String {
        self.server_ids()
            .iter()
            .enumerate()
            .map(|(i, id)| format!("{}. {id}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn tool_from_json(name: &str, description: &str, input_schema: serde_json::Value) -> Tool {
    serde_json::from_value(json!({
        "name": name,
        "description": description,
        "inputSchema": input_schema,
    }))
    .expect("system tool definitions are well-formed")
}

fn text_result(text: &str) -> CallToolResult {
    serde_json::from_value(json!({
        "content": [{"type": "text", "text": text}],
    }))
    .expect("system tool results are well-formed")
}

#[cfg(test)]
#[path = "system_tools_tests.rs"]
mod tests;
