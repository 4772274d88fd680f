use super::*;
use mcpg_config::{BackendSpec, GatewayConfig, ToolsFilter};
use std::collections::HashMap;

fn sample_config() -> Arc<Config> {
    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "docker".to_string(),
            args: vec![],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );
    servers.insert(
        "search".to_string(),
        BackendSpec::Http {
            url: "https://example.com/mcp".to_string(),
            headers: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    Arc::new(Config {
        servers,
        gateway: GatewayConfig {
            port: 9000,
            api_key: "secret".to_string(),
            domain: "localhost".to_string(),
            startup_timeout_s: 60,
            tool_timeout_s: 120,
        },
        enable_difc: false,
    })
}

#[test]
fn list_tools_advertises_both_builtin_tools() {
    let tools = SystemTools::new(sample_config()).list_tools();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
    assert!(names.contains(&SYS_INIT_TOOL));
    assert!(names.contains(&SYS_LIST_SERVERS_TOOL));
}

#[tokio::test]
async fn sys_init_reports_every_configured_server() {
    let system = SystemTools::new(sample_config());
    let result = system
        .call_tool(CallToolRequestParam {
            name: SYS_INIT_TOOL.into(),
            arguments: None,
        })
        .await
        .unwrap();

    let text = result_text(&result);
    assert!(text.starts_with("MCPG initialized. Available servers: ["));
    assert!(text.contains("fs"));
    assert!(text.contains("search"));
}

#[tokio::test]
async fn sys_list_servers_numbers_each_backend() {
    let system = SystemTools::new(sample_config());
    let result = system
        .call_tool(CallToolRequestParam {
            name: SYS_LIST_SERVERS_TOOL.into(),
            arguments: None,
        })
        .await
        .unwrap();

    let text = result_text(&result);
    assert!(text.contains("1. fs"));
    assert!(text.contains("2. search"));
}

#[tokio::test]
async fn unknown_system_tool_is_rejected() {
    let system = SystemTools::new(sample_config());
    let result = system
        .call_tool(CallToolRequestParam {
            name: "not_a_real_tool".into(),
            arguments: None,
        })
        .await;
    assert!(result.is_err());
}

fn result_text(result: &CallToolResult) -> String {
    serde_json::to_value(result)
        .unwrap()
        .get("content")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .unwrap()
        .to_string()
}
