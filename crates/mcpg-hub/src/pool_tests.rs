use super::*;
use mcpg_config::{GatewayConfig, ToolsFilter};
use std::collections::HashMap;
use std::fs;

fn write_counting_backend(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(format!("{name}.sh"));
    fs::write(
        &path,
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id"
      ;;
    *\"tools/list\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[]}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#,
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn config_with(servers: HashMap<String, BackendSpec>) -> Arc<Config> {
    Arc::new(Config {
        servers,
        gateway: GatewayConfig {
            port: 8080,
            api_key: "secret".to_string(),
            domain: "localhost".to_string(),
            startup_timeout_s: 60,
            tool_timeout_s: 120,
        },
        enable_difc: false,
    })
}

#[tokio::test]
async fn stdio_backends_get_one_connection_per_session() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "stateful");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = ConnectionPool::new(config_with(servers));

    let a1 = pool.get_or_create("fs", Some("session-a")).await.unwrap();
    let a2 = pool.get_or_create("fs", Some("session-a")).await.unwrap();
    assert!(Arc::ptr_eq(&a1, &a2), "same session should reuse its connection");

    let b1 = pool.get_or_create("fs", Some("session-b")).await.unwrap();
    assert!(
        !Arc::ptr_eq(&a1, &b1),
        "different sessions must not share a stdio connection"
    );

    pool.shutdown_all().await;
}

#[tokio::test]
async fn unknown_backend_is_rejected() {
    let pool = ConnectionPool::new(config_with(HashMap::new()));
    let result = pool.get_or_create("does-not-exist", None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn concurrent_misses_for_the_same_key_create_only_one_connection() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "race");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = Arc::new(ConnectionPool::new(config_with(servers)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.get_or_create("fs", Some("shared-session")).await.unwrap()
        }));
    }

    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap());
    }

    for window in connections.windows(2) {
        assert!(Arc::ptr_eq(&window[0], &window[1]));
    }

    pool.shutdown_all().await;
}

#[tokio::test]
async fn two_successive_gets_increase_request_count_by_exactly_two() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "counted");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = ConnectionPool::new(config_with(servers));
    pool.get_or_create("fs", Some("session-a")).await.unwrap();
    let before = pool.get_metadata("fs", Some("session-a")).await.unwrap().request_count;

    pool.get("fs", Some("session-a")).await.unwrap();
    pool.get("fs", Some("session-a")).await.unwrap();

    let after = pool.get_metadata("fs", Some("session-a")).await.unwrap().request_count;
    assert_eq!(after - before, 2);

    pool.stop().await;
}

#[tokio::test]
async fn stop_cancels_cleanup_and_empties_the_pool() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "stoppable");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = ConnectionPool::new(config_with(servers));
    pool.get_or_create("fs", Some("session-a")).await.unwrap();
    assert_eq!(pool.size().await, 1);

    pool.stop().await;

    assert_eq!(pool.size().await, 0);
    assert!(pool.get("fs", Some("session-a")).await.is_none());
}

#[tokio::test]
async fn eviction_by_idle_timeout_removes_the_entry() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "idle");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = ConnectionPool::with_thresholds(
        config_with(servers),
        Duration::from_millis(50),
        Duration::from_millis(20),
        10,
    );
    pool.get_or_create("fs", Some("s")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.sweep_idle_and_unhealthy().await;

    assert_eq!(pool.size().await, 0);
    assert!(pool.get("fs", Some("s")).await.is_none());
}

#[tokio::test]
async fn eviction_by_error_count_removes_the_entry() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "erroring");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = ConnectionPool::with_thresholds(config_with(servers), Duration::from_secs(3600), Duration::from_millis(20), 3);
    pool.get_or_create("fs", Some("s")).await.unwrap();
    for _ in 0..3 {
        pool.record_error("fs", Some("s")).await;
    }

    pool.sweep_idle_and_unhealthy().await;

    assert_eq!(pool.size().await, 0);
}

#[tokio::test]
async fn delete_removes_and_closes_a_single_entry() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_counting_backend(temp.path(), "deletable");

    let mut servers = HashMap::new();
    servers.insert(
        "fs".to_string(),
        BackendSpec::Stdio {
            command: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            env: HashMap::new(),
            tools_filter: ToolsFilter::default(),
        },
    );

    let pool = ConnectionPool::new(config_with(servers));
    pool.get_or_create("fs", Some("s")).await.unwrap();
    assert_eq!(pool.size().await, 1);

    pool.delete("fs", Some("s")).await;

    assert_eq!(pool.size().await, 0);
    assert!(pool.list().await.is_empty());
}
