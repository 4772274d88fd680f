//! Environment probes (C8): startup checks that surface as errors or
//! warnings in an [`OperationalResult`] rather than panicking, so the
//! gateway can report a clear diagnosis instead of failing deep inside
//! the connection pool.

use std::path::Path;

use mcpg_config::{BackendSpec, Config};
use mcpg_errors::OperationalResult;
use regex::Regex;
use tokio::process::Command;

const REQUIRED_ENV_VARS: [&str; 3] = [
    "MCP_GATEWAY_PORT",
    "MCP_GATEWAY_DOMAIN",
    "MCP_GATEWAY_API_KEY",
];

fn container_id_re() -> Regex {
    Regex::new(r"^[a-f0-9]{12,64}$").expect("valid regex")
}

/// Runs every environment probe and merges their results.
pub async fn probe_environment(config: &Config) -> OperationalResult {
    let mut result = OperationalResult::ok();

    check_required_env_vars(&mut result);

    if config.servers.values().any(BackendSpec::is_stdio) {
        check_docker_accessible(&mut result).await;
    }

    let (is_container, container_id) = detect_containerized();
    if is_container {
        if let Some(id) = container_id {
            check_port_mapping(&id, config.gateway.port, &mut result).await;
            check_stdin_interactive(&id, &mut result).await;
            check_log_dir_mounted(&id, "/var/log/mcpg", &mut result).await;
        }
    }

    result
}

/// Parses `/proc/self/cgroup`, extracting the path segment after
/// `docker`/`containerd` if it's at least 12 hex characters. Falls back to
/// `/.dockerenv` (containerized, no id) when cgroup parsing finds nothing.
pub fn detect_containerized() -> (bool, Option<String>) {
    if let Ok(contents) = std::fs::read_to_string("/proc/self/cgroup") {
        for line in contents.lines() {
            for marker in ["docker/", "containerd/"] {
                if let Some(idx) = line.find(marker) {
                    let candidate = &line[idx + marker.len()..];
                    let id: String = candidate
                        .chars()
                        .take_while(|c| c.is_ascii_hexdigit())
                        .collect();
                    if id.len() >= 12 {
                        return (true, Some(id));
                    }
                }
            }
        }
    }

    if Path::new("/.dockerenv").exists() {
        return (true, None);
    }

    (false, None)
}

/// Verifies the container runtime's socket exists, then runs its `info`
/// command and checks the exit status.
async fn check_docker_accessible(result: &mut OperationalResult) {
    let socket_path = std::env::var("DOCKER_HOST")
        .ok()
        .and_then(|host| host.strip_prefix("unix://").map(str::to_string))
        .unwrap_or_else(|| "/var/run/docker.sock".to_string());

    if !Path::new(&socket_path).exists() {
        result.push_error(format!("docker socket not found at {socket_path}"));
        return;
    }

    match Command::new("docker").arg("info").output().await {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            result.push_error(format!(
                "docker info failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Err(e) => result.push_error(format!("failed to run docker info: {e}")),
    }
}

/// Checks that `MCP_GATEWAY_PORT`, `MCP_GATEWAY_DOMAIN`, and
/// `MCP_GATEWAY_API_KEY` are present and non-empty in the process
/// environment.
fn check_required_env_vars(result: &mut OperationalResult) {
    for name in REQUIRED_ENV_VARS {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => {}
            Ok(_) => result.push_error(format!("{name} is set but empty")),
            Err(_) => result.push_error(format!("{name} is not set")),
        }
    }
}

fn inspect_command(container_id: &str, format: &str) -> Result<Command, String> {
    if !container_id_re().is_match(container_id) {
        return Err(format!("refusing to inspect malformed container id '{container_id}'"));
    }
    let mut cmd = Command::new("docker");
    cmd.args(["inspect", "--format", format, container_id]);
    Ok(cmd)
}

/// Inspects the enclosing container and errors if `port` is not present
/// among its published ports.
async fn check_port_mapping(container_id: &str, port: u16, result: &mut OperationalResult) {
    let template = format!("{{{{(index .NetworkSettings.Ports \"{port}/tcp\")}}}}");
    let mut cmd = match inspect_command(container_id, &template) {
        Ok(cmd) => cmd,
        Err(e) => {
            result.push_error(e);
            return;
        }
    };

    match cmd.output().await {
        Ok(output) if output.status.success() => {
            let mapped = String::from_utf8_lossy(&output.stdout);
            if mapped.trim() == "<no value>" || mapped.trim().is_empty() {
                result.push_error(format!("port {port} is not published by the enclosing container"));
            }
        }
        Ok(output) => result.push_error(format!(
            "docker inspect for port mapping failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )),
        Err(e) => result.push_error(format!("failed to run docker inspect: {e}")),
    }
}

/// Errors if the enclosing container was not started with stdin open
/// (`-i`), since stdio backends require an interactive parent stream.
async fn check_stdin_interactive(container_id: &str, result: &mut OperationalResult) {
    let mut cmd = match inspect_command(container_id, "{{.Config.OpenStdin}}") {
        Ok(cmd) => cmd,
        Err(e) => {
            result.push_error(e);
            return;
        }
    };

    match cmd.output().await {
        Ok(output) if output.status.success() => {
            if String::from_utf8_lossy(&output.stdout).trim() != "true" {
                result.push_error("enclosing container was not started with stdin open (-i)".to_string());
            }
        }
        Ok(output) => result.push_error(format!(
            "docker inspect for stdin mode failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )),
        Err(e) => result.push_error(format!("failed to run docker inspect: {e}")),
    }
}

/// Warns (does not error) if `path` is not among the enclosing container's
/// bind mounts.
async fn check_log_dir_mounted(container_id: &str, path: &str, result: &mut OperationalResult) {
    let mut cmd = match inspect_command(container_id, "{{range .Mounts}}{{.Destination}}\n{{end}}") {
        Ok(cmd) => cmd,
        Err(e) => {
            result.push_warning(e);
            return;
        }
    };

    match cmd.output().await {
        Ok(output) if output.status.success() => {
            let mounts = String::from_utf8_lossy(&output.stdout);
            if !mounts.lines().any(|line| line.trim() == path) {
                result.push_warning(format!("log directory {path} is not mounted into the container"));
            }
        }
        Ok(output) => result.push_warning(format!(
            "docker inspect for mounts failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )),
        Err(e) => result.push_warning(format!("failed to run docker inspect: {e}")),
    }
}

#[cfg(test)]
#[path = "probes_tests.rs"]
mod tests;
