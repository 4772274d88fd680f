//! Launcher (C6): resolves a backend id (and, for stdio backends, a
//! session id) to a live, ready connection, creating it on demand.
//!
//! Stateless backends (HTTP) are reached through [`Launcher::get_or_launch`];
//! stateful backends (stdio) go through
//! [`Launcher::get_or_launch_for_session`], which transparently falls back
//! to the stateless path when the backend turns out not to be stdio. Both
//! ultimately delegate to the [`ConnectionPool`]'s own double-checked
//! locking, since the pool already normalizes HTTP connections to a single
//! shared slot per backend (`session_id: None`) — a second flat map here
//! would just be a second source of truth for the same slot.

use std::path::Path;
use std::sync::Arc;

use mcpg_config::{BackendSpec, Config};
use mcpg_errors::TransportError;
use tracing::{debug, warn};

use crate::pool::{ConnectionPool, PooledConnection};

const CONTAINER_CGROUP_MARKERS: [&str; 4] = ["docker", "containerd", "kubepods", "lxc"];

pub struct Launcher {
    config: Arc<Config>,
    pool: Arc<ConnectionPool>,
}

impl Launcher {
    pub fn new(config: Arc<Config>) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.clone()));
        Self { config, pool }
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.pool.clone()
    }

    /// Stateless lookup: backend id only, no session. The right entry
    /// point for HTTP backends, and the fallback target for stdio lookups
    /// whose backend turns out to be HTTP after all.
    pub async fn get_or_launch(&self, backend_id: &str) -> Result<Arc<PooledConnection>, TransportError> {
        self.pool.get_or_create(backend_id, None).await
    }

    /// Stateful lookup: backend id plus session id, for per-session stdio
    /// connections. Falls back to [`Self::get_or_launch`] if the backend is
    /// declared HTTP.
    pub async fn get_or_launch_for_session(
        &self,
        backend_id: &str,
        session_id: &str,
    ) -> Result<Arc<PooledConnection>, TransportError> {
        match self.spec_for(backend_id)? {
            BackendSpec::Http { .. } => self.get_or_launch(backend_id).await,
            BackendSpec::Stdio { command, args, .. } => {
                warn_if_unsandboxed(backend_id, command);
                probe_env_passthrough(backend_id, args);
                self.pool.get_or_create(backend_id, Some(session_id)).await
            }
        }
    }

    pub fn server_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.config.servers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn close(&self) {
        self.pool.stop().await;
    }

    fn spec_for(&self, backend_id: &str) -> Result<&BackendSpec, TransportError> {
        self.config
            .servers
            .get(backend_id)
            .ok_or_else(|| TransportError::HttpTransportFailed {
                backend: backend_id.to_string(),
                transport: "launcher",
                message: "unknown backend".to_string(),
            })
    }
}

/// True if the gateway process itself appears to be running inside a
/// container: `/.dockerenv`, a `docker|containerd|kubepods|lxc` marker in
/// `/proc/1/cgroup`, or `RUNNING_IN_CONTAINER=true`.
fn is_gateway_containerized() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    if std::env::var("RUNNING_IN_CONTAINER").as_deref() == Ok("true") {
        return true;
    }
    if let Ok(contents) = std::fs::read_to_string("/proc/1/cgroup") {
        if CONTAINER_CGROUP_MARKERS.iter().any(|marker| contents.contains(marker)) {
            return true;
        }
    }
    false
}

/// If the gateway itself is sandboxed but this backend's lowered command
/// isn't the container runtime, the backend will run with the gateway's
/// own privileges rather than in its own sandbox.
fn warn_if_unsandboxed(backend_id: &str, command: &str) {
    if is_gateway_containerized() && command != "docker" {
        warn!(
            backend = backend_id,
            command, "stdio backend will run with the gateway's own privileges, not in its own sandbox"
        );
    }
}

/// Diagnostic-only: logs, for each `-e NAME` pair in the lowered docker
/// args, whether `NAME` is present in the gateway's own environment.
/// Values are truncated to their first 10 characters before logging.
fn probe_env_passthrough(backend_id: &str, args: &[String]) {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "-e" {
            if let Some(name) = args.get(i + 1) {
                if !name.contains('=') {
                    let value = std::env::var(name).ok();
                    let present = value.is_some();
                    let preview = value.map(|v| v.chars().take(10).collect::<String>());
                    debug!(backend = backend_id, name, present, preview, "stdio env passthrough probe");
                }
            }
        }
        i += 1;
    }
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;
