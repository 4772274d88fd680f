//! MCP gateway core: connection (C4), pool (C5), launcher (C6), system
//! tools (C7), and environment probes (C8).

mod connection;
mod http_rung;
mod launcher;
mod pool;
mod probes;
mod ssrf;
mod system_tools;

use std::sync::Arc;

use mcpg_config::Config;
use tokio::task::JoinHandle;

pub use connection::Connection;
pub use launcher::Launcher;
pub use mcpg_errors::{ConfigError, OperationalResult, RpcError, TransportError, ValidationError};
pub use pool::{ConnectionKey, ConnectionMetadata, ConnectionPool, ConnectionState, PooledConnection};
pub use probes::probe_environment;
pub use system_tools::{SYSTEM_BACKEND_ID, SystemTools};

/// Owned bundle of a [`Launcher`], its built-in [`SystemTools`] backend,
/// and the background pool cleanup task. The single construction call a
/// front server needs instead of wiring `Launcher::new` and the cleanup
/// loop by hand.
pub struct GatewayHandle {
    launcher: Arc<Launcher>,
    system_tools: Arc<SystemTools>,
    cleanup_task: JoinHandle<()>,
}

impl GatewayHandle {
    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    pub fn system_tools(&self) -> &Arc<SystemTools> {
        &self.system_tools
    }

    pub fn server_ids(&self) -> Vec<&str> {
        self.launcher.server_ids()
    }

    /// Cancels the cleanup loop and closes every pooled connection.
    /// Idempotent at the pool level; calling this twice on the same
    /// handle is not supported since it consumes `self`.
    pub async fn shutdown(self) {
        self.launcher.close().await;
        let _ = self.cleanup_task.await;
    }
}

/// Builds a [`Launcher`] over `config` and starts its background pool
/// cleanup loop, returning a single handle bundling both.
pub fn start_gateway(config: Arc<Config>) -> GatewayHandle {
    let launcher = Arc::new(Launcher::new(config.clone()));
    let system_tools = Arc::new(SystemTools::new(config));
    let cleanup_task = tokio::spawn(launcher.pool().run_cleanup_loop());

    GatewayHandle {
        launcher,
        system_tools,
        cleanup_task,
    }
}
