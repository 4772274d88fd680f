//! Connection Pool (C5): keyed by `(backend_id, session_id)`.
//!
//! stdio backends are stateful — each session gets its own warm child
//! process — so they key on the caller's session id. HTTP backends are
//! stateless and shared across every caller, so they always key on
//! `session_id: None`. A background cleanup loop evicts idle, repeatedly
//! failing, or explicitly closed connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mcpg_config::{BackendSpec, Config};
use mcpg_errors::{RpcError, TransportError};
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;

const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_ERROR_COUNT: u32 = 10;
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub backend_id: String,
    pub session_id: Option<String>,
}

/// Lifecycle state of a pooled slot (§3 `ConnectionMetadata`). `Idle` is
/// derived at observation time from `last_used_at`, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Idle,
    Closed,
}

/// A point-in-time snapshot of a pooled slot, for observability only —
/// mutating it has no effect on the pool.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub request_count: u64,
    pub error_count: u32,
    pub state: ConnectionState,
}

/// A single pooled slot. Calls are serialized through `connection`'s
/// mutex: one in-flight request per slot at a time.
pub struct PooledConnection {
    connection: Mutex<Connection>,
    created_at: Instant,
    last_used: std::sync::Mutex<Instant>,
    request_count: AtomicU64,
    error_count: AtomicU32,
    closed: AtomicBool,
}

impl PooledConnection {
    fn new(connection: Connection, created_at: Option<Instant>) -> Self {
        let now = Instant::now();
        Self {
            connection: Mutex::new(connection),
            created_at: created_at.unwrap_or(now),
            last_used: std::sync::Mutex::new(now),
            request_count: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Records a use: bumps `request_count` and refreshes `last_used_at`.
    fn touch(&self) {
        *self.last_used.lock().expect("lease clock poisoned") = Instant::now();
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(*self.last_used.lock().expect("lease clock poisoned")) >= ttl
    }

    fn is_unhealthy(&self, max_error_count: u32) -> bool {
        self.error_count.load(Ordering::Relaxed) >= max_error_count
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Increments `error_count`. Errors accumulate for the slot's lifetime;
    /// nothing resets the counter short of eviction and recreation.
    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    fn metadata(&self, now: Instant, idle_ttl: Duration) -> ConnectionMetadata {
        let state = if self.is_closed() {
            ConnectionState::Closed
        } else if self.is_idle(now, idle_ttl) {
            ConnectionState::Idle
        } else {
            ConnectionState::Active
        };
        ConnectionMetadata {
            created_at: self.created_at,
            last_used_at: *self.last_used.lock().expect("lease clock poisoned"),
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            state,
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, RpcError> {
        self.touch();
        let guard = self.connection.lock().await;
        let result = guard.list_tools().await;
        if result.is_err() {
            self.record_error();
        }
        result
    }

    pub async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult, RpcError> {
        self.touch();
        let guard = self.connection.lock().await;
        let result = guard.call_tool(request).await;
        if result.is_err() {
            self.record_error();
        }
        result
    }
}

pub struct ConnectionPool {
    config: Arc<Config>,
    connections: RwLock<HashMap<ConnectionKey, Arc<PooledConnection>>>,
    cleanup_cancel: CancellationToken,
    idle_ttl: Duration,
    cleanup_interval: Duration,
    max_error_count: u32,
}

impl ConnectionPool {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_thresholds(config, DEFAULT_IDLE_TTL, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_ERROR_COUNT)
    }

    /// Same as [`Self::new`] but with explicit eviction thresholds, for
    /// exercising cleanup behavior on a test-friendly timescale.
    pub fn with_thresholds(
        config: Arc<Config>,
        idle_ttl: Duration,
        cleanup_interval: Duration,
        max_error_count: u32,
    ) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            cleanup_cancel: CancellationToken::new(),
            idle_ttl,
            cleanup_interval,
            max_error_count,
        }
    }

    fn key_for(&self, backend_id: &str, session_id: Option<&str>, spec: &BackendSpec) -> ConnectionKey {
        let session_id = match spec {
            BackendSpec::Stdio { .. } => session_id.map(str::to_string),
            BackendSpec::Http { .. } => None,
        };
        ConnectionKey {
            backend_id: backend_id.to_string(),
            session_id,
        }
    }

    fn spec_for(&self, backend_id: &str) -> Result<&BackendSpec, TransportError> {
        self.config
            .servers
            .get(backend_id)
            .ok_or_else(|| TransportError::HttpTransportFailed {
                backend: backend_id.to_string(),
                transport: "pool",
                message: "unknown backend".to_string(),
            })
    }

    /// `get(backend_id, session_id)`: a non-creating lookup. On hit,
    /// updates `last_used_at` and increments `request_count`; a `Closed`
    /// slot is never returned.
    pub async fn get(&self, backend_id: &str, session_id: Option<&str>) -> Option<Arc<PooledConnection>> {
        let spec = self.spec_for(backend_id).ok()?;
        let key = self.key_for(backend_id, session_id, spec);
        let guard = self.connections.read().await;
        let existing = guard.get(&key)?;
        if existing.is_closed() {
            return None;
        }
        existing.touch();
        Some(existing.clone())
    }

    /// `set(backend_id, session_id, conn)`: inserts or overwrites,
    /// preserving `created_at` across an overwrite and resetting state to
    /// `Active`.
    pub async fn set(
        &self,
        backend_id: &str,
        session_id: Option<&str>,
        connection: Connection,
    ) -> Result<Arc<PooledConnection>, TransportError> {
        let spec = self.spec_for(backend_id)?;
        let key = self.key_for(backend_id, session_id, spec);
        let mut guard = self.connections.write().await;
        let created_at = guard.get(&key).map(|existing| existing.created_at);
        let pooled = Arc::new(PooledConnection::new(connection, created_at));
        guard.insert(key, pooled.clone());
        Ok(pooled)
    }

    /// `record_error(backend_id, session_id)`: increments `error_count` if
    /// the slot is currently present. A miss is silently ignored.
    pub async fn record_error(&self, backend_id: &str, session_id: Option<&str>) {
        let Ok(spec) = self.spec_for(backend_id) else { return };
        let key = self.key_for(backend_id, session_id, spec);
        if let Some(pooled) = self.connections.read().await.get(&key) {
            pooled.record_error();
        }
    }

    /// `delete(backend_id, session_id)`: removes the slot, marks it
    /// `Closed`, and shuts down the underlying connection if this was the
    /// last reference to it.
    pub async fn delete(&self, backend_id: &str, session_id: Option<&str>) {
        let Ok(spec) = self.spec_for(backend_id) else { return };
        let key = self.key_for(backend_id, session_id, spec);
        let removed = self.connections.write().await.remove(&key);
        if let Some(pooled) = removed {
            close_pooled(pooled).await;
        }
    }

    /// `size()`: count of slots currently held, observability only.
    pub async fn size(&self) -> usize {
        self.connections.read().await.len()
    }

    /// `list()`: every key currently held, observability only.
    pub async fn list(&self) -> Vec<ConnectionKey> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// `get_metadata(backend_id, session_id)`: a snapshot of the slot's
    /// `ConnectionMetadata`, or `None` if absent.
    pub async fn get_metadata(&self, backend_id: &str, session_id: Option<&str>) -> Option<ConnectionMetadata> {
        let spec = self.spec_for(backend_id).ok()?;
        let key = self.key_for(backend_id, session_id, spec);
        let guard = self.connections.read().await;
        let pooled = guard.get(&key)?;
        Some(pooled.metadata(Instant::now(), self.idle_ttl))
    }

    /// Returns the pooled connection for `(backend_id, session_id)`,
    /// creating it if absent. Double-checked locking: a shared-lock fast
    /// path handles the common case; only a miss takes the exclusive lock,
    /// and the exclusive holder re-checks before connecting so concurrent
    /// misses for the same key don't spawn duplicate backends.
    pub async fn get_or_create(
        &self,
        backend_id: &str,
        session_id: Option<&str>,
    ) -> Result<Arc<PooledConnection>, TransportError> {
        if let Some(existing) = self.get(backend_id, session_id).await {
            return Ok(existing);
        }

        let spec = self.spec_for(backend_id)?;
        let key = self.key_for(backend_id, session_id, spec);
        let mut guard = self.connections.write().await;
        if let Some(existing) = guard.get(&key) {
            if !existing.is_closed() {
                existing.touch();
                return Ok(existing.clone());
            }
        }

        let spec = self.spec_for(backend_id)?;
        let connection = Connection::connect(backend_id, spec).await?;
        let pooled = Arc::new(PooledConnection::new(connection, None));
        guard.insert(key, pooled.clone());
        Ok(pooled)
    }

    /// Evicts and shuts down every entry meeting any of: `error_count ≥
    /// max_error_count`, `now − last_used_at > idle_timeout`.
    pub async fn sweep_idle_and_unhealthy(&self) {
        let now = Instant::now();
        let stale_keys: Vec<ConnectionKey> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, pooled)| {
                    pooled.is_idle(now, self.idle_ttl) || pooled.is_unhealthy(self.max_error_count)
                })
                .map(|(key, _)| key.clone())
                .collect()
        };

        if stale_keys.is_empty() {
            return;
        }

        let mut guard = self.connections.write().await;
        let removed: Vec<Arc<PooledConnection>> = stale_keys
            .into_iter()
            .filter_map(|key| guard.remove(&key))
            .collect();
        drop(guard);

        for pooled in removed {
            close_pooled(pooled).await;
        }
    }

    /// Runs [`Self::sweep_idle_and_unhealthy`] on a fixed interval until
    /// [`Self::stop`] cancels it.
    pub async fn run_cleanup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        loop {
            tokio::select! {
                _ = self.cleanup_cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep_idle_and_unhealthy().await,
            }
        }
    }

    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<PooledConnection>> = self.connections.write().await.drain().map(|(_, v)| v).collect();
        for pooled in drained {
            close_pooled(pooled).await;
        }
    }

    /// `Pool.stop()`: cancels the cleanup loop, marks every pooled
    /// connection `Closed`, and empties the map. Idempotent.
    pub async fn stop(&self) {
        self.cleanup_cancel.cancel();
        self.shutdown_all().await;
    }
}

async fn close_pooled(pooled: Arc<PooledConnection>) {
    pooled.mark_closed();
    match Arc::try_unwrap(pooled) {
        Ok(pooled) => pooled.connection.into_inner().shutdown().await,
        Err(_) => tracing::debug!("pooled connection still in use during eviction, skipping shutdown"),
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
