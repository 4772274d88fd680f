//! Structured errors and validation rules shared by the gateway crates.
//!
//! This crate is the narrow seam between the core and any front server:
//! every fallible boundary in `mcpg-config` and `mcpg-hub` resolves to one
//! of the four kinds defined here (`ConfigError`, `TransportError`,
//! `RpcError`, `OperationalResult`).

mod operational;
mod rpc;
mod transport;
mod validation;

pub use operational::OperationalResult;
pub use rpc::RpcError;
pub use transport::{TransportError, classify_connect_error};
pub use validation::{ValidationError, mount_format, port_range, timeout_positive};

/// Errors produced while loading or validating gateway configuration.
///
/// Fail-fast: the first error encountered aborts the load and is returned
/// as-is. There is no "partial configuration" outcome.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ConfigError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("failed to read configuration input: {0}")]
    Io(String),

    #[error("failed to parse configuration as JSON: {0}")]
    Json(String),

    #[error("failed to parse configuration as TOML: {0}")]
    Toml(String),

    #[error("schema fetch failed for {url}: {message}")]
    SchemaFetch { url: String, message: String },

    #[error("schema validation failed at {json_path}: {message}")]
    SchemaValidation { json_path: String, message: String },
}
