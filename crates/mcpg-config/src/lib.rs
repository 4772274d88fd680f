//! Config Loader (C2) and Custom-Schema Cache (C3).
//!
//! Turns a JSON document on stdin (or a TOML file) into a validated,
//! fully-lowered [`Config`] that the hub can act on directly: stdio
//! backends already carry their `docker run` invocation, variable
//! references are already expanded, and every gateway-level invariant
//! has been checked.

mod loader;
mod model;
mod schema;

pub use loader::{expand_string, load_from_file, load_from_stdin};
pub use mcpg_errors::ConfigError;
pub use model::{
    AllToolsMarker, BackendInputSpec, BackendSpec, Config, GatewayConfig, RawDocument, RawGateway,
    ToolsFilter,
};
pub use schema::{CustomSchemaCache, SchemaSource, acquire_gateway_schema};
