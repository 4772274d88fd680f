//! Validated, post-lowering configuration types (§3 Data Model).

use std::collections::HashMap;

/// Process-wide, immutable-after-load gateway configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub servers: HashMap<String, BackendSpec>,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub enable_difc: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    pub port: u16,
    pub api_key: String,
    pub domain: String,
    #[serde(default = "default_startup_timeout_s")]
    pub startup_timeout_s: u64,
    #[serde(default = "default_tool_timeout_s")]
    pub tool_timeout_s: u64,
}

pub fn default_startup_timeout_s() -> u64 {
    60
}

pub fn default_tool_timeout_s() -> u64 {
    120
}

/// Which tools a client may call on a backend. `All` serializes as `["*"]`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ToolsFilter {
    All(AllToolsMarker),
    Named(Vec<String>),
}

/// Marker so `ToolsFilter::All` round-trips as the single-element array `["*"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllToolsMarker;

impl serde::Serialize for AllToolsMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(1))?;
        seq.serialize_element("*")?;
        seq.end()
    }
}

impl<'de> serde::Deserialize<'de> for AllToolsMarker {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items: Vec<String> = serde::Deserialize::deserialize(deserializer)?;
        if items == ["*"] {
            Ok(AllToolsMarker)
        } else {
            Err(serde::de::Error::custom("expected exactly [\"*\"]"))
        }
    }
}

impl Default for ToolsFilter {
    fn default() -> Self {
        ToolsFilter::All(AllToolsMarker)
    }
}

/// A single configured backend, post-lowering: exactly one variant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum BackendSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        tools_filter: ToolsFilter,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
        tools_filter: ToolsFilter,
    },
}

impl BackendSpec {
    pub fn is_stdio(&self) -> bool {
        matches!(self, BackendSpec::Stdio { .. })
    }

    pub fn is_http(&self) -> bool {
        matches!(self, BackendSpec::Http { .. })
    }
}

/// The user-facing shape before stdio lowering (§3 `BackendInputSpec`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInputSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub entrypoint_args: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

impl BackendInputSpec {
    pub fn tools_filter(&self) -> ToolsFilter {
        match &self.tools {
            None => ToolsFilter::default(),
            Some(items) if items.len() == 1 && items[0] == "*" => ToolsFilter::default(),
            Some(items) => ToolsFilter::Named(items.clone()),
        }
    }
}

/// Raw, not-yet-validated top-level document (§6 stdin JSON shape).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RawDocument {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: HashMap<String, BackendInputSpec>,
    pub gateway: RawGateway,
    #[serde(default, rename = "customSchemas")]
    pub custom_schemas: HashMap<String, String>,
    #[serde(default, rename = "enableDifc")]
    pub enable_difc: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RawGateway {
    pub port: i64,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub domain: String,
    #[serde(rename = "startupTimeout")]
    pub startup_timeout: Option<i64>,
    #[serde(rename = "toolTimeout")]
    pub tool_timeout: Option<i64>,
}
