//! Config Loader (C2): stdin/TOML parsing, schema validation, variable
//! expansion, pattern checks, and stdio lowering.

use std::collections::HashMap;
use std::io::Read;

use mcpg_errors::{ConfigError, ValidationError, mount_format, port_range, timeout_positive};
use regex::Regex;
use serde_json::Value;

use crate::model::{BackendInputSpec, BackendSpec, Config, GatewayConfig, RawDocument};
use crate::schema::{CustomSchemaCache, SchemaSource, acquire_gateway_schema};

const BASE_STDIO_ENV: [(&str, &str); 3] = [
    ("NO_COLOR", "1"),
    ("TERM", "dumb"),
    ("PYTHONUNBUFFERED", "1"),
];

fn container_image_re() -> Regex {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9./_-]*(:[a-zA-Z0-9_.-]+)?$").expect("valid regex")
}

fn http_url_re() -> Regex {
    Regex::new(r"^https?://.+").expect("valid regex")
}

fn var_ref_re() -> Regex {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
}

fn domain_ref_re() -> Regex {
    Regex::new(r"^\$\{[A-Za-z_][A-Za-z0-9_]*\}$").expect("valid regex")
}

/// Reads the whole of stdin, validates it, and returns a lowered [`Config`].
pub async fn load_from_stdin() -> Result<Config, ConfigError> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| ConfigError::Io(e.to_string()))?;
    load_from_json_str(&raw, &SchemaSource::default()).await
}

/// Parses a JSON document already in hand (used by [`load_from_stdin`] and
/// directly by tests / embedders that already have the bytes).
pub async fn load_from_json_str(
    raw: &str,
    schema_source: &SchemaSource,
) -> Result<Config, ConfigError> {
    let mut document: Value =
        serde_json::from_str(raw).map_err(|e| ConfigError::Json(e.to_string()))?;

    rewrite_legacy_local_type(&mut document);

    let schema = acquire_gateway_schema(schema_source).await?;
    validate_against_schema(&schema, &document)?;

    let parsed: RawDocument =
        serde_json::from_value(document.clone()).map_err(|e| ConfigError::Json(e.to_string()))?;

    validate_and_lower(parsed, &document).await
}

/// Loads a TOML-formatted configuration file. Same post-parse semantics as
/// [`load_from_stdin`]: pattern checks, variable expansion, and stdio
/// lowering are identical; only the wire format and the absence of a
/// remote JSON-Schema validation pass differ.
pub async fn load_from_file(path: &std::path::Path) -> Result<Config, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let toml_doc: TomlRawDocument =
        toml::from_str(&text).map_err(|e| ConfigError::Toml(e.to_string()))?;
    let raw = toml_doc.into_raw_document();
    let document = serde_json::to_value(&raw).map_err(|e| ConfigError::Json(e.to_string()))?;
    validate_and_lower(raw, &document).await
}

/// Rewrites `"type": "local"` to `"type": "stdio"` for backward
/// compatibility, applied before schema validation (§4.2).
fn rewrite_legacy_local_type(document: &mut Value) {
    let Some(servers) = document.get_mut("mcpServers").and_then(Value::as_object_mut) else {
        return;
    };
    for entry in servers.values_mut() {
        if let Some(obj) = entry.as_object_mut() {
            if obj.get("type").and_then(Value::as_str) == Some("local") {
                obj.insert("type".to_string(), Value::String("stdio".to_string()));
            }
        }
    }
}

fn validate_against_schema(schema: &Value, document: &Value) -> Result<(), ConfigError> {
    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .build(schema)
        .map_err(|e| ConfigError::SchemaValidation {
            json_path: "$".to_string(),
            message: format!("schema itself is invalid: {e}"),
        })?;

    if let Some(first_error) = validator.iter_errors(document).next() {
        return Err(ConfigError::SchemaValidation {
            json_path: first_error.instance_path.to_string(),
            message: first_error.to_string(),
        });
    }
    Ok(())
}

async fn validate_and_lower(raw: RawDocument, document: &Value) -> Result<Config, ConfigError> {
    for type_name in raw.custom_schemas.keys() {
        CustomSchemaCache::reject_reserved_name(type_name)?;
    }

    let startup_timeout_s = raw.gateway.startup_timeout.unwrap_or(60);
    let tool_timeout_s = raw.gateway.tool_timeout.unwrap_or(120);

    port_range(raw.gateway.port, "$.gateway.port")?;
    timeout_positive(startup_timeout_s, "startupTimeout", "$.gateway.startupTimeout")?;
    timeout_positive(tool_timeout_s, "toolTimeout", "$.gateway.toolTimeout")?;
    validate_domain(&raw.gateway.domain)?;

    let custom_cache = CustomSchemaCache::new();
    let mut servers = HashMap::new();

    for (name, input) in &raw.mcp_servers {
        reject_forbidden_command_field(document, name)?;
        let json_path = format!("$.mcpServers.{name}");

        match input.type_.as_str() {
            "stdio" => {
                servers.insert(name.clone(), lower_stdio(name, input, &json_path)?);
            }
            "http" => {
                servers.insert(name.clone(), lower_http(name, input, &json_path)?);
            }
            other => {
                let schema_url = raw.custom_schemas.get(other).ok_or_else(|| {
                    ValidationError::new(
                        "type",
                        format!("backend '{name}' declares unknown type '{other}'"),
                        json_path.clone(),
                        "register this type under customSchemas or use 'stdio'/'http'",
                    )
                })?;
                validate_custom_backend(&custom_cache, other, schema_url, input, &json_path)
                    .await?;
                servers.insert(name.clone(), lower_stdio(name, input, &json_path)?);
            }
        }
    }

    Ok(Config {
        servers,
        gateway: GatewayConfig {
            port: raw.gateway.port as u16,
            api_key: raw.gateway.api_key,
            domain: raw.gateway.domain,
            startup_timeout_s: startup_timeout_s as u64,
            tool_timeout_s: tool_timeout_s as u64,
        },
        enable_difc: raw.enable_difc,
    })
}

fn validate_domain(domain: &str) -> Result<(), ConfigError> {
    if domain == "localhost" || domain == "host.docker.internal" || domain_ref_re().is_match(domain)
    {
        Ok(())
    } else {
        Err(ValidationError::new(
            "gateway.domain",
            format!("domain '{domain}' must be 'localhost', 'host.docker.internal', or a ${{VAR}} reference"),
            "$.gateway.domain",
            "use 'localhost', 'host.docker.internal', or '${YOUR_ENV_VAR}'",
        )
        .into())
    }
}

fn reject_forbidden_command_field(document: &Value, name: &str) -> Result<(), ConfigError> {
    let has_command = document
        .get("mcpServers")
        .and_then(|v| v.get(name))
        .and_then(|v| v.get("command"))
        .is_some();

    if has_command {
        return Err(ValidationError::new(
            "command",
            format!("backend '{name}' may not declare 'command' directly"),
            format!("$.mcpServers.{name}.command"),
            "stdio backends are always lowered to a container-runtime invocation; set 'container' instead",
        )
        .into());
    }
    Ok(())
}

async fn validate_custom_backend(
    cache: &CustomSchemaCache,
    type_name: &str,
    schema_url: &str,
    input: &BackendInputSpec,
    json_path: &str,
) -> Result<(), ConfigError> {
    let Some(schema) = cache.get_or_fetch(schema_url).await.map_err(|e| match e {
        ConfigError::SchemaFetch { url, message } => ConfigError::SchemaFetch {
            url,
            message: format!("custom type '{type_name}': {message}"),
        },
        other => other,
    })?
    else {
        return Ok(());
    };

    let instance = serde_json::to_value(input).map_err(|e| ConfigError::Json(e.to_string()))?;
    validate_against_schema(&schema, &instance).map_err(|e| match e {
        ConfigError::SchemaValidation { message, .. } => ConfigError::SchemaValidation {
            json_path: json_path.to_string(),
            message: format!("custom type '{type_name}': {message}"),
        },
        other => other,
    })
}

fn lower_stdio(
    name: &str,
    input: &BackendInputSpec,
    json_path: &str,
) -> Result<BackendSpec, ConfigError> {
    let container = input.container.clone().filter(|c| !c.is_empty()).ok_or_else(|| {
        ValidationError::new(
            "container",
            format!("stdio backend '{name}' requires a non-empty 'container'"),
            format!("{json_path}.container"),
            "set 'container' to an image reference, e.g. 'ghcr.io/org/image:tag'",
        )
    })?;

    if !container_image_re().is_match(&container) {
        return Err(ValidationError::new(
            "container",
            format!("container image '{container}' does not match the expected reference pattern"),
            format!("{json_path}.container"),
            "use a reference like 'ghcr.io/org/image:tag'",
        )
        .into());
    }

    if let Some(entrypoint) = &input.entrypoint {
        if !entrypoint.is_empty() && entrypoint.trim().is_empty() {
            return Err(ValidationError::new(
                "entrypoint",
                format!("backend '{name}' entrypoint must not be whitespace-only"),
                format!("{json_path}.entrypoint"),
                "remove 'entrypoint' or set it to a real executable path",
            )
            .into());
        }
    }

    for (index, mount) in input.mounts.iter().enumerate() {
        mount_format(mount, index, &format!("{json_path}.mounts[{index}]"))?;
    }

    let expanded_env = expand_map(&input.env, &format!("{json_path}.env"))?;

    let mut args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];
    for (k, v) in BASE_STDIO_ENV {
        args.push("-e".to_string());
        args.push(format!("{k}={v}"));
    }
    if let Some(entrypoint) = &input.entrypoint {
        if !entrypoint.is_empty() {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }
    }
    for mount in &input.mounts {
        args.push("-v".to_string());
        args.push(mount.clone());
    }

    let mut env_keys: Vec<&String> = expanded_env.keys().collect();
    env_keys.sort();
    for key in env_keys {
        let value = &expanded_env[key];
        args.push("-e".to_string());
        if value.is_empty() {
            args.push(key.clone());
        } else {
            args.push(format!("{key}={value}"));
        }
    }

    args.push(container);
    args.extend(input.entrypoint_args.clone());

    Ok(BackendSpec::Stdio {
        command: "docker".to_string(),
        args,
        env: expanded_env,
        tools_filter: input.tools_filter(),
    })
}

fn lower_http(
    name: &str,
    input: &BackendInputSpec,
    json_path: &str,
) -> Result<BackendSpec, ConfigError> {
    let url = input.url.clone().filter(|u| !u.is_empty()).ok_or_else(|| {
        ValidationError::new(
            "url",
            format!("http backend '{name}' requires a non-empty 'url'"),
            format!("{json_path}.url"),
            "set 'url' to an https:// (or http://) endpoint",
        )
    })?;

    if !http_url_re().is_match(&url) {
        return Err(ValidationError::new(
            "url",
            format!("url '{url}' must match https?://..."),
            format!("{json_path}.url"),
            "use a URL like 'https://host/mcp'",
        )
        .into());
    }

    let headers = expand_map(&input.headers, &format!("{json_path}.headers"))?;

    Ok(BackendSpec::Http {
        url,
        headers,
        tools_filter: input.tools_filter(),
    })
}

/// Expands every `${NAME}` occurrence in every value of `map` against the
/// gateway process environment. The first undefined reference aborts with
/// a [`ConfigError`] naming the variable and the originating JSON path.
fn expand_map(
    map: &HashMap<String, String>,
    json_path: &str,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut expanded = HashMap::with_capacity(map.len());
    for (key, value) in map {
        expanded.insert(key.clone(), expand_string(value, &format!("{json_path}.{key}"))?);
    }
    Ok(expanded)
}

/// Expands `${NAME}` references in `input` against the process
/// environment. Literals with no `${...}` pass through unchanged
/// (idempotent for such strings).
pub fn expand_string(input: &str, json_path: &str) -> Result<String, ConfigError> {
    let re = var_ref_re();
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;

    for caps in re.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        result.push_str(&input[last_end..whole.start()]);
        match std::env::var(name) {
            Ok(value) => result.push_str(&value),
            Err(_) => {
                return Err(ValidationError::new(
                    "env",
                    format!("undefined variable reference '${{{name}}}'"),
                    json_path.to_string(),
                    format!("set the {name} environment variable before starting the gateway"),
                )
                .into());
            }
        }
        last_end = whole.end();
    }
    result.push_str(&input[last_end..]);
    Ok(result)
}

/// Mirror of [`RawDocument`] with snake_case keys, for the TOML entry
/// point (§6 "Configuration input — TOML file").
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TomlRawDocument {
    #[serde(default)]
    mcp_servers: HashMap<String, TomlBackendInputSpec>,
    gateway: TomlGateway,
    #[serde(default)]
    custom_schemas: HashMap<String, String>,
    #[serde(default)]
    enable_difc: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TomlGateway {
    port: i64,
    api_key: String,
    domain: String,
    startup_timeout: Option<i64>,
    tool_timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TomlBackendInputSpec {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    entrypoint: Option<String>,
    #[serde(default)]
    entrypoint_args: Vec<String>,
    #[serde(default)]
    mounts: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
}

impl TomlRawDocument {
    fn into_raw_document(self) -> RawDocument {
        let mcp_servers = self
            .mcp_servers
            .into_iter()
            .map(|(name, input)| {
                (
                    name,
                    BackendInputSpec {
                        type_: input.type_,
                        container: input.container,
                        entrypoint: input.entrypoint,
                        entrypoint_args: input.entrypoint_args,
                        mounts: input.mounts,
                        env: input.env,
                        url: input.url,
                        headers: input.headers,
                        tools: input.tools,
                    },
                )
            })
            .collect();

        RawDocument {
            mcp_servers,
            gateway: crate::model::RawGateway {
                port: self.gateway.port,
                api_key: self.gateway.api_key,
                domain: self.gateway.domain,
                startup_timeout: self.gateway.startup_timeout,
                tool_timeout: self.gateway.tool_timeout,
            },
            custom_schemas: self.custom_schemas,
            enable_difc: self.enable_difc,
        }
    }
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
