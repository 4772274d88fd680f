//! Schema acquisition/patching (§4.2 "Schema acquisition") and the
//! custom-schema cache (C3, §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcpg_errors::ConfigError;
use serde_json::{Value, json};
use tokio::sync::RwLock;

/// Well-known URL the gateway JSON Schema is published at.
pub const DEFAULT_SCHEMA_URL: &str = "https://schemas.mcp-gateway.dev/gateway-config.schema.json";

const SCHEMA_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal Draft-7 schema baseline, embedded so the gateway has a schema
/// to validate against even if the remote copy cannot be fetched or the
/// caller explicitly requests the embedded form via [`SchemaSource::Embedded`].
pub const EMBEDDED_GATEWAY_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "required": ["gateway"],
  "properties": {
    "mcpServers": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "required": ["type"],
        "properties": {
          "type": { "type": "string" },
          "container": { "type": "string" },
          "entrypoint": { "type": "string" },
          "entrypointArgs": { "type": "array", "items": { "type": "string" } },
          "mounts": { "type": "array", "items": { "type": "string" } },
          "env": { "type": "object" },
          "url": { "type": "string" },
          "headers": { "type": "object" },
          "tools": { "type": "array", "items": { "type": "string" } }
        }
      }
    },
    "gateway": {
      "type": "object",
      "required": ["port", "apiKey", "domain"],
      "properties": {
        "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
        "apiKey": { "type": "string" },
        "domain": { "type": "string" },
        "startupTimeout": { "type": "integer", "minimum": 1 },
        "toolTimeout": { "type": "integer", "minimum": 1 }
      }
    },
    "customSchemas": {
      "type": "object",
      "patternProperties": {
        "^(?!stdio$)(?!http$)[a-z][a-z0-9-]*$": { "type": "string" }
      }
    },
    "enableDifc": { "type": "boolean" }
  },
  "definitions": {
    "customServerConfig": {
      "type": "object",
      "required": ["type"],
      "properties": {
        "type": { "enum": ["stdio", "http"] },
        "container": { "type": "string" },
        "entrypoint": { "type": "string" },
        "entrypointArgs": { "type": "array", "items": { "type": "string" } },
        "mounts": { "type": "array", "items": { "type": "string" } },
        "env": { "type": "object" },
        "url": { "type": "string" },
        "headers": { "type": "object" },
        "tools": { "type": "array", "items": { "type": "string" } }
      }
    }
  }
}"#;

/// Where to obtain the gateway JSON Schema from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Fetch from the given URL (10s timeout), falling back to the
    /// embedded baseline if the fetch fails.
    Remote(String),
    /// Use the embedded baseline unconditionally (used by tests and by
    /// operators running fully offline).
    Embedded,
}

impl Default for SchemaSource {
    fn default() -> Self {
        SchemaSource::Remote(DEFAULT_SCHEMA_URL.to_string())
    }
}

/// Fetches (if remote) and patches the gateway JSON Schema.
pub async fn acquire_gateway_schema(source: &SchemaSource) -> Result<Value, ConfigError> {
    let mut schema = match source {
        SchemaSource::Embedded => parse_embedded()?,
        SchemaSource::Remote(url) => match fetch_remote(url).await {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(url = %url, "gateway schema fetch failed, falling back to embedded baseline");
                parse_embedded()?
            }
        },
    };
    patch_schema(&mut schema);
    Ok(schema)
}

fn parse_embedded() -> Result<Value, ConfigError> {
    serde_json::from_str(EMBEDDED_GATEWAY_SCHEMA).map_err(|e| ConfigError::Json(e.to_string()))
}

async fn fetch_remote(url: &str) -> Result<Value, ConfigError> {
    let client = reqwest::Client::new();
    let fetch = async {
        client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json::<Value>()
            .await
            .map_err(|e| e.to_string())
    };

    match tokio::time::timeout(SCHEMA_FETCH_TIMEOUT, fetch).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(ConfigError::SchemaFetch {
            url: url.to_string(),
            message,
        }),
        Err(_) => Err(ConfigError::SchemaFetch {
            url: url.to_string(),
            message: format!("timed out after {}s", SCHEMA_FETCH_TIMEOUT.as_secs()),
        }),
    }
}

/// Applies the two Draft-7 workarounds described in §4.2:
///
/// - `customServerConfig.type` becomes `{"not": {"enum": ["stdio", "http"]}}`
///   (this is only meaningful when validating a *custom*-typed backend
///   entry against the base schema; the reserved-name assertion itself is
///   reasserted in code, see [`crate::loader::reject_reserved_custom_type`]).
/// - any `patternProperties` key containing `(?!` is replaced with
///   `^[a-z][a-z0-9-]*$`.
pub fn patch_schema(value: &mut Value) {
    patch_custom_server_config_type(value);
    patch_pattern_properties(value);
}

fn patch_custom_server_config_type(value: &mut Value) {
    if let Value::Object(map) = value {
        if let Some(Value::Object(inner)) = map.get_mut("customServerConfig") {
            if let Some(Value::Object(props)) = inner.get_mut("properties") {
                if props.contains_key("type") {
                    props.insert(
                        "type".to_string(),
                        json!({"not": {"enum": ["stdio", "http"]}}),
                    );
                }
            }
        }
        for child in map.values_mut() {
            patch_custom_server_config_type(child);
        }
    } else if let Value::Array(items) = value {
        for child in items.iter_mut() {
            patch_custom_server_config_type(child);
        }
    }
}

fn patch_pattern_properties(value: &mut Value) {
    if let Value::Object(map) = value {
        if let Some(Value::Object(pattern_props)) = map.get_mut("patternProperties") {
            let lookahead_keys: Vec<String> = pattern_props
                .keys()
                .filter(|k| k.contains("(?!"))
                .cloned()
                .collect();
            for key in lookahead_keys {
                if let Some(sub_schema) = pattern_props.remove(&key) {
                    pattern_props.insert("^[a-z][a-z0-9-]*$".to_string(), sub_schema);
                }
            }
        }
        for child in map.values_mut() {
            patch_pattern_properties(child);
        }
    } else if let Value::Array(items) = value {
        for child in items.iter_mut() {
            patch_pattern_properties(child);
        }
    }
}

/// Process-wide cache of custom backend-type schemas, keyed by URL
/// (§4.3). An empty URL is a sentinel meaning "no validation required".
#[derive(Default)]
pub struct CustomSchemaCache {
    inner: RwLock<HashMap<String, Arc<Value>>>,
}

impl CustomSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stdio` and `http` can never be registered as custom type names.
    pub fn reject_reserved_name(type_name: &str) -> Result<(), ConfigError> {
        if type_name == "stdio" || type_name == "http" {
            return Err(mcpg_errors::ValidationError::new(
                "customSchemas",
                format!("'{type_name}' is a reserved type name and cannot be registered"),
                format!("$.customSchemas.{type_name}"),
                "choose a different custom type name; 'stdio' and 'http' are reserved",
            )
            .into());
        }
        Ok(())
    }

    /// Looks up (fetching and caching on miss) the schema for `schema_url`.
    /// An empty URL short-circuits to `Ok(None)` ("skip validation").
    pub async fn get_or_fetch(&self, schema_url: &str) -> Result<Option<Arc<Value>>, ConfigError> {
        if schema_url.is_empty() {
            return Ok(None);
        }

        if let Some(cached) = self.inner.read().await.get(schema_url) {
            return Ok(Some(cached.clone()));
        }

        let fetched = Arc::new(fetch_remote(schema_url).await?);
        self.inner
            .write()
            .await
            .insert(schema_url.to_string(), fetched.clone());
        Ok(Some(fetched))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
