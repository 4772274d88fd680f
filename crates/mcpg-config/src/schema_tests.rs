use super::*;
use serde_json::json;

#[test]
fn patch_rewrites_custom_server_config_type() {
    let mut schema = json!({
        "definitions": {
            "customServerConfig": {
                "properties": {
                    "type": { "enum": ["stdio", "http"] }
                }
            }
        }
    });
    patch_schema(&mut schema);
    let patched_type = &schema["definitions"]["customServerConfig"]["properties"]["type"];
    assert_eq!(patched_type, &json!({"not": {"enum": ["stdio", "http"]}}));
}

#[test]
fn patch_rewrites_lookahead_pattern_properties_key() {
    let mut schema = json!({
        "customSchemas": {
            "patternProperties": {
                "^(?!stdio$)(?!http$)[a-z][a-z0-9-]*$": { "type": "string" }
            }
        }
    });
    patch_schema(&mut schema);
    let pattern_props = schema["customSchemas"]["patternProperties"]
        .as_object()
        .unwrap();
    assert!(pattern_props.contains_key("^[a-z][a-z0-9-]*$"));
    assert!(!pattern_props.keys().any(|k| k.contains("(?!")));
}

#[test]
fn embedded_schema_parses_and_patches_cleanly() {
    let mut schema = parse_embedded().expect("embedded schema must parse");
    patch_schema(&mut schema);
    assert!(schema.is_object());
}

#[test]
fn reject_reserved_name_rejects_stdio_and_http() {
    assert!(CustomSchemaCache::reject_reserved_name("stdio").is_err());
    assert!(CustomSchemaCache::reject_reserved_name("http").is_err());
    assert!(CustomSchemaCache::reject_reserved_name("my-custom-type").is_ok());
}

#[tokio::test]
async fn empty_url_short_circuits_to_no_validation() {
    let cache = CustomSchemaCache::new();
    let result = cache.get_or_fetch("").await.unwrap();
    assert!(result.is_none());
    assert_eq!(cache.len().await, 0);
}
