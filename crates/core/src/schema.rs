//! Compiled JSON Schema validation for on-disk documents.
//!
//! The teacher validates envelope metadata against a schema file shipped
//! under `Docs/`; this crate has no such external asset, so the schemas are
//! embedded as string constants and compiled once via [`once_cell::sync::Lazy`].

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::Value;

/// Errors produced while compiling or applying a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The embedded schema document itself failed to compile.
    #[error("schema failed to compile: {0}")]
    Compile(String),
    /// A document failed validation; each entry is a `(path, message)` pair.
    #[error("document failed schema validation: {0:?}")]
    Invalid(Vec<(String, String)>),
}

const CAPABILITY_SCHEMA: &str = r#"{
    "type": "object",
    "additionalProperties": false,
    "required": ["name"],
    "properties": {
        "name": { "type": "string", "minLength": 1 },
        "inputs": { "type": "object" },
        "outputs": { "type": "object" }
    }
}"#;

const SLA_SCHEMA: &str = r#"{
    "type": "object",
    "additionalProperties": false,
    "required": ["p95_ms", "success_rate_min"],
    "properties": {
        "p95_ms": { "type": "integer", "minimum": 1 },
        "success_rate_min": { "type": "number", "minimum": 0, "maximum": 1 }
    }
}"#;

const PRECONDITIONS_SCHEMA: &str = r#"{
    "type": "object",
    "additionalProperties": false,
    "properties": {
        "requires_network": { "type": "boolean" },
        "requires_vpn": { "type": "boolean" },
        "env": { "type": "array", "items": { "type": "string" } }
    }
}"#;

const ENDPOINT_SCHEMA: &str = r#"{
    "type": "object",
    "required": ["type"],
    "oneOf": [
        {
            "additionalProperties": false,
            "required": ["type", "url", "timeout_ms"],
            "properties": {
                "type": { "const": "http" },
                "url": { "type": "string", "minLength": 1 },
                "timeout_ms": { "type": "integer", "minimum": 1 }
            }
        },
        {
            "additionalProperties": false,
            "required": ["type", "script", "timeout_ms"],
            "properties": {
                "type": { "const": "rpa" },
                "script": { "type": "string", "minLength": 1 },
                "timeout_ms": { "type": "integer", "minimum": 1 }
            }
        }
    ]
}"#;

const TOOL_SCHEMA_TEMPLATE: &str = r#"{
    "type": "object",
    "additionalProperties": false,
    "required": ["id", "name", "version", "capabilities"],
    "properties": {
        "id": { "type": "string", "minLength": 1 },
        "name": { "type": "string", "minLength": 1 },
        "version": { "type": "string", "minLength": 1 },
        "description": { "type": "string" },
        "capabilities": {
            "type": "array",
            "minItems": 1,
            "items": __CAPABILITY__
        },
        "cost_estimate": { "type": "number", "minimum": 0 },
        "sla": __SLA__,
        "preconditions": __PRECONDITIONS__,
        "endpoint": __ENDPOINT__
    }
}"#;

fn tool_schema_json() -> Value {
    let text = TOOL_SCHEMA_TEMPLATE
        .replace("__CAPABILITY__", CAPABILITY_SCHEMA)
        .replace("__SLA__", SLA_SCHEMA)
        .replace("__PRECONDITIONS__", PRECONDITIONS_SCHEMA)
        .replace("__ENDPOINT__", ENDPOINT_SCHEMA);
    serde_json::from_str(&text).expect("embedded tool schema is valid JSON")
}

fn registry_schema_json() -> Value {
    let tool = tool_schema_json();
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["tools", "updatedAt"],
        "properties": {
            "tools": { "type": "array", "items": tool },
            "updatedAt": { "type": "string", "minLength": 1 }
        }
    })
}

static TOOL_VALIDATOR: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&tool_schema_json())
        .expect("tool schema compiles")
});

static REGISTRY_VALIDATOR: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&registry_schema_json())
        .expect("registry schema compiles")
});

fn validate_with(validator: &JSONSchema, doc: &Value) -> Result<(), SchemaError> {
    validator.validate(doc).map_err(|errors| {
        SchemaError::Invalid(
            errors.map(|e| (e.instance_path.to_string(), e.to_string())).collect(),
        )
    })
}

/// Validate a single tool document against the embedded tool schema.
pub fn validate_tool_document(doc: &Value) -> Result<(), SchemaError> {
    validate_with(&TOOL_VALIDATOR, doc)
}

/// Validate a full registry document (`{ tools: [...], updatedAt }`).
pub fn validate_registry_document(doc: &Value) -> Result<(), SchemaError> {
    validate_with(&REGISTRY_VALIDATOR, doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_tool() -> Value {
        json!({
            "id": "fast",
            "name": "Fast Search",
            "version": "1.0.0",
            "capabilities": [{ "name": "patient.search" }],
            "endpoint": { "type": "http", "url": "https://x", "timeout_ms": 3000 }
        })
    }

    #[test]
    fn accepts_minimal_valid_tool() {
        assert!(validate_tool_document(&valid_tool()).is_ok());
    }

    #[test]
    fn rejects_unknown_top_level_property() {
        let mut doc = valid_tool();
        doc.as_object_mut().unwrap().insert("bogus".into(), json!(true));
        assert!(validate_tool_document(&doc).is_err());
    }

    #[test]
    fn rejects_unknown_endpoint_property() {
        let mut doc = valid_tool();
        doc["endpoint"].as_object_mut().unwrap().insert("extra".into(), json!(1));
        assert!(validate_tool_document(&doc).is_err());
    }

    #[test]
    fn rejects_missing_capabilities() {
        let mut doc = valid_tool();
        doc.as_object_mut().unwrap().remove("capabilities");
        assert!(validate_tool_document(&doc).is_err());
    }

    #[test]
    fn rejects_empty_capabilities_array() {
        let mut doc = valid_tool();
        doc["capabilities"] = json!([]);
        assert!(validate_tool_document(&doc).is_err());
    }

    #[test]
    fn rejects_sla_with_unknown_field() {
        let mut doc = valid_tool();
        doc["sla"] = json!({ "p95_ms": 100, "success_rate_min": 0.9, "extra": 1 });
        assert!(validate_tool_document(&doc).is_err());
    }

    #[test]
    fn accepts_full_registry_document() {
        let doc = json!({ "tools": [valid_tool()], "updatedAt": "2026-01-01T00:00:00Z" });
        assert!(validate_registry_document(&doc).is_ok());
    }

    #[test]
    fn rejects_registry_with_invalid_tool() {
        let mut bad_tool = valid_tool();
        bad_tool.as_object_mut().unwrap().remove("id");
        let doc = json!({ "tools": [bad_tool], "updatedAt": "2026-01-01T00:00:00Z" });
        assert!(validate_registry_document(&doc).is_err());
    }
}
