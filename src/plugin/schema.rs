//! Schema generation for registered callables.
//!
//! Rust has no runtime reflection, so schemas are assembled from
//! per-parameter fragments supplied at registration time (generated with
//! `schemars` for typed parameters). The provider strips parameters that
//! receive the request id and applies the serialized-member patch before
//! a schema leaves the process.

use crate::plugin::invoker::{ParamKind, ParamSpec};
use schemars::JsonSchema;
use serde_json::{Map, Value, json};
use std::fmt;

/// Produces input and output JSON schemas for a callable.
pub trait SchemaProvider: Send + Sync + fmt::Debug {
    /// Object schema over the callable's input parameters. Parameters
    /// marked as request-id carriers must not appear.
    fn input_schema(&self, params: &[ParamSpec]) -> Value;

    /// Output schema for a declared result type, if any.
    fn output_schema(&self, declared: Option<&Value>) -> Option<Value>;
}

/// JSON-schema fragment for a typed parameter.
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}))
}

/// Default provider assembling object schemas from `schemars` fragments.
#[derive(Debug, Default)]
pub struct SchemarsProvider;

impl SchemaProvider for SchemarsProvider {
    fn input_schema(&self, params: &[ParamSpec]) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in params {
            // The request id is injected by the dispatcher; the model
            // never sees the parameter.
            if param.kind == ParamKind::RequestId {
                continue;
            }
            let mut fragment = param.schema.clone();
            strip_meta_schema_keys(&mut fragment);
            properties.insert(param.name.clone(), fragment);
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        patch_serialized_member(&mut schema);
        schema
    }

    fn output_schema(&self, declared: Option<&Value>) -> Option<Value> {
        declared.map(|schema| {
            let mut schema = schema.clone();
            strip_meta_schema_keys(&mut schema);
            patch_serialized_member(&mut schema);
            schema
        })
    }
}

/// Drop `$schema` and `title` noise from a generated fragment so the
/// embedded property schemas stay small.
fn strip_meta_schema_keys(schema: &mut Value) {
    if let Value::Object(map) = schema {
        map.remove("$schema");
        map.remove("title");
    }
}

/// Remove the over-constrained `type: object` from the serialized-member
/// definition's `value` property, so the field accepts any JSON value.
pub fn patch_serialized_member(schema: &mut Value) {
    for defs_key in ["$defs", "definitions"] {
        let Some(defs) = schema.get_mut(defs_key).and_then(Value::as_object_mut) else {
            continue;
        };
        for (name, definition) in defs.iter_mut() {
            if !name.contains("SerializedMember") {
                continue;
            }
            if let Some(value_prop) = definition
                .get_mut("properties")
                .and_then(|p| p.get_mut("value"))
                .and_then(Value::as_object_mut)
                && value_prop.get("type") == Some(&Value::String("object".to_string()))
            {
                value_prop.remove("type");
            }
        }
    }
}
