// SPDX-License-Identifier: Apache-2.0

//! Recursive `x-preserve-unknown-fields` injection for legacy-shape schemas
//! (§4.3 rule 2).

use serde_json::Value;
use warden_core::error::Error;

/// The field legacy consumers look for to mean "don't strip properties this
/// schema doesn't declare" on an object-typed node.
const PRESERVE_UNKNOWN_FIELDS: &str = "x-preserve-unknown-fields";

/// Recursively marks every object-typed node (and any node with no `type`,
/// which is treated as an object) as preserving unknown fields.
///
/// Descends into `items` (array element schema), `properties` (each value
/// schema), and `additionalProperties` (once, when it is itself a schema
/// object rather than a boolean). Non-fatal warnings are appended to
/// `warnings` when a node's type is ambiguous.
pub fn default_schema_permissiveness(schema: &mut Value, warnings: &mut Vec<Error>) {
    walk(schema, "$", warnings);
}

fn walk(node: &mut Value, path: &str, warnings: &mut Vec<Error>) {
    let Value::Object(map) = node else {
        return;
    };

    let declared_type = map.get("type").and_then(Value::as_str).map(str::to_owned);
    let is_object = match declared_type.as_deref() {
        Some("object") => true,
        Some(_) => false,
        None => {
            warnings.push(Error::AmbiguousSchemaNode { node_path: path.to_owned() });
            true
        }
    };

    if is_object {
        map.entry(PRESERVE_UNKNOWN_FIELDS.to_owned())
            .or_insert(Value::Bool(true));
    }

    if let Some(properties) = map.get_mut("properties").and_then(Value::as_object_mut) {
        for (name, value) in properties.iter_mut() {
            walk(value, &format!("{path}.properties.{name}"), warnings);
        }
    }

    if let Some(items) = map.get_mut("items") {
        walk(items, &format!("{path}.items"), warnings);
    }

    if let Some(additional) = map.get_mut("additionalProperties") {
        if additional.is_object() {
            walk(additional, &format!("{path}.additionalProperties"), warnings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn marks_top_level_object() {
        let mut schema = json!({"type": "object", "properties": {}});
        let mut warnings = Vec::new();
        default_schema_permissiveness(&mut schema, &mut warnings);
        assert_eq!(schema["x-preserve-unknown-fields"], json!(true));
        assert!(warnings.is_empty());
    }

    #[test]
    fn descends_through_properties_and_items() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "labels": {"type": "array", "items": {"type": "object"}},
                "matchLabels": {"type": "object"},
            },
        });
        let mut warnings = Vec::new();
        default_schema_permissiveness(&mut schema, &mut warnings);
        assert_eq!(schema["properties"]["labels"]["items"]["x-preserve-unknown-fields"], json!(true));
        assert_eq!(schema["properties"]["matchLabels"]["x-preserve-unknown-fields"], json!(true));
    }

    #[test]
    fn descends_through_additional_properties_once() {
        let mut schema = json!({
            "type": "object",
            "additionalProperties": {"type": "object", "properties": {"x": {"type": "string"}}},
        });
        let mut warnings = Vec::new();
        default_schema_permissiveness(&mut schema, &mut warnings);
        assert_eq!(schema["additionalProperties"]["x-preserve-unknown-fields"], json!(true));
        assert!(schema["additionalProperties"]["properties"]["x"].get("x-preserve-unknown-fields").is_none());
    }

    #[test]
    fn untyped_node_is_treated_as_object_and_warns() {
        let mut schema = json!({"properties": {"foo": {"type": "string"}}});
        let mut warnings = Vec::new();
        default_schema_permissiveness(&mut schema, &mut warnings);
        assert_eq!(schema["x-preserve-unknown-fields"], json!(true));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn does_not_override_an_explicit_false() {
        let mut schema = json!({"type": "object", "x-preserve-unknown-fields": false});
        let mut warnings = Vec::new();
        default_schema_permissiveness(&mut schema, &mut warnings);
        assert_eq!(schema["x-preserve-unknown-fields"], json!(false));
    }
}
