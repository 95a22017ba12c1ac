//! Value conversion between serde_json::Value and cel_interpreter types

use base64::Engine as _;
use cel_interpreter::objects::{Key, Map, Value as CelValue};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Convert serde_json::Value to cel_interpreter::Value
pub fn json_to_cel(value: &JsonValue) -> CelValue {
    match value {
        JsonValue::Null => CelValue::Null,
        JsonValue::Bool(b) => CelValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else if let Some(f) = n.as_f64() {
                CelValue::Float(f)
            } else {
                CelValue::Null
            }
        }
        JsonValue::String(s) => CelValue::String(s.clone().into()),
        JsonValue::Array(arr) => {
            let cel_vec: Vec<CelValue> = arr.iter().map(json_to_cel).collect();
            CelValue::List(cel_vec.into())
        }
        JsonValue::Object(obj) => entries_to_cel(obj.iter()),
    }
}

/// Convert an input fact map to a CEL map without building an intermediate JSON object
pub fn facts_to_cel(facts: &HashMap<String, JsonValue>) -> CelValue {
    entries_to_cel(facts.iter())
}

fn entries_to_cel<'a>(entries: impl Iterator<Item = (&'a String, &'a JsonValue)>) -> CelValue {
    let map_data: HashMap<Key, CelValue> = entries
        .map(|(k, v)| (Key::from(k.clone()), json_to_cel(v)))
        .collect();
    CelValue::Map(Map {
        map: Arc::new(map_data),
    })
}

/// An empty CEL map
pub fn empty_map() -> CelValue {
    CelValue::Map(Map {
        map: Arc::new(HashMap::new()),
    })
}

/// Set `value` at `path` inside `root`, creating intermediate maps.
///
/// Non-map values found along the path are replaced by maps.
pub fn insert_path(root: &mut CelValue, path: &[String], value: CelValue) {
    let Some((head, rest)) = path.split_first() else {
        *root = value;
        return;
    };

    if !matches!(root, CelValue::Map(_)) {
        *root = empty_map();
    }

    if let CelValue::Map(map) = root {
        let entries = Arc::make_mut(&mut map.map);
        let child = entries
            .entry(Key::from(head.clone()))
            .or_insert_with(empty_map);
        insert_path(child, rest, value);
    }
}

/// Convert cel_interpreter::Value to serde_json::Value
pub fn cel_to_json(value: &CelValue) -> JsonValue {
    match value {
        CelValue::Null => JsonValue::Null,
        CelValue::Bool(b) => JsonValue::Bool(*b),
        CelValue::Int(i) => JsonValue::Number((*i).into()),
        CelValue::UInt(u) => JsonValue::Number((*u).into()),
        CelValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        CelValue::String(s) => JsonValue::String(s.to_string()),
        CelValue::Bytes(b) => {
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b.as_ref()))
        }
        CelValue::List(list) => JsonValue::Array(list.iter().map(cel_to_json).collect()),
        CelValue::Map(map) => {
            let mut json_obj = serde_json::Map::new();
            for (k, v) in map.map.as_ref().iter() {
                let key_str = match k {
                    Key::String(s) => s.to_string(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                json_obj.insert(key_str, cel_to_json(v));
            }
            JsonValue::Object(json_obj)
        }
        CelValue::Duration(_) | CelValue::Timestamp(_) | CelValue::Function(_, _) => {
            JsonValue::String(format!("{:?}", value))
        }
    }
}

/// Name of a JSON value's type, as reported in decision errors
pub fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_cel_int() {
        let cel = json_to_cel(&json!(42));
        assert!(matches!(cel, CelValue::Int(42)));
    }

    #[test]
    fn test_json_to_cel_object() {
        let cel = json_to_cel(&json!({"key": "value", "nested": {"n": 1}}));
        if let CelValue::Map(map) = cel {
            assert_eq!(map.map.len(), 2);
        } else {
            panic!("Expected Map");
        }
    }

    #[test]
    fn test_facts_to_cel() {
        let mut facts = HashMap::new();
        facts.insert("field".to_string(), json!("name"));
        facts.insert("entity".to_string(), json!({"ID": 1}));

        let back = cel_to_json(&facts_to_cel(&facts));
        assert_eq!(back, json!({"field": "name", "entity": {"ID": 1}}));
    }

    #[test]
    fn test_insert_path_creates_maps() {
        let mut root = json_to_cel(&json!({"docs": {"a": 1}}));
        insert_path(
            &mut root,
            &["api".to_string(), "object".to_string(), "view".to_string()],
            CelValue::Bool(true),
        );

        assert_eq!(
            cel_to_json(&root),
            json!({"docs": {"a": 1}, "api": {"object": {"view": true}}})
        );
    }

    #[test]
    fn test_insert_path_does_not_touch_shared_copy() {
        let original = json_to_cel(&json!({"a": {"b": 1}}));
        let mut copy = original.clone();
        insert_path(&mut copy, &["a".to_string(), "c".to_string()], CelValue::Int(2));

        assert_eq!(cel_to_json(&original), json!({"a": {"b": 1}}));
        assert_eq!(cel_to_json(&copy), json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn test_json_type_names() {
        assert_eq!(json_type_name(&json!("x")), "string");
        assert_eq!(json_type_name(&json!(1.5)), "number");
        assert_eq!(json_type_name(&json!([1])), "array");
        assert_eq!(json_type_name(&json!(null)), "null");
    }
}
