//! Structured-document codec: parse and dump YAML/JSON, preserving tags.
//!
//! YAML tags (`!Ref`, `!$include`, ...) parse to `Value::Tagged` nodes and
//! round-trip through `dump_yaml`. JSON has no tag syntax, so `dump_json`
//! renders a tagged node as a singleton mapping `{tag-name: payload}`.

use serde_yaml::{Mapping, Value};

use crate::ast;
use crate::error::IidyError;

/// Parses document text, choosing the format by the location's extension:
/// `.json` parses as JSON, everything else as YAML.
pub fn parse(data: &str, location: &str) -> Result<Value, IidyError> {
    if location.ends_with(".json") {
        parse_json(data)
    } else {
        parse_yaml(data)
    }
}

/// Parses YAML text into the tagged value tree.
pub fn parse_yaml(data: &str) -> Result<Value, IidyError> {
    let mut doc: Value = serde_yaml::from_str(data)
        .map_err(|e| IidyError::Parse(format!("invalid yaml: {e}")))?;
    normalize_version_dates(&mut doc);
    Ok(doc)
}

/// Parses JSON text into the value tree.
pub fn parse_json(data: &str) -> Result<Value, IidyError> {
    let doc: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| IidyError::Parse(format!("invalid json: {e}")))?;
    let mut doc = json_to_yaml(&doc);
    normalize_version_dates(&mut doc);
    Ok(doc)
}

/// Serializes a document as YAML text.
pub fn dump_yaml(doc: &Value) -> Result<String, IidyError> {
    let mut doc = doc.clone();
    normalize_version_dates(&mut doc);
    serde_yaml::to_string(&doc).map_err(|e| IidyError::Serialization(e.to_string()))
}

/// Serializes a document as JSON text.
pub fn dump_json(doc: &Value, pretty: bool) -> Result<String, IidyError> {
    let json = yaml_to_json(doc)?;
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    rendered.map_err(|e| IidyError::Serialization(e.to_string()))
}

/// Converts a YAML value into JSON, lowering tagged nodes to
/// `{tag-name: payload}` mappings.
pub fn yaml_to_json(doc: &Value) -> Result<serde_json::Value, IidyError> {
    Ok(match doc {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::Number(u.into())
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .ok_or_else(|| {
                        IidyError::Serialization(format!("number {n} has no json form"))
                    })?
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(items) => serde_json::Value::Array(
            items.iter().map(yaml_to_json).collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key = ast::scalar_to_string(k).ok_or_else(|| {
                    IidyError::Serialization("mapping key has no json form".to_string())
                })?;
                out.insert(key, yaml_to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
        Value::Tagged(t) => {
            let mut out = serde_json::Map::new();
            out.insert(ast::tag_name(t), yaml_to_json(&t.value)?);
            serde_json::Value::Object(out)
        }
    })
}

/// Converts a JSON value into the YAML value tree.
pub fn json_to_yaml(doc: &serde_json::Value) -> Value {
    match doc {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                Value::Number(serde_yaml::Number::from(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Sequence(items.iter().map(json_to_yaml).collect())
        }
        serde_json::Value::Object(map) => {
            let mut out = Mapping::new();
            for (k, v) in map {
                out.insert(Value::String(k.clone()), json_to_yaml(v));
            }
            Value::Mapping(out)
        }
    }
}

/// Forces scalars under `Version` / `AWSTemplateFormatVersion` keys into their
/// string form, so a YAML-1.1 date or a bare number never leaks through as a
/// typed scalar.
fn normalize_version_dates(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                let is_version_key =
                    matches!(k.as_str(), Some("Version") | Some("AWSTemplateFormatVersion"));
                if is_version_key && !matches!(v, Value::String(_)) {
                    if let Some(rendered) = ast::scalar_to_string(v) {
                        *v = Value::String(rendered);
                        continue;
                    }
                }
                normalize_version_dates(v);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                normalize_version_dates(item);
            }
        }
        Value::Tagged(t) => normalize_version_dates(&mut t.value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_custom_tags_as_tagged_nodes() {
        let doc = parse_yaml("X: !$include cfg.a\nY: !Ref thing\n").unwrap();
        let Value::Mapping(map) = &doc else {
            panic!("expected mapping");
        };
        let Some(Value::Tagged(include)) = ast::get(map, "X") else {
            panic!("expected tagged X");
        };
        assert_eq!(ast::tag_name(include), "$include");
        assert_eq!(include.value.as_str(), Some("cfg.a"));
    }

    #[test]
    fn yaml_round_trip_preserves_tags() {
        let doc = parse_yaml("A: !GetAtt Thing.Arn\n").unwrap();
        let dumped = dump_yaml(&doc).unwrap();
        assert!(dumped.contains("!GetAtt"));
        assert_eq!(parse_yaml(&dumped).unwrap(), doc);
    }

    #[test]
    fn version_keys_are_stringified() {
        let doc = parse_yaml("AWSTemplateFormatVersion: 2010\nVersion: 1.5\n").unwrap();
        let Value::Mapping(map) = &doc else {
            panic!("expected mapping");
        };
        assert_eq!(ast::get_str(map, "AWSTemplateFormatVersion"), Some("2010"));
        assert_eq!(ast::get_str(map, "Version"), Some("1.5"));
    }

    #[test]
    fn json_dump_lowers_tags_to_singleton_mappings() {
        let doc = parse_yaml("A: !Ref thing\n").unwrap();
        let json = dump_json(&doc, false).unwrap();
        assert_eq!(json, r#"{"A":{"Ref":"thing"}}"#);
    }

    #[test]
    fn parse_dispatches_on_extension() {
        let doc = parse(r#"{"a": 1}"#, "stack.json").unwrap();
        let Value::Mapping(map) = &doc else {
            panic!("expected mapping");
        };
        assert_eq!(ast::get(map, "a"), Some(&Value::Number(1.into())));
    }
}
