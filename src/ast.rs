//! Document model helpers over the tagged YAML value tree.
//!
//! The document is a `serde_yaml::Value`: mappings preserve insertion order
//! and non-plain tags surface as `Value::Tagged` nodes, which is exactly the
//! shape the transform dispatches on. Everything here is a small accessor
//! used by the walker stages.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};

/// `$imports`: mapping of name -> location string, loaded by the import walker.
pub const KEY_IMPORTS: &str = "$imports";
/// `$defs`: mapping of name -> value, bound as local constants.
pub const KEY_DEFS: &str = "$defs";
/// `$params`: parameter declarations; presence marks a mapping as a template.
pub const KEY_PARAMS: &str = "$params";
/// `$envValues`: the resolved local scope, written by the import walker only.
pub const KEY_ENV_VALUES: &str = "$envValues";
/// `$location`: source location of an imported document, stamped on load.
pub const KEY_LOCATION: &str = "$location";

/// All reserved meta-keys, stripped from the output at any depth.
pub const META_KEYS: [&str; 5] = [
    KEY_IMPORTS,
    KEY_DEFS,
    KEY_PARAMS,
    KEY_ENV_VALUES,
    KEY_LOCATION,
];

/// Builds a string mapping key.
pub fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

/// Looks up a string key in a mapping.
pub fn get<'a>(map: &'a Mapping, name: &str) -> Option<&'a Value> {
    map.get(&key(name))
}

/// Looks up a string key and returns it as `&str` if it is a string value.
pub fn get_str<'a>(map: &'a Mapping, name: &str) -> Option<&'a str> {
    get(map, name).and_then(Value::as_str)
}

pub fn contains(map: &Mapping, name: &str) -> bool {
    get(map, name).is_some()
}

pub fn insert(map: &mut Mapping, name: &str, value: Value) {
    map.insert(key(name), value);
}

/// Returns the tag name without its leading `!`.
pub fn tag_name(tagged: &TaggedValue) -> String {
    let rendered = tagged.tag.to_string();
    rendered.trim_start_matches('!').to_string()
}

/// Builds a tagged node from a bare tag name.
pub fn tagged(name: &str, payload: Value) -> Value {
    Value::Tagged(Box::new(TaggedValue {
        tag: serde_yaml::value::Tag::new(name),
        value: payload,
    }))
}

/// A template is a mapping that declares `$params`.
pub fn is_template(value: &Value) -> bool {
    matches!(value, Value::Mapping(map) if contains(map, KEY_PARAMS))
}

/// Renders a scalar value as a string; `None` for sequences, mappings, and tags.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(v) => Some(v.to_string()),
        Value::Number(v) => Some(v.to_string()),
        Value::String(v) => Some(v.clone()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

/// Renders a mapping key for diagnostics and path building.
pub fn key_to_string(key: &Value) -> String {
    scalar_to_string(key).unwrap_or_else(|| "?".to_string())
}

/// Drills into `root` with dotted selectors, each used as a mapping key or
/// sequence index. On failure returns the selector that did not resolve.
pub fn lookup_path<'a>(root: &'a Value, selectors: &[&str]) -> Result<&'a Value, String> {
    let mut current = root;
    for selector in selectors {
        current = match current {
            Value::Mapping(map) => get(map, selector).ok_or_else(|| selector.to_string())?,
            Value::Sequence(items) => {
                let index: usize = selector.parse().map_err(|_| selector.to_string())?;
                items.get(index).ok_or_else(|| selector.to_string())?
            }
            _ => return Err(selector.to_string()),
        };
    }
    Ok(current)
}
