//! Strict `{{...}}` string interpolation over the active scope.
//!
//! Grammar: `{{name}}`, `{{name.sel.sel}}`, `{{helper name}}` with helpers
//! `tojson`, `toyaml`, and `base64`. Resolution is strict: an unbound name
//! or missing selector is an error, never an empty substitution.

use std::sync::OnceLock;

use base64::Engine;
use regex::Regex;
use serde_yaml::Value;

use crate::ast;
use crate::codec;
use crate::error::IidyError;

/// Scope lookup for the leading name of a variable reference.
pub type LookupFn<'a> = dyn Fn(&str) -> Option<Value> + 'a;

/// Fast pre-check used by the evaluator before paying for a render.
pub fn has_template(text: &str) -> bool {
    text.contains("{{")
}

/// Renders every `{{...}}` segment of `template` against `lookup`.
pub fn render(template: &str, path: &str, lookup: &LookupFn) -> Result<String, IidyError> {
    let mut out = String::new();
    let mut last = 0usize;

    for caps in placeholder_regex().captures_iter(template) {
        let whole = caps.get(0).expect("whole match");
        let inner = caps.get(1).expect("capture group").as_str().trim();
        out.push_str(&template[last..whole.start()]);
        out.push_str(&render_expression(inner, path, lookup)?);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Resolves a dotted variable reference (`name` or `name.sel1.sel2...`).
pub fn resolve_variable(expr: &str, path: &str, lookup: &LookupFn) -> Result<Value, IidyError> {
    let mut segments = expr.split('.');
    let name = segments.next().filter(|s| !s.is_empty()).ok_or_else(|| {
        IidyError::Interpolation(format!("invalid variable reference '{expr}' at {path}"))
    })?;

    let root = lookup(name)
        .ok_or_else(|| IidyError::Lookup(format!("'{name}' is not bound at {path}")))?;

    let selectors: Vec<&str> = segments.collect();
    if selectors.is_empty() {
        return Ok(root);
    }
    ast::lookup_path(&root, &selectors)
        .map(Value::clone)
        .map_err(|selector| {
            IidyError::Lookup(format!(
                "missing selector '{selector}' in '{expr}' at {path}"
            ))
        })
}

fn render_expression(expr: &str, path: &str, lookup: &LookupFn) -> Result<String, IidyError> {
    if expr.is_empty() {
        return Err(IidyError::Interpolation(format!(
            "empty interpolation at {path}"
        )));
    }

    let mut words = expr.split_whitespace();
    let first = words.next().expect("non-empty expression");
    let Some(argument) = words.next() else {
        let value = resolve_variable(first, path, lookup)?;
        return stringify(&value, first, path);
    };

    if words.next().is_some() {
        return Err(IidyError::Interpolation(format!(
            "malformed interpolation '{{{{{expr}}}}}' at {path}"
        )));
    }

    let value = resolve_variable(argument, path, lookup)?;
    match first {
        "tojson" => {
            let json = codec::yaml_to_json(&value)?;
            serde_json::to_string(&json)
                .map_err(|e| IidyError::Interpolation(format!("tojson failed at {path}: {e}")))
        }
        "toyaml" => serde_yaml::to_string(&value)
            .map(|rendered| rendered.trim_end_matches('\n').to_string())
            .map_err(|e| IidyError::Interpolation(format!("toyaml failed at {path}: {e}"))),
        "base64" => {
            let plain = stringify(&value, argument, path)?;
            Ok(base64::engine::general_purpose::STANDARD.encode(plain))
        }
        other => Err(IidyError::Interpolation(format!(
            "unknown helper '{other}' at {path}"
        ))),
    }
}

fn stringify(value: &Value, expr: &str, path: &str) -> Result<String, IidyError> {
    match value {
        Value::Null => Ok(String::new()),
        other => ast::scalar_to_string(other).ok_or_else(|| {
            IidyError::Interpolation(format!(
                "cannot interpolate non-scalar '{expr}' at {path}; use tojson or toyaml"
            ))
        }),
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]*)\}\}").expect("valid placeholder regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(pairs: &'a [(&'a str, Value)]) -> impl Fn(&str) -> Option<Value> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn renders_multiple_variables() {
        let bindings = [
            ("greeting", Value::String("hello".to_string())),
            ("name", Value::String("world".to_string())),
        ];
        let lookup = scope(&bindings);
        let out = render("{{greeting}} {{name}}!", "$.Message", &lookup).unwrap();
        assert_eq!(out, "hello world!");
    }

    #[test]
    fn renders_numbers_and_null() {
        let bindings = [
            ("count", Value::Number(3.into())),
            ("missing", Value::Null),
        ];
        let lookup = scope(&bindings);
        assert_eq!(render("{{count}}!", "$", &lookup).unwrap(), "3!");
        assert_eq!(render("[{{missing}}]", "$", &lookup).unwrap(), "[]");
    }

    #[test]
    fn dotted_reference_drills_into_value() {
        let doc: Value = serde_yaml::from_str("a:\n  b: 42\n").unwrap();
        let bindings = [("cfg", doc)];
        let lookup = scope(&bindings);
        assert_eq!(render("{{cfg.a.b}}", "$", &lookup).unwrap(), "42");
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let bindings: [(&str, Value); 0] = [];
        let lookup = scope(&bindings);
        let err = render("hi {{nobody}}", "$.Message", &lookup).unwrap_err();
        assert!(err.to_string().contains("'nobody' is not bound"));
        assert!(err.to_string().contains("$.Message"));
    }

    #[test]
    fn missing_selector_is_an_error() {
        let doc: Value = serde_yaml::from_str("a: 1\n").unwrap();
        let bindings = [("cfg", doc)];
        let lookup = scope(&bindings);
        let err = render("{{cfg.b}}", "$", &lookup).unwrap_err();
        assert!(err.to_string().contains("missing selector 'b'"));
    }

    #[test]
    fn tojson_and_toyaml_serialize_structures() {
        let doc: Value = serde_yaml::from_str("a: 1\n").unwrap();
        let bindings = [("cfg", doc)];
        let lookup = scope(&bindings);
        assert_eq!(render("{{tojson cfg}}", "$", &lookup).unwrap(), r#"{"a":1}"#);
        assert_eq!(render("{{toyaml cfg}}", "$", &lookup).unwrap(), "a: 1");
    }

    #[test]
    fn base64_encodes_scalar_form() {
        let bindings = [("secret", Value::String("hunter2".to_string()))];
        let lookup = scope(&bindings);
        assert_eq!(
            render("{{base64 secret}}", "$", &lookup).unwrap(),
            "aHVudGVyMg=="
        );
    }

    #[test]
    fn non_scalar_without_helper_is_an_error() {
        let doc: Value = serde_yaml::from_str("a: 1\n").unwrap();
        let bindings = [("cfg", doc)];
        let lookup = scope(&bindings);
        let err = render("{{cfg}}", "$", &lookup).unwrap_err();
        assert!(err.to_string().contains("use tojson or toyaml"));
    }

    #[test]
    fn unknown_helper_is_an_error() {
        let bindings = [("x", Value::String("v".to_string()))];
        let lookup = scope(&bindings);
        let err = render("{{upper x}}", "$", &lookup).unwrap_err();
        assert!(err.to_string().contains("unknown helper 'upper'"));
    }
}
