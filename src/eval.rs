//! Tree-walking evaluation over the tagged document model.
//!
//! Dispatches on node kind: strings interpolate against the active scope,
//! sequences and mappings recurse, tagged nodes run the data-level macros.
//! Mappings carrying `$envValues` (stamped by the import walker) re-enter
//! through a sub-environment so imported documents resolve their own names
//! before the caller's scope applies.

use std::collections::BTreeMap;

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};

use crate::ast;
use crate::codec;
use crate::error::IidyError;
use crate::expand::{self, GlobalAccumulator};
use crate::interp;

/// Active lexical scope plus the source location of the current frame.
///
/// Environments are immutable; sub-environments are built by copy-on-extend.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub values: BTreeMap<String, Value>,
    pub location: String,
}

impl Env {
    pub fn root(location: &str) -> Self {
        Env {
            values: BTreeMap::new(),
            location: location.to_string(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Active name-rewriting prefix; empty at the root.
    pub fn prefix(&self) -> String {
        self.lookup("Prefix")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    pub fn extend<I>(&self, bindings: I) -> Env
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut next = self.clone();
        for (name, value) in bindings {
            next.values.insert(name, value);
        }
        next
    }

    /// Same frame location, replaced bindings.
    pub fn with_values(&self, values: BTreeMap<String, Value>) -> Env {
        Env {
            values,
            location: self.location.clone(),
        }
    }
}

/// Transform-wide mutable state threaded through the walk.
#[derive(Debug, Default)]
pub struct EvalContext {
    pub globals: GlobalAccumulator,
}

/// Evaluates one node, producing a new tree.
pub fn eval(
    value: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    match value {
        Value::String(text) if interp::has_template(text) => {
            Ok(Value::String(render_text(text, env, path)?))
        }
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                out.push(eval(item, env, &format!("{path}[{index}]"), ctx)?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => eval_mapping(map, env, path, ctx),
        Value::Tagged(tagged) => eval_tagged(tagged, env, path, ctx),
        other => Ok(other.clone()),
    }
}

/// Interpolates a string against the environment, citing path and frame.
pub fn render_text(text: &str, env: &Env, path: &str) -> Result<String, IidyError> {
    let site = format!("{path} ({})", env.location);
    interp::render(text, &site, &|name| env.lookup(name).cloned())
}

fn eval_mapping(
    map: &Mapping,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    if let Some(Value::Mapping(own)) = ast::get(map, ast::KEY_ENV_VALUES) {
        let mut entered = env.clone();
        if let Some(location) = ast::get_str(map, ast::KEY_LOCATION) {
            entered.location = location.to_string();
        }
        let processed = processed_env_values(own, &entered, path, ctx)?;
        let merged = entered.extend(processed);
        eval_mapping_body(map, &merged, path, ctx)
    } else {
        eval_mapping_body(map, env, path, ctx)
    }
}

/// Resolves a document's own `$envValues` hygienically: non-template entries
/// evaluate in a scope seeded by those same values, so an imported document
/// resolves its own imports and defs, never the caller's.
pub fn processed_env_values(
    own: &Mapping,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<BTreeMap<String, Value>, IidyError> {
    let seed = env.with_values(bindings_of(own, env, path)?);
    let mut processed = BTreeMap::new();
    for (name, value) in own {
        let name = name.as_str().expect("binding names are strings");
        if ast::is_template(value) {
            processed.insert(name.to_string(), value.clone());
        } else {
            let child_path = format!("{path}.$envValues.{name}");
            processed.insert(name.to_string(), eval(value, &seed, &child_path, ctx)?);
        }
    }
    Ok(processed)
}

pub(crate) fn bindings_of(
    map: &Mapping,
    env: &Env,
    path: &str,
) -> Result<BTreeMap<String, Value>, IidyError> {
    let mut out = BTreeMap::new();
    for (name, value) in map {
        let name = name.as_str().ok_or_else(|| {
            IidyError::Lookup(format!(
                "binding names must be strings at {path} ({})",
                env.location
            ))
        })?;
        out.insert(name.to_string(), value.clone());
    }
    Ok(out)
}

fn eval_mapping_body(
    map: &Mapping,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let mut out = Mapping::new();
    for (key, value) in map {
        let key_name = ast::key_to_string(key);
        let child_path = format!("{path}.{key_name}");

        if let Some(name) = key.as_str() {
            if ast::META_KEYS.contains(&name) {
                continue;
            }
            if name.starts_with("$merge") {
                splice_merge(value, &mut out, env, &child_path, ctx)?;
                continue;
            }
            if name == "Resources" && matches!(value, Value::Mapping(_)) && !within_overrides(path)
            {
                let Value::Mapping(resources) = value else {
                    unreachable!("matched above");
                };
                out.insert(
                    key.clone(),
                    expand::eval_resources(resources, env, &child_path, ctx)?,
                );
                continue;
            }
        }

        out.insert(key.clone(), eval(value, env, &child_path, ctx)?);
    }
    Ok(Value::Mapping(out))
}

fn splice_merge(
    value: &Value,
    out: &mut Mapping,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<(), IidyError> {
    let merged = eval(value, env, path, ctx)?;
    let Value::Mapping(entries) = merged else {
        return Err(IidyError::MacroShape(format!(
            "$merge value must evaluate to a mapping at {path} ({})",
            env.location
        )));
    };
    for (key, entry) in entries {
        if out.contains_key(&key) {
            return Err(IidyError::MergeConflict(format!(
                "$merge overwrites existing key '{}' at {path} ({})",
                ast::key_to_string(&key),
                env.location
            )));
        }
        out.insert(key, entry);
    }
    Ok(())
}

// Resource delegation is suppressed anywhere under an Overrides sub-tree;
// those mappings are raw template material, not emitted resources.
fn within_overrides(path: &str) -> bool {
    path.split('.').any(|segment| segment == "Overrides")
}

fn eval_tagged(
    tagged: &TaggedValue,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let tag = ast::tag_name(tagged);
    let payload = &tagged.value;
    match tag.as_str() {
        "$include" => eval_include(payload, env, path, ctx),
        "$expand" => eval_expand(payload, env, path, ctx),
        "$escape" => Ok(payload.clone()),
        "$string" => eval_string(payload, env, path, ctx),
        "$parseYaml" => eval_parse_yaml(payload, env, path, ctx),
        "$let" => eval_let(payload, env, path, ctx),
        "$map" => Ok(Value::Sequence(eval_map(payload, env, path, ctx)?)),
        "$flatten" => {
            let evaled = eval(payload, env, path, ctx)?;
            Ok(Value::Sequence(flatten_one_level(evaled, env, path)?))
        }
        "$concatMap" => {
            let mapped = Value::Sequence(eval_map(payload, env, path, ctx)?);
            Ok(Value::Sequence(flatten_one_level(mapped, env, path)?))
        }
        "$mapListToHash" => {
            let mapped = eval_map(payload, env, path, ctx)?;
            pairs_to_mapping(&mapped, env, path)
        }
        "$fromPairs" => {
            let evaled = eval(payload, env, path, ctx)?;
            let Value::Sequence(items) = evaled else {
                return Err(IidyError::MacroShape(format!(
                    "$fromPairs expects a sequence of {{key, value}} mappings at {path} ({})",
                    env.location
                )));
            };
            pairs_to_mapping(&items, env, path)
        }
        "Ref" => eval_ref(payload, env, path, ctx),
        _ => {
            // Passthrough tags rebuild around their evaluated payload.
            let inner = eval(payload, env, path, ctx)?;
            Ok(ast::tagged(&tag, inner))
        }
    }
}

fn eval_include(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let Value::String(reference) = payload else {
        return Err(IidyError::MacroShape(format!(
            "$include expects a name or dotted selector string at {path} ({})",
            env.location
        )));
    };

    let mut segments = reference.split('.');
    let name = segments.next().unwrap_or_default();
    let found = env.lookup(name).ok_or_else(|| {
        IidyError::Lookup(format!(
            "$include of unbound name '{name}' at {path} ({})",
            env.location
        ))
    })?;

    let selectors: Vec<&str> = segments.collect();
    let target = if selectors.is_empty() {
        found.clone()
    } else {
        ast::lookup_path(found, &selectors)
            .map_err(|selector| {
                IidyError::Lookup(format!(
                    "missing selector '{selector}' in $include '{reference}' at {path} ({})",
                    env.location
                ))
            })?
            .clone()
    };

    if ast::is_template(&target) {
        return Err(IidyError::TemplateUse(format!(
            "template '{reference}' must be expanded, not included, at {path} ({})",
            env.location
        )));
    }

    eval(&target, env, path, ctx)
}

fn eval_expand(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let Value::Mapping(payload) = payload else {
        return Err(IidyError::MacroShape(format!(
            "$expand expects a mapping with template and params at {path} ({})",
            env.location
        )));
    };

    let template_ref = ast::get(payload, "template").ok_or_else(|| {
        IidyError::MacroShape(format!(
            "$expand requires a template name at {path} ({})",
            env.location
        ))
    })?;
    let template_ref = eval(template_ref, env, &format!("{path}.template"), ctx)?;
    let Value::String(template_name) = template_ref else {
        return Err(IidyError::MacroShape(format!(
            "$expand template must be a name string at {path} ({})",
            env.location
        )));
    };

    let template = env.lookup(&template_name).cloned().ok_or_else(|| {
        IidyError::Lookup(format!(
            "$expand of unbound template '{template_name}' at {path} ({})",
            env.location
        ))
    })?;
    let Value::Mapping(template) = template else {
        return Err(IidyError::TemplateUse(format!(
            "'{template_name}' is not a template at {path} ({})",
            env.location
        )));
    };
    if !ast::contains(&template, ast::KEY_PARAMS) {
        return Err(IidyError::TemplateUse(format!(
            "'{template_name}' is not a template (no $params) at {path} ({})",
            env.location
        )));
    }

    let params = match ast::get(payload, "params") {
        Some(params) => {
            let evaled = eval(params, env, &format!("{path}.params"), ctx)?;
            let Value::Mapping(evaled) = evaled else {
                return Err(IidyError::MacroShape(format!(
                    "$expand params must evaluate to a mapping at {path} ({})",
                    env.location
                )));
            };
            bindings_of(&evaled, env, path)?
        }
        None => BTreeMap::new(),
    };

    let mut body = Mapping::new();
    for (key, value) in &template {
        if key.as_str() == Some(ast::KEY_PARAMS) {
            continue;
        }
        body.insert(key.clone(), value.clone());
    }

    let sub_env = env.extend(params);
    eval(&Value::Mapping(body), &sub_env, path, ctx)
}

fn eval_string(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let mut evaled = eval(payload, env, path, ctx)?;
    if let Value::Sequence(items) = &evaled {
        if items.len() == 1 {
            evaled = items[0].clone();
        }
    }
    let rendered = serde_yaml::to_string(&evaled)
        .map_err(|e| IidyError::Serialization(format!("$string failed at {path}: {e}")))?;
    Ok(Value::String(rendered))
}

fn eval_parse_yaml(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let evaled = eval(payload, env, path, ctx)?;
    let Value::String(text) = evaled else {
        return Err(IidyError::MacroShape(format!(
            "$parseYaml expects a string at {path} ({})",
            env.location
        )));
    };
    let parsed = codec::parse_yaml(&text)
        .map_err(|e| IidyError::MacroShape(format!("$parseYaml at {path}: {e}")))?;
    eval(&parsed, env, path, ctx)
}

fn eval_let(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let Value::Mapping(payload) = payload else {
        return Err(IidyError::MacroShape(format!(
            "$let expects a mapping of bindings with an 'in' body at {path} ({})",
            env.location
        )));
    };
    let body = ast::get(payload, "in").ok_or_else(|| {
        IidyError::MacroShape(format!(
            "$let is missing its 'in' body at {path} ({})",
            env.location
        ))
    })?;

    let mut bindings = BTreeMap::new();
    for (name, value) in payload {
        let Some(name) = name.as_str() else {
            return Err(IidyError::MacroShape(format!(
                "$let binding names must be strings at {path} ({})",
                env.location
            )));
        };
        if name == "in" {
            continue;
        }
        let child_path = format!("{path}.{name}");
        bindings.insert(name.to_string(), eval(value, env, &child_path, ctx)?);
    }

    let extended = env.extend(bindings);
    eval(body, &extended, &format!("{path}.in"), ctx)
}

fn eval_map(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Vec<Value>, IidyError> {
    let Value::Mapping(payload) = payload else {
        return Err(IidyError::MacroShape(format!(
            "$map expects a mapping with items and template at {path} ({})",
            env.location
        )));
    };

    let items = ast::get(payload, "items").ok_or_else(|| {
        IidyError::MacroShape(format!("$map requires items at {path} ({})", env.location))
    })?;
    let template = ast::get(payload, "template").ok_or_else(|| {
        IidyError::MacroShape(format!("$map requires a template at {path} ({})", env.location))
    })?;
    let var = match ast::get(payload, "var") {
        None => "item",
        Some(Value::String(var)) => var.as_str(),
        Some(_) => {
            return Err(IidyError::MacroShape(format!(
                "$map var must be a string at {path} ({})",
                env.location
            )))
        }
    };

    let items = eval(items, env, &format!("{path}.items"), ctx)?;
    let Value::Sequence(items) = items else {
        return Err(IidyError::MacroShape(format!(
            "$map items must evaluate to a sequence at {path} ({})",
            env.location
        )));
    };

    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let bound = env.extend([
            (var.to_string(), item),
            (
                format!("{var}Idx"),
                Value::Number((index as u64).into()),
            ),
        ]);
        out.push(eval(template, &bound, &format!("{path}[{index}]"), ctx)?);
    }
    Ok(out)
}

fn flatten_one_level(value: Value, env: &Env, path: &str) -> Result<Vec<Value>, IidyError> {
    let Value::Sequence(outer) = value else {
        return Err(IidyError::MacroShape(format!(
            "$flatten expects a sequence of sequences at {path} ({})",
            env.location
        )));
    };
    let mut out = Vec::new();
    for item in outer {
        let Value::Sequence(inner) = item else {
            return Err(IidyError::MacroShape(format!(
                "$flatten expects every element to be a sequence at {path} ({})",
                env.location
            )));
        };
        out.extend(inner);
    }
    Ok(out)
}

fn pairs_to_mapping(items: &[Value], env: &Env, path: &str) -> Result<Value, IidyError> {
    let mut out = Mapping::new();
    for (index, item) in items.iter().enumerate() {
        let Value::Mapping(pair) = item else {
            return Err(IidyError::MacroShape(format!(
                "expected a {{key, value}} mapping at {path}[{index}] ({})",
                env.location
            )));
        };
        let key = ast::get(pair, "key")
            .and_then(ast::scalar_to_string)
            .ok_or_else(|| {
                IidyError::MacroShape(format!(
                    "pair at {path}[{index}] is missing a scalar 'key' ({})",
                    env.location
                ))
            })?;
        let value = ast::get(pair, "value").ok_or_else(|| {
            IidyError::MacroShape(format!(
                "pair at {path}[{index}] is missing 'value' ({})",
                env.location
            ))
        })?;
        out.insert(Value::String(key), value.clone());
    }
    Ok(Value::Mapping(out))
}

fn eval_ref(
    payload: &Value,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    match payload {
        // AWS pseudo-parameters pass through untouched.
        Value::String(target) if target.starts_with("AWS:") => {
            Ok(ast::tagged("Ref", payload.clone()))
        }
        Value::String(target) => Ok(ast::tagged(
            "Ref",
            Value::String(format!("{}{}", env.prefix(), target)),
        )),
        other => {
            let inner = eval(other, env, path, ctx)?;
            Ok(ast::tagged("Ref", inner))
        }
    }
}
