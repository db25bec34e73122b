//! User-defined resource template expansion and global-section hoisting.
//!
//! A Resources entry whose `Type` names a template in scope is replaced by
//! the template's resources, each renamed with the expansion prefix. The
//! template's own `Parameters`/`Mappings`/... sections are hoisted into a
//! transform-wide accumulator and merged into the root output at the end.

use std::collections::BTreeMap;

use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::ast;
use crate::codec;
use crate::error::IidyError;
use crate::eval::{self, Env, EvalContext};

/// Sections hoisted from expanded templates into the root output.
pub const GLOBAL_SECTIONS: [&str; 6] = [
    "Parameters",
    "Metadata",
    "Mappings",
    "Conditions",
    "Transform",
    "Outputs",
];

/// Transform-wide collector for hoisted sections.
#[derive(Debug, Default)]
pub struct GlobalAccumulator {
    sections: BTreeMap<String, Mapping>,
}

impl GlobalAccumulator {
    pub fn add(
        &mut self,
        section: &str,
        key: String,
        value: Value,
        site: &str,
    ) -> Result<(), IidyError> {
        let entries = self.sections.entry(section.to_string()).or_default();
        if ast::contains(entries, &key) {
            return Err(IidyError::MergeConflict(format!(
                "global section '{section}' already contains '{key}' (while expanding {site})"
            )));
        }
        ast::insert(entries, &key, value);
        Ok(())
    }

    pub fn section(&self, name: &str) -> Option<&Mapping> {
        self.sections.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(Mapping::is_empty)
    }
}

/// Evaluates one `Resources` mapping, expanding template-typed entries and
/// evaluating native (`AWS*`/`Custom*`) resources in place.
pub fn eval_resources(
    resources: &Mapping,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Value, IidyError> {
    let mut out = Mapping::new();

    for (name, body) in resources {
        let name_text = ast::key_to_string(name);
        let child_path = format!("{path}.{name_text}");

        let Value::Mapping(body_map) = body else {
            let evaled = eval::eval(body, env, &child_path, ctx)?;
            insert_resource(&mut out, name.clone(), evaled, path)?;
            continue;
        };
        let Some(type_value) = ast::get(body_map, "Type") else {
            let evaled = eval::eval(body, env, &child_path, ctx)?;
            insert_resource(&mut out, name.clone(), evaled, path)?;
            continue;
        };

        let type_value = eval::eval(type_value, env, &format!("{child_path}.Type"), ctx)?;
        let Value::String(type_name) = type_value else {
            return Err(IidyError::TemplateUse(format!(
                "resource Type must be a string at {child_path} ({})",
                env.location
            )));
        };

        if let Some(bound) = env.lookup(&type_name) {
            if !ast::is_template(bound) {
                return Err(IidyError::TemplateUse(format!(
                    "'{type_name}' at {child_path} is bound in scope but is not a template"
                )));
            }
            let Value::Mapping(template) = bound.clone() else {
                unreachable!("templates are mappings");
            };
            let expanded =
                expand_template(&name_text, body_map, &template, env, &child_path, ctx)?;
            for (key, value) in expanded {
                insert_resource(&mut out, key, value, path)?;
            }
            continue;
        }

        if type_name.starts_with("AWS") || type_name.starts_with("Custom") {
            let evaled = eval::eval(body, env, &child_path, ctx)?;
            insert_resource(&mut out, name.clone(), evaled, path)?;
            continue;
        }

        return Err(IidyError::TemplateUse(format!(
            "invalid resource type '{type_name}' at {child_path} ({})",
            env.location
        )));
    }

    Ok(Value::Mapping(out))
}

// Resource names must stay unique whether they were written literally or
// produced by an expansion; later entries never overwrite earlier ones.
fn insert_resource(
    out: &mut Mapping,
    key: Value,
    value: Value,
    path: &str,
) -> Result<(), IidyError> {
    if out.contains_key(&key) {
        return Err(IidyError::MergeConflict(format!(
            "resource '{}' collides with an existing resource at {path}",
            ast::key_to_string(&key)
        )));
    }
    out.insert(key, value);
    Ok(())
}

fn expand_template(
    name: &str,
    callsite: &Mapping,
    template: &Mapping,
    env: &Env,
    path: &str,
    ctx: &mut EvalContext,
) -> Result<Mapping, IidyError> {
    let prefix = match ast::get(callsite, "NamePrefix") {
        Some(value) => {
            let evaled = eval::eval(value, env, &format!("{path}.NamePrefix"), ctx)?;
            let Value::String(prefix) = evaled else {
                return Err(IidyError::TemplateUse(format!(
                    "NamePrefix must be a string at {path} ({})",
                    env.location
                )));
            };
            prefix
        }
        None => name.to_string(),
    };

    // Overrides are evaluated pre-expansion in the caller's scope, so their
    // $includes see the caller's bindings, then deep-merged over the template.
    let resource_doc = match ast::get(callsite, "Overrides") {
        Some(overrides) => {
            let evaled = eval::eval(overrides, env, &format!("{path}.Overrides"), ctx)?;
            if !matches!(evaled, Value::Mapping(_)) {
                return Err(IidyError::TemplateUse(format!(
                    "Overrides must be a mapping at {path} ({})",
                    env.location
                )));
            }
            let Value::Mapping(merged) = merge_values(&Value::Mapping(template.clone()), &evaled)
            else {
                unreachable!("merging two mappings yields a mapping");
            };
            merged
        }
        None => template.clone(),
    };

    let mut template_frame = env.clone();
    if let Some(location) = ast::get_str(template, ast::KEY_LOCATION) {
        template_frame.location = location.to_string();
    }
    let own_env_values = match ast::get(template, ast::KEY_ENV_VALUES) {
        Some(Value::Mapping(own)) => eval::processed_env_values(own, &template_frame, path, ctx)?,
        _ => BTreeMap::new(),
    };

    let prefix_binding = ("Prefix".to_string(), Value::String(prefix.clone()));
    let specs = parse_params(template, path)?;

    let defaults_env = env
        .extend([prefix_binding.clone()])
        .extend(own_env_values.clone());
    let mut defaults = BTreeMap::new();
    for spec in &specs {
        if let Some(default) = &spec.default {
            let default_path = format!("{path}.$params.{}.Default", spec.name);
            defaults.insert(
                spec.name.clone(),
                eval::eval(default, &defaults_env, &default_path, ctx)?,
            );
        }
    }

    let provided = match ast::get(callsite, "Properties") {
        Some(properties) => {
            let evaled = eval::eval(properties, env, &format!("{path}.Properties"), ctx)?;
            let Value::Mapping(evaled) = evaled else {
                return Err(IidyError::TemplateUse(format!(
                    "Properties must be a mapping at {path} ({})",
                    env.location
                )));
            };
            eval::bindings_of(&evaled, env, path)?
        }
        None => BTreeMap::new(),
    };

    let mut merged_params = defaults.clone();
    merged_params.extend(provided.clone());
    validate_params(&specs, &merged_params, path, env)?;

    let mut sub_env = env
        .extend([prefix_binding])
        .extend(defaults)
        .extend(provided)
        .extend(own_env_values);
    sub_env.location = template_frame.location;

    let mut out = Mapping::new();
    if let Some(resources) = ast::get(&resource_doc, "Resources") {
        let Value::Mapping(resources) = resources else {
            return Err(IidyError::TemplateUse(format!(
                "template Resources must be a mapping at {path} ({})",
                sub_env.location
            )));
        };
        let expanded = eval_resources(resources, &sub_env, &format!("{path}.Resources"), ctx)?;
        let Value::Mapping(expanded) = expanded else {
            unreachable!("eval_resources yields a mapping");
        };
        for (key, value) in expanded {
            out.insert(
                Value::String(format!("{prefix}{}", ast::key_to_string(&key))),
                value,
            );
        }
    }

    for section in GLOBAL_SECTIONS {
        let Some(section_value) = ast::get(&resource_doc, section) else {
            continue;
        };
        let evaled = eval::eval(section_value, &sub_env, &format!("{path}.{section}"), ctx)?;
        let Value::Mapping(entries) = evaled else {
            return Err(IidyError::TemplateUse(format!(
                "template section '{section}' must evaluate to a mapping at {path} ({})",
                sub_env.location
            )));
        };
        for (key, value) in entries {
            let hoisted = format!("{prefix}{}", ast::key_to_string(&key));
            ctx.globals.add(section, hoisted, value, path)?;
        }
    }

    Ok(out)
}

/// Deep merge: overlay mappings merge recursively into base; everything else
/// is replaced by the overlay.
fn merge_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut out = base_map.clone();
            for (key, value) in overlay_map {
                let merged = match out.get(key) {
                    Some(existing) => merge_values(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Mapping(out)
        }
        _ => overlay.clone(),
    }
}

#[derive(Debug)]
struct ParamSpec {
    name: String,
    default: Option<Value>,
    schema: Option<Value>,
    allowed_values: Option<Vec<Value>>,
    allowed_pattern: Option<String>,
}

fn parse_params(template: &Mapping, path: &str) -> Result<Vec<ParamSpec>, IidyError> {
    let Some(params) = ast::get(template, ast::KEY_PARAMS) else {
        return Ok(Vec::new());
    };
    let Value::Sequence(params) = params else {
        return Err(IidyError::ParameterValidation(format!(
            "$params must be a sequence of declarations at {path}"
        )));
    };

    let mut specs = Vec::with_capacity(params.len());
    for declaration in params {
        let Value::Mapping(declaration) = declaration else {
            return Err(IidyError::ParameterValidation(format!(
                "each $params entry must be a mapping at {path}"
            )));
        };
        let name = ast::get_str(declaration, "Name").ok_or_else(|| {
            IidyError::ParameterValidation(format!(
                "$params entry is missing its Name at {path}"
            ))
        })?;

        let schema = match ast::get(declaration, "Schema") {
            None => None,
            Some(schema @ Value::Mapping(_)) => Some(schema.clone()),
            Some(_) => {
                return Err(IidyError::ParameterValidation(format!(
                    "Schema for parameter '{name}' must be a mapping at {path}"
                )))
            }
        };
        let allowed_values = match ast::get(declaration, "AllowedValues") {
            None => None,
            Some(Value::Sequence(values)) => Some(values.clone()),
            Some(_) => {
                return Err(IidyError::ParameterValidation(format!(
                    "AllowedValues for parameter '{name}' must be a sequence at {path}"
                )))
            }
        };
        let allowed_pattern = match ast::get(declaration, "AllowedPattern") {
            None => None,
            Some(Value::String(pattern)) => Some(pattern.clone()),
            Some(_) => {
                return Err(IidyError::ParameterValidation(format!(
                    "AllowedPattern for parameter '{name}' must be a string at {path}"
                )))
            }
        };

        specs.push(ParamSpec {
            name: name.to_string(),
            default: ast::get(declaration, "Default").cloned(),
            schema,
            allowed_values,
            allowed_pattern,
        });
    }
    Ok(specs)
}

fn validate_params(
    specs: &[ParamSpec],
    merged: &BTreeMap<String, Value>,
    path: &str,
    env: &Env,
) -> Result<(), IidyError> {
    for spec in specs {
        let Some(value) = merged.get(&spec.name) else {
            return Err(IidyError::ParameterValidation(format!(
                "missing required parameter '{}' at {path} ({})",
                spec.name, env.location
            )));
        };

        if let Some(schema) = &spec.schema {
            validate_schema(spec, schema, value, path, env)?;
        } else if let Some(allowed) = &spec.allowed_values {
            if !allowed.contains(value) {
                return Err(IidyError::ParameterValidation(format!(
                    "parameter '{}' at {path} ({}) is not in AllowedValues {}",
                    spec.name,
                    env.location,
                    render_allowed(allowed)
                )));
            }
        } else if let Some(pattern) = &spec.allowed_pattern {
            let Value::String(text) = value else {
                return Err(IidyError::ParameterValidation(format!(
                    "parameter '{}' at {path} must be a string to match AllowedPattern '{pattern}'",
                    spec.name
                )));
            };
            let compiled = Regex::new(pattern).map_err(|e| {
                IidyError::ParameterValidation(format!(
                    "invalid AllowedPattern for parameter '{}' at {path}: {e}",
                    spec.name
                ))
            })?;
            if !compiled.is_match(text) {
                return Err(IidyError::ParameterValidation(format!(
                    "parameter '{}' value '{text}' at {path} ({}) does not match AllowedPattern '{pattern}'",
                    spec.name, env.location
                )));
            }
        }
    }
    Ok(())
}

fn validate_schema(
    spec: &ParamSpec,
    schema: &Value,
    value: &Value,
    path: &str,
    env: &Env,
) -> Result<(), IidyError> {
    let schema_json = codec::yaml_to_json(schema)?;
    let instance = codec::yaml_to_json(value)?;

    let validator = jsonschema::validator_for(&schema_json).map_err(|e| {
        IidyError::ParameterValidation(format!(
            "invalid Schema for parameter '{}' at {path}: {e}",
            spec.name
        ))
    })?;

    let output = validator.apply(&instance).basic();
    if let jsonschema::BasicOutput::Invalid(errors) = output {
        let messages = errors.iter().fold(String::new(), |acc, e| {
            format!("{acc}\n  {} at {}", e.error_description(), e.instance_location())
        });
        let rendered_schema = serde_json::to_string(&schema_json).unwrap_or_default();
        return Err(IidyError::ParameterValidation(format!(
            "parameter '{}' at {path} ({}) failed Schema {rendered_schema}:{messages}",
            spec.name, env.location
        )));
    }
    Ok(())
}

fn render_allowed(allowed: &[Value]) -> String {
    let rendered: Vec<String> = allowed
        .iter()
        .map(|v| ast::scalar_to_string(v).unwrap_or_else(|| "?".to_string()))
        .collect();
    format!("[{}]", rendered.join(", "))
}
