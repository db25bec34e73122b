//! Recursive `$imports` resolution and lexical scope construction.
//!
//! Walks a document's `$imports` in declaration order, loads each location,
//! binds the result (plus `$defs`) into the document's `$envValues`, and
//! recurses into loaded documents that declare imports of their own. Every
//! load is appended to a flat provenance log with its SHA-256 digest.

use serde_yaml::{Mapping, Value};

use crate::ast;
use crate::error::IidyError;
use crate::interp;
use crate::loader::{self, Loader};

/// Recursion bound standing in for cycle detection.
pub const MAX_IMPORT_DEPTH: usize = 50;

/// One entry of the provenance log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Name the import is bound under.
    pub key: String,
    /// Location of the document that declared the import.
    pub from: String,
    /// Fully-resolved location that was fetched.
    pub imported: String,
    /// Lowercase hex SHA-256 of the raw loaded bytes.
    pub sha256_digest: String,
}

/// Resolves `$imports`/`$defs`/`$params` names for `doc` and every document
/// it transitively imports, attaching `$envValues` (and `$location` on
/// imported mappings) along the way.
pub fn resolve_imports(
    doc: &mut Value,
    location: &str,
    loader_impl: &mut dyn Loader,
    records: &mut Vec<ImportRecord>,
) -> Result<(), IidyError> {
    resolve_at_depth(doc, location, loader_impl, records, 0)
}

fn resolve_at_depth(
    doc: &mut Value,
    location: &str,
    loader_impl: &mut dyn Loader,
    records: &mut Vec<ImportRecord>,
    depth: usize,
) -> Result<(), IidyError> {
    if depth > MAX_IMPORT_DEPTH {
        return Err(IidyError::Import(format!(
            "import depth limit ({MAX_IMPORT_DEPTH}) exceeded at '{location}'; import cycle?"
        )));
    }

    let Value::Mapping(map) = doc else {
        return Ok(());
    };

    let mut env_values = Mapping::new();

    if let Some(imports) = ast::get(map, ast::KEY_IMPORTS) {
        let Value::Mapping(imports) = imports else {
            return Err(IidyError::Import(format!(
                "$imports must be a mapping at '{location}'"
            )));
        };

        for (as_key, loc_expr) in imports {
            let as_key = as_key.as_str().ok_or_else(|| {
                IidyError::Import(format!("$imports keys must be strings at '{location}'"))
            })?;
            let raw = loc_expr.as_str().ok_or_else(|| {
                IidyError::Import(format!(
                    "import location for '{as_key}' must be a string at '{location}'"
                ))
            })?;

            // Later imports may splice earlier bindings into their location.
            let loc = if interp::has_template(raw) {
                interp::render(raw, location, &|name| {
                    ast::get(&env_values, name).cloned()
                })?
            } else {
                raw.to_string()
            };

            let mut loaded = loader_impl.load(&loc, location)?;
            if let Value::Mapping(loaded_map) = &mut loaded.doc {
                ast::insert(
                    loaded_map,
                    ast::KEY_LOCATION,
                    Value::String(loaded.resolved_location.clone()),
                );
            }

            records.push(ImportRecord {
                key: as_key.to_string(),
                from: location.to_string(),
                imported: loaded.resolved_location.clone(),
                sha256_digest: loader::sha256_hex(loaded.data.as_bytes()),
            });

            if ast::contains(&env_values, as_key) {
                return Err(IidyError::NameCollision(format!(
                    "duplicate import name '{as_key}' at '{location}'"
                )));
            }

            let mut child = loaded.doc;
            if declares_bindings(&child) {
                resolve_at_depth(
                    &mut child,
                    &loaded.resolved_location,
                    loader_impl,
                    records,
                    depth + 1,
                )?;
            }
            ast::insert(&mut env_values, as_key, child);
        }
    }

    if let Some(defs) = ast::get(map, ast::KEY_DEFS) {
        let Value::Mapping(defs) = defs else {
            return Err(IidyError::Import(format!(
                "$defs must be a mapping at '{location}'"
            )));
        };
        for (name, value) in defs {
            let name = name.as_str().ok_or_else(|| {
                IidyError::Import(format!("$defs keys must be strings at '{location}'"))
            })?;
            if ast::contains(&env_values, name) {
                return Err(IidyError::NameCollision(format!(
                    "'{name}' is declared by both $imports and $defs at '{location}'"
                )));
            }
            ast::insert(&mut env_values, name, value.clone());
        }
    }

    if let Some(params) = ast::get(map, ast::KEY_PARAMS) {
        let Value::Sequence(params) = params else {
            return Err(IidyError::Import(format!(
                "$params must be a sequence at '{location}'"
            )));
        };
        for param in params {
            let Value::Mapping(param) = param else {
                continue;
            };
            if let Some(name) = ast::get_str(param, "Name") {
                if ast::contains(&env_values, name) {
                    return Err(IidyError::NameCollision(format!(
                        "parameter '{name}' collides with an import or def at '{location}'"
                    )));
                }
            }
        }
    }

    ast::insert(map, ast::KEY_ENV_VALUES, Value::Mapping(env_values));
    Ok(())
}

fn declares_bindings(doc: &Value) -> bool {
    matches!(
        doc,
        Value::Mapping(map)
            if ast::contains(map, ast::KEY_IMPORTS) || ast::contains(map, ast::KEY_DEFS)
    )
}
