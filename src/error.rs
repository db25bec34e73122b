//! Error definitions for all `iidy` transform stages.

use thiserror::Error;

#[derive(Debug, Error)]
/// Top-level error type returned by public APIs.
pub enum IidyError {
    /// Document parsing failure (YAML or JSON).
    #[error("parse error: {0}")]
    Parse(String),
    /// Unknown scheme, disallowed scheme, invalid location, or loader failure.
    #[error("import error: {0}")]
    Import(String),
    /// Duplicate name across `$imports`/`$defs`/`$params` in one document.
    #[error("name collision: {0}")]
    NameCollision(String),
    /// `$include` or interpolation referenced an unbound name or missing selector.
    #[error("lookup error: {0}")]
    Lookup(String),
    /// Unknown resource type, or a template used where it must be expanded.
    #[error("template use error: {0}")]
    TemplateUse(String),
    /// Missing required parameter or Schema/AllowedValues/AllowedPattern failure.
    #[error("parameter validation error: {0}")]
    ParameterValidation(String),
    /// Malformed payload to `$expand`, `$map`, `$flatten`, and friends.
    #[error("macro error: {0}")]
    MacroShape(String),
    /// `$merge` or an expansion collided with an existing key.
    #[error("merge conflict: {0}")]
    MergeConflict(String),
    /// String-template compile or render failure.
    #[error("interpolation error: {0}")]
    Interpolation(String),
    /// Output serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Filesystem I/O error from CLI or callers that propagate I/O.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
