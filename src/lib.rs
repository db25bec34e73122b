//! `iidy` pre-processes declarative infrastructure documents (most commonly
//! AWS CloudFormation templates) into fully-resolved output.
//!
//! A document goes through these stages:
//! 1. Parsing into a tagged value tree (`codec`).
//! 2. Recursive import resolution and scope construction (`imports`,
//!    backed by a pluggable `loader`).
//! 3. Tree-walking evaluation: interpolation, data-level macros, and
//!    resource-template expansion (`eval`, `interp`, `expand`).
//! 4. Output assembly: hoisted-section merging, meta-key stripping, and
//!    provenance stamping (`output`).
//!
//! Use [`transform`] with an already-parsed document, [`transform_str`] for
//! raw text, or [`transform_from_path`] to read, resolve, and evaluate a
//! file with the default scheme-dispatching loader.

/// Document model helpers over the tagged YAML value tree.
pub mod ast;
/// Structured-document parsing and dumping (YAML and JSON).
pub mod codec;
/// Error types used throughout the transform pipeline.
pub mod error;
/// Tree-walking evaluator and environment handling.
pub mod eval;
/// Resource-template expansion and global-section hoisting.
pub mod expand;
/// Recursive `$imports` resolution and provenance recording.
pub mod imports;
/// Strict `{{...}}` string interpolation.
pub mod interp;
/// The `Loader` trait and the scheme-backed default loader.
pub mod loader;
/// Import location classification and resolution.
pub mod location;
/// Final output assembly.
pub mod output;

use std::path::Path;

use serde_yaml::Value;

pub use error::IidyError;
pub use eval::{Env, EvalContext};
pub use imports::ImportRecord;
pub use loader::{DefaultLoader, LoadedImport, Loader};

/// Transforms a parsed root document into fully-resolved output.
///
/// The loader is invoked for every `$imports` entry, sequentially and in
/// declaration order; any loader failure aborts the transform.
pub fn transform(
    root: Value,
    root_location: &str,
    loader: &mut dyn Loader,
) -> Result<Value, IidyError> {
    let mut doc = root;
    let mut records = Vec::new();
    imports::resolve_imports(&mut doc, root_location, loader, &mut records)?;

    let mut ctx = EvalContext::default();
    let env = Env::root(root_location);
    let evaluated = eval::eval(&doc, &env, "$", &mut ctx)?;

    output::assemble(evaluated, &records, &ctx.globals)
}

/// Parses document text (YAML, or JSON for `.json` locations) and transforms it.
pub fn transform_str(
    input: &str,
    location: &str,
    loader: &mut dyn Loader,
) -> Result<Value, IidyError> {
    let doc = codec::parse(input, location)?;
    transform(doc, location, loader)
}

/// Reads and transforms a file with the default loader.
///
/// Import locations inside the document resolve relative to the file's
/// directory.
pub fn transform_from_path(path: impl AsRef<Path>) -> Result<Value, IidyError> {
    let path = path.as_ref();
    let input = std::fs::read_to_string(path)?;
    let mut loader = DefaultLoader;
    transform_str(&input, &path.to_string_lossy(), &mut loader)
}

/// Serializes transformed output as YAML text.
pub fn render_yaml(doc: &Value) -> Result<String, IidyError> {
    codec::dump_yaml(doc)
}

/// Serializes transformed output as JSON text.
pub fn render_json(doc: &Value, pretty: bool) -> Result<String, IidyError> {
    codec::dump_json(doc, pretty)
}
