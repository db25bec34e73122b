//! Pluggable import loading: the `Loader` trait and the scheme-backed default.
//!
//! `DefaultLoader` performs the actual fetches: filesystem reads, blocking
//! HTTP, `git` and `aws` subprocesses, environment lookups, and the
//! generator schemes (`random`, `filehash`, `literal`). Callers that need a
//! different backend (tests above all) supply their own `Loader`.

use std::fs;
use std::path::Path;
use std::process::Command;

use rand::Rng;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::IidyError;
use crate::location::{self, DocFormat, ImportLocation, Scheme};

/// One resolved and fetched import.
#[derive(Debug, Clone)]
pub struct LoadedImport {
    /// Scheme name of the resolved location (`file`, `s3`, ...).
    pub import_type: String,
    /// Canonical form of the resolved location.
    pub resolved_location: String,
    /// Raw fetched text, exactly as returned by the backend.
    pub data: String,
    /// Decoded document, or `Value::String(data)` when no decoding applies.
    pub doc: Value,
}

/// Location fetcher used by the import walker.
pub trait Loader {
    fn load(&mut self, location: &str, base_location: &str) -> Result<LoadedImport, IidyError>;
}

/// The scheme-dispatching loader described in the location syntax.
#[derive(Debug, Default)]
pub struct DefaultLoader;

impl Loader for DefaultLoader {
    fn load(&mut self, location: &str, base_location: &str) -> Result<LoadedImport, IidyError> {
        let base = location::parse_location(base_location)?;
        let resolved = location::resolve_child(&base, location)?;
        fetch(&resolved)
    }
}

/// Computes the lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn fetch(loc: &ImportLocation) -> Result<LoadedImport, IidyError> {
    let (data, doc) = match loc.scheme {
        Scheme::File => {
            let data = fs::read_to_string(&loc.payload).map_err(|e| {
                IidyError::Import(format!("failed to read import '{}': {e}", loc.payload))
            })?;
            let doc = decode(&data, loc)?;
            (data, doc)
        }
        Scheme::Http => {
            let data = fetch_url(&loc.payload)?;
            let doc = decode(&data, loc)?;
            (data, doc)
        }
        Scheme::S3 => {
            let url = format!("s3://{}", loc.payload);
            let data = run_command("aws", &["s3", "cp", &url, "-"], &url)?;
            let doc = decode(&data, loc)?;
            (data, doc)
        }
        Scheme::Ssm => {
            let data = run_command(
                "aws",
                &[
                    "ssm",
                    "get-parameter",
                    "--name",
                    &loc.payload,
                    "--with-decryption",
                    "--query",
                    "Parameter.Value",
                    "--output",
                    "text",
                ],
                &loc.to_string(),
            )?;
            let data = data.trim_end_matches('\n').to_string();
            let doc = decode(&data, loc)?;
            (data, doc)
        }
        Scheme::SsmPath => {
            let prefix = normalize_ssm_prefix(&loc.payload);
            let data = run_command(
                "aws",
                &[
                    "ssm",
                    "get-parameters-by-path",
                    "--path",
                    &prefix,
                    "--recursive",
                    "--with-decryption",
                    "--output",
                    "json",
                ],
                &loc.to_string(),
            )?;
            let doc = ssm_path_to_mapping(&data, &prefix, loc.format)?;
            (data, doc)
        }
        Scheme::Env => {
            let data = lookup_env(&loc.payload)?;
            (data.clone(), Value::String(data))
        }
        Scheme::Git => {
            let data = git_value(&loc.payload)?;
            (data.clone(), Value::String(data))
        }
        Scheme::Random => {
            let data = random_value(&loc.payload)?;
            (data.clone(), Value::String(data))
        }
        Scheme::Filehash => {
            let data = filehash_value(&loc.payload)?;
            (data.clone(), Value::String(data))
        }
        Scheme::Literal => {
            eprintln!("iidy: warning: 'literal:' imports are deprecated; use $defs instead");
            (loc.payload.clone(), Value::String(loc.payload.clone()))
        }
    };

    Ok(LoadedImport {
        import_type: loc.scheme.as_str().to_string(),
        resolved_location: loc.to_string(),
        data,
        doc,
    })
}

/// Decodes fetched text: a forced `:json`/`:yaml` format wins, then the
/// location's file extension, then the raw string is kept as-is.
fn decode(data: &str, loc: &ImportLocation) -> Result<Value, IidyError> {
    match loc.format {
        Some(DocFormat::Json) => codec::parse_json(data),
        Some(DocFormat::Yaml) => codec::parse_yaml(data),
        None => {
            if loc.payload.ends_with(".yaml") || loc.payload.ends_with(".yml") {
                codec::parse_yaml(data)
            } else if loc.payload.ends_with(".json") {
                codec::parse_json(data)
            } else {
                Ok(Value::String(data.to_string()))
            }
        }
    }
}

fn fetch_url(url: &str) -> Result<String, IidyError> {
    ureq::get(url)
        .call()
        .map_err(|e| IidyError::Import(format!("HTTP request to '{url}' failed: {e}")))?
        .into_body()
        .read_to_string()
        .map_err(|e| IidyError::Import(format!("failed to read response body from '{url}': {e}")))
}

fn run_command(program: &str, args: &[&str], context: &str) -> Result<String, IidyError> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        IidyError::Import(format!("failed to run '{program}' for '{context}': {e}"))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IidyError::Import(format!(
            "'{program}' failed for '{context}': {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn lookup_env(payload: &str) -> Result<String, IidyError> {
    let (name, default) = match payload.split_once(':') {
        Some((name, default)) => (name, Some(default)),
        None => (payload, None),
    };
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            IidyError::Import(format!(
                "environment variable '{name}' is not set and has no default"
            ))
        }),
    }
}

fn git_value(payload: &str) -> Result<String, IidyError> {
    let args: &[&str] = match payload {
        "branch" => &["rev-parse", "--abbrev-ref", "HEAD"],
        "describe" => &["describe", "--dirty"],
        "sha" => &["rev-parse", "HEAD"],
        other => {
            return Err(IidyError::Import(format!(
                "invalid git import 'git:{other}'; expected branch, describe, or sha"
            )))
        }
    };
    Ok(run_command("git", args, payload)?.trim().to_string())
}

const ADJECTIVES: [&str; 16] = [
    "amber", "brisk", "calm", "dusky", "eager", "fuzzy", "glad", "hazy", "icy", "jolly", "keen",
    "lively", "mellow", "nimble", "polished", "quiet",
];

const NOUNS: [&str; 16] = [
    "aurora", "badger", "cedar", "delta", "ember", "falcon", "garnet", "harbor", "iris", "jasper",
    "kestrel", "lagoon", "meadow", "nebula", "otter", "prairie",
];

fn random_dashed_name() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}-{}-{}",
        ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
        NOUNS[rng.gen_range(0..NOUNS.len())],
        rng.gen_range(1..1000)
    )
}

fn random_value(payload: &str) -> Result<String, IidyError> {
    match payload {
        "dashed-name" => Ok(random_dashed_name()),
        // Only the first dash is stripped; the trailing number keeps its own.
        "name" => Ok(random_dashed_name().replacen('-', "", 1)),
        "int" => Ok(rand::thread_rng().gen_range(1..1000).to_string()),
        other => Err(IidyError::Import(format!(
            "invalid random import 'random:{other}'; expected dashed-name, name, or int"
        ))),
    }
}

fn filehash_value(payload: &str) -> Result<String, IidyError> {
    let path = Path::new(payload);
    if path.is_dir() {
        let mut listing = Vec::new();
        collect_relative_files(path, path, &mut listing)?;
        listing.sort();
        Ok(sha256_hex(listing.join("\n").as_bytes()))
    } else {
        let bytes = fs::read(path).map_err(|e| {
            IidyError::Import(format!("failed to read '{payload}' for filehash: {e}"))
        })?;
        Ok(sha256_hex(&bytes))
    }
}

fn collect_relative_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<String>,
) -> Result<(), IidyError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| IidyError::Import(format!("failed to list '{}': {e}", dir.display())))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| IidyError::Import(format!("failed to list '{}': {e}", dir.display())))?;
        let path = entry.path();
        if path.is_dir() {
            collect_relative_files(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            out.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

fn normalize_ssm_prefix(payload: &str) -> String {
    if payload.ends_with('/') {
        payload.to_string()
    } else {
        format!("{payload}/")
    }
}

/// Lifts `aws ssm get-parameters-by-path` JSON output into a mapping of
/// prefix-relative names to (optionally decoded) values.
fn ssm_path_to_mapping(
    stdout: &str,
    prefix: &str,
    format: Option<DocFormat>,
) -> Result<Value, IidyError> {
    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| IidyError::Import(format!("unexpected ssm-path output: {e}")))?;
    let parameters = parsed
        .get("Parameters")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            IidyError::Import("unexpected ssm-path output: missing Parameters".to_string())
        })?;

    let mut out = Mapping::new();
    for parameter in parameters {
        let name = parameter
            .get("Name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                IidyError::Import("unexpected ssm-path output: parameter without Name".to_string())
            })?;
        let value = parameter
            .get("Value")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let relative = name.strip_prefix(prefix).unwrap_or(name);
        let decoded = match format {
            Some(DocFormat::Json) => codec::parse_json(value)?,
            Some(DocFormat::Yaml) => codec::parse_yaml(value)?,
            None => Value::String(value.to_string()),
        };
        out.insert(Value::String(relative.to_string()), decoded);
    }
    Ok(Value::Mapping(out))
}
