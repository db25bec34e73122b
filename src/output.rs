//! Final output assembly: provenance stamping, template seeding, hoisted
//! section merging, and root meta-key stripping.

use serde_yaml::{Mapping, Value};

use crate::ast;
use crate::error::IidyError;
use crate::expand::{GlobalAccumulator, GLOBAL_SECTIONS};
use crate::imports::ImportRecord;

// Sections guaranteed to exist (possibly empty) on template-like output.
const SEEDED_SECTIONS: [&str; 4] = ["Parameters", "Conditions", "Mappings", "Outputs"];

/// Finalises the evaluated root document.
pub fn assemble(
    evaluated: Value,
    records: &[ImportRecord],
    globals: &GlobalAccumulator,
) -> Result<Value, IidyError> {
    let Value::Mapping(mut root) = evaluated else {
        return Ok(evaluated);
    };

    if looks_like_template(&root) {
        stamp_provenance(&mut root, records);
        ast::insert(
            &mut root,
            "AWSTemplateFormatVersion",
            Value::String("2010-09-09".to_string()),
        );
        for section in SEEDED_SECTIONS {
            if !ast::contains(&root, section) {
                ast::insert(&mut root, section, Value::Mapping(Mapping::new()));
            }
        }
    }

    for section in GLOBAL_SECTIONS {
        let Some(hoisted) = globals.section(section) else {
            continue;
        };
        if hoisted.is_empty() {
            continue;
        }
        let mut merged = match ast::get(&root, section) {
            Some(Value::Mapping(existing)) => existing.clone(),
            _ => Mapping::new(),
        };
        for (key, value) in hoisted {
            merged.insert(key.clone(), value.clone());
        }
        ast::insert(&mut root, section, Value::Mapping(merged));
    }

    // The walker already drops meta-keys; the root strip is the contract.
    let mut stripped = Mapping::new();
    for (key, value) in root {
        if matches!(key.as_str(), Some(name) if ast::META_KEYS.contains(&name)) {
            continue;
        }
        stripped.insert(key, value);
    }
    Ok(Value::Mapping(stripped))
}

fn looks_like_template(root: &Mapping) -> bool {
    ast::contains(root, "AWSTemplateFormatVersion") || ast::contains(root, "Resources")
}

fn stamp_provenance(root: &mut Mapping, records: &[ImportRecord]) {
    let mut provenance = Mapping::new();
    ast::insert(&mut provenance, "Host", Value::String(current_host()));
    ast::insert(&mut provenance, "User", Value::String(current_user()));
    ast::insert(
        &mut provenance,
        "Imports",
        Value::Sequence(records.iter().map(record_to_value).collect()),
    );

    let mut metadata = match ast::get(root, "Metadata") {
        Some(Value::Mapping(existing)) => existing.clone(),
        _ => Mapping::new(),
    };
    ast::insert(&mut metadata, "iidy", Value::Mapping(provenance));
    ast::insert(root, "Metadata", Value::Mapping(metadata));
}

fn record_to_value(record: &ImportRecord) -> Value {
    let mut entry = Mapping::new();
    ast::insert(&mut entry, "key", Value::String(record.key.clone()));
    ast::insert(&mut entry, "from", Value::String(record.from.clone()));
    ast::insert(&mut entry, "imported", Value::String(record.imported.clone()));
    ast::insert(
        &mut entry,
        "sha256Digest",
        Value::String(record.sha256_digest.clone()),
    );
    Value::Mapping(entry)
}

fn current_host() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.is_empty() {
            return host;
        }
    }
    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
