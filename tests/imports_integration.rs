use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_yaml::Value;

use iidy::{loader::sha256_hex, transform_from_path};

struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn new(prefix: &str) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "iidy_{}_{}_{}",
            prefix,
            std::process::id(),
            stamp
        ));
        fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    fn write(&self, file: &str, content: &str) {
        let target = self.path.join(file);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(target, content).expect("write temp file");
    }

    fn file_path(&self, file: &str) -> PathBuf {
        self.path.join(file)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

fn transform(path: &Path) -> Value {
    transform_from_path(path).expect("transform")
}

fn get<'a>(doc: &'a Value, path: &[&str]) -> &'a Value {
    let mut current = doc;
    for segment in path {
        let Value::Mapping(map) = current else {
            panic!("expected mapping while walking {path:?}");
        };
        current = map
            .get(&Value::String(segment.to_string()))
            .unwrap_or_else(|| panic!("missing key '{segment}' while walking {path:?}"));
    }
    current
}

#[test]
fn relative_imports_resolve_against_the_importing_file() {
    let dir = TempDir::new("relative");
    dir.write(
        "stacks/main.yaml",
        "$imports:\n  common: ../shared/common.yaml\nRegion: !$include common.region\n",
    );
    dir.write("shared/common.yaml", "region: eu-west-1\n");

    let out = transform(&dir.file_path("stacks/main.yaml"));
    assert_eq!(get(&out, &["Region"]), &Value::String("eu-west-1".to_string()));
}

#[test]
fn nested_imports_resolve_from_their_own_directory() {
    let dir = TempDir::new("nested");
    dir.write(
        "main.yaml",
        "$imports:\n  outer: lib/outer.yaml\nValue: !$include outer.combined\n",
    );
    dir.write(
        "lib/outer.yaml",
        "$imports:\n  inner: inner.yaml\ncombined: !$include inner.value\n",
    );
    dir.write("lib/inner.yaml", "value: from-inner\n");

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Value"]), &Value::String("from-inner".to_string()));
}

#[test]
fn provenance_digests_match_the_files_on_disk() {
    let dir = TempDir::new("digests");
    let shared = "region: us-east-1\n";
    dir.write(
        "main.yaml",
        "Resources: {}\n$imports:\n  shared: shared.yaml\n",
    );
    dir.write("shared.yaml", shared);

    let out = transform(&dir.file_path("main.yaml"));
    let Value::Sequence(imports) = get(&out, &["Metadata", "iidy", "Imports"]) else {
        panic!("expected Imports sequence");
    };
    assert_eq!(imports.len(), 1);
    assert_eq!(
        get(&imports[0], &["sha256Digest"]),
        &Value::String(sha256_hex(shared.as_bytes()))
    );
    let Value::String(imported) = get(&imports[0], &["imported"]) else {
        panic!("expected imported location string");
    };
    assert!(imported.ends_with("shared.yaml"));
}

#[test]
fn env_imports_read_process_variables() {
    let dir = TempDir::new("env");
    std::env::set_var("IIDY_IT_STAGE", "prod");
    dir.write(
        "main.yaml",
        "$imports:\n  stage: env:IIDY_IT_STAGE\n  fallback: 'env:IIDY_IT_MISSING:dev'\nStage: '{{stage}}'\nFallback: '{{fallback}}'\n",
    );

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Stage"]), &Value::String("prod".to_string()));
    assert_eq!(get(&out, &["Fallback"]), &Value::String("dev".to_string()));
}

#[test]
fn missing_env_import_without_default_fails() {
    let dir = TempDir::new("env_missing");
    dir.write("main.yaml", "$imports:\n  gone: env:IIDY_IT_ABSENT\n");

    let err = transform_from_path(dir.file_path("main.yaml")).unwrap_err();
    assert!(err.to_string().contains("IIDY_IT_ABSENT"));
}

#[test]
fn import_locations_interpolate_earlier_bindings() {
    let dir = TempDir::new("interpolated");
    std::env::set_var("IIDY_IT_TIER", "gold");
    dir.write(
        "main.yaml",
        "$imports:\n  tier: env:IIDY_IT_TIER\n  config: 'config-{{tier}}.yaml'\nLimit: !$include config.limit\n",
    );
    dir.write("config-gold.yaml", "limit: 100\n");

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Limit"]), &Value::Number(100.into()));
}

#[test]
fn json_imports_are_decoded_as_json() {
    let dir = TempDir::new("json");
    dir.write(
        "main.yaml",
        "$imports:\n  params: params.json\nSize: !$include params.size\n",
    );
    dir.write("params.json", r#"{"size": 42}"#);

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Size"]), &Value::Number(42.into()));
}

#[test]
fn raw_text_imports_stay_strings() {
    let dir = TempDir::new("raw");
    dir.write("main.yaml", "$imports:\n  motd: motd.txt\nBanner: '{{motd}}'\n");
    dir.write("motd.txt", "be kind");

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Banner"]), &Value::String("be kind".to_string()));
}

#[test]
fn format_suffix_forces_decoding_of_plain_files() {
    let dir = TempDir::new("forced");
    dir.write(
        "main.yaml",
        "$imports:\n  params: 'params.txt:yaml'\nSize: !$include params.size\n",
    );
    dir.write("params.txt", "size: 7\n");

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Size"]), &Value::Number(7.into()));
}

#[test]
fn literal_imports_still_resolve_with_a_warning() {
    let dir = TempDir::new("literal");
    dir.write(
        "main.yaml",
        "$imports:\n  note: 'literal:deprecated but alive'\nNote: '{{note}}'\n",
    );

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(
        get(&out, &["Note"]),
        &Value::String("deprecated but alive".to_string())
    );
}

#[test]
fn filehash_imports_digest_file_contents() {
    let dir = TempDir::new("filehash");
    dir.write("data.bin", "payload");
    let location = format!("filehash:{}", dir.file_path("data.bin").display());
    dir.write(
        "main.yaml",
        &format!("$imports:\n  sum: '{location}'\nSum: '{{{{sum}}}}'\n"),
    );

    let out = transform(&dir.file_path("main.yaml"));
    assert_eq!(get(&out, &["Sum"]), &Value::String(sha256_hex(b"payload")));
}

#[test]
fn import_cycles_hit_the_depth_limit() {
    let dir = TempDir::new("cycle");
    dir.write("a.yaml", "$imports:\n  other: b.yaml\n");
    dir.write("b.yaml", "$imports:\n  other: a.yaml\n");

    let err = transform_from_path(dir.file_path("a.yaml")).unwrap_err();
    assert!(err.to_string().contains("depth limit"));
}
