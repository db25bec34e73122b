//! Import location classification and resolution.
//!
//! A location is `scheme:payload[:format]`. Schemeless locations are file
//! paths. Children of a remote (`s3`/`http`) base inherit the base's scheme
//! when they carry none of their own, and must not reach back into the local
//! machine via `file:` or `env:`.

use std::fmt;
use std::path::Path;

use crate::error::IidyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    File,
    S3,
    Http,
    Ssm,
    SsmPath,
    Env,
    Git,
    Random,
    Filehash,
    Literal,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::S3 => "s3",
            Scheme::Http => "http",
            Scheme::Ssm => "ssm",
            Scheme::SsmPath => "ssm-path",
            Scheme::Env => "env",
            Scheme::Git => "git",
            Scheme::Random => "random",
            Scheme::Filehash => "filehash",
            Scheme::Literal => "literal",
        }
    }

    /// Remote bases propagate their scheme to unscoped children and reject
    /// local-machine schemes.
    pub fn is_remote(self) -> bool {
        matches!(self, Scheme::S3 | Scheme::Http)
    }
}

/// Forced post-fetch decoding, from a `:json` / `:yaml` location suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Yaml,
    Json,
}

/// A classified, fully-resolved import location.
///
/// Payload conventions: `File` holds a filesystem path, `Http` the full URL,
/// `S3` a `bucket/key` pair, every other scheme its raw payload text.
#[derive(Debug, Clone)]
pub struct ImportLocation {
    pub scheme: Scheme,
    pub payload: String,
    pub format: Option<DocFormat>,
}

impl fmt::Display for ImportLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::File | Scheme::Http => write!(f, "{}", self.payload),
            Scheme::S3 => write!(f, "s3://{}", self.payload),
            other => write!(f, "{}:{}", other.as_str(), self.payload),
        }
    }
}

// Longest prefixes first, so `ssm-path:` wins over `ssm:`.
const SCHEME_PREFIXES: [(&str, Scheme); 11] = [
    ("ssm-path:", Scheme::SsmPath),
    ("filehash:", Scheme::Filehash),
    ("literal:", Scheme::Literal),
    ("random:", Scheme::Random),
    ("https:", Scheme::Http),
    ("file:", Scheme::File),
    ("http:", Scheme::Http),
    ("ssm:", Scheme::Ssm),
    ("env:", Scheme::Env),
    ("git:", Scheme::Git),
    ("s3:", Scheme::S3),
];

fn split_scheme(raw: &str) -> Option<(Scheme, &str)> {
    SCHEME_PREFIXES
        .iter()
        .find_map(|(prefix, scheme)| raw.strip_prefix(prefix).map(|rest| (*scheme, rest)))
}

// The format suffix only makes sense where a document is fetched; `env:` and
// friends would swallow their own payloads otherwise.
fn takes_format_suffix(scheme: Scheme) -> bool {
    matches!(
        scheme,
        Scheme::File | Scheme::S3 | Scheme::Http | Scheme::Ssm | Scheme::SsmPath
    )
}

fn split_format(payload: &str) -> (&str, Option<DocFormat>) {
    match payload.rsplit_once(':') {
        Some((rest, "json")) => (rest, Some(DocFormat::Json)),
        Some((rest, "yaml")) => (rest, Some(DocFormat::Yaml)),
        _ => (payload, None),
    }
}

fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}{}", home, &path[1..]);
        }
    }
    path.to_string()
}

/// Parses a location with no base context (used for the transform root).
pub fn parse_location(raw: &str) -> Result<ImportLocation, IidyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IidyError::Import(
            "import location must be a non-empty string".to_string(),
        ));
    }

    match split_scheme(trimmed) {
        Some((Scheme::Http, _)) => {
            let (payload, format) = split_format(trimmed);
            Ok(ImportLocation {
                scheme: Scheme::Http,
                payload: payload.to_string(),
                format,
            })
        }
        Some((Scheme::S3, rest)) => {
            let (payload, format) = split_format(rest);
            let payload = payload.strip_prefix("//").ok_or_else(|| {
                IidyError::Import(format!(
                    "invalid s3 location '{trimmed}'; expected s3://bucket/key"
                ))
            })?;
            Ok(ImportLocation {
                scheme: Scheme::S3,
                payload: payload.to_string(),
                format,
            })
        }
        Some((Scheme::File, rest)) => {
            let (payload, format) = split_format(rest);
            Ok(ImportLocation {
                scheme: Scheme::File,
                payload: expand_tilde(payload),
                format,
            })
        }
        Some((scheme, rest)) => {
            let (payload, format) = if takes_format_suffix(scheme) {
                split_format(rest)
            } else {
                (rest, None)
            };
            Ok(ImportLocation {
                scheme,
                payload: payload.to_string(),
                format,
            })
        }
        None => {
            let (payload, format) = split_format(trimmed);
            Ok(ImportLocation {
                scheme: Scheme::File,
                payload: expand_tilde(payload),
                format,
            })
        }
    }
}

/// Resolves a child location against its base, applying scheme inheritance,
/// the remote security boundary, and relative-reference resolution.
pub fn resolve_child(base: &ImportLocation, raw: &str) -> Result<ImportLocation, IidyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IidyError::Import(
            "import location must be a non-empty string".to_string(),
        ));
    }

    match split_scheme(trimmed) {
        Some((scheme, _)) if base.scheme.is_remote() && matches!(scheme, Scheme::File | Scheme::Env) => {
            Err(IidyError::Import(format!(
                "scheme '{}' is not allowed when importing from remote base '{base}'",
                scheme.as_str()
            )))
        }
        Some((Scheme::File, rest)) => {
            let (payload, format) = split_format(rest);
            Ok(resolve_file(payload, format, base))
        }
        Some((Scheme::S3, rest)) => {
            let (payload, format) = split_format(rest);
            resolve_s3(payload, format, base, trimmed)
        }
        Some(_) => parse_location(trimmed),
        None => match base.scheme {
            Scheme::S3 => {
                let (payload, format) = split_format(trimmed);
                resolve_s3(payload, format, base, trimmed)
            }
            Scheme::Http => {
                let (payload, format) = split_format(trimmed);
                Ok(ImportLocation {
                    scheme: Scheme::Http,
                    payload: resolve_relative_url(&url_directory(&base.payload), payload),
                    format,
                })
            }
            _ => {
                let (payload, format) = split_format(trimmed);
                Ok(resolve_file(payload, format, base))
            }
        },
    }
}

fn resolve_file(payload: &str, format: Option<DocFormat>, base: &ImportLocation) -> ImportLocation {
    if base.scheme != Scheme::File {
        eprintln!("iidy: warning: file import '{payload}' from non-file base '{base}'");
    }
    let expanded = expand_tilde(payload);
    let path = Path::new(&expanded);
    let payload = if path.is_absolute() || base.scheme != Scheme::File {
        expanded
    } else {
        let base_dir = Path::new(&base.payload).parent().unwrap_or_else(|| Path::new(""));
        base_dir.join(path).to_string_lossy().into_owned()
    };
    ImportLocation {
        scheme: Scheme::File,
        payload,
        format,
    }
}

fn resolve_s3(
    payload: &str,
    format: Option<DocFormat>,
    base: &ImportLocation,
    raw: &str,
) -> Result<ImportLocation, IidyError> {
    if let Some(absolute) = payload.strip_prefix("//") {
        return Ok(ImportLocation {
            scheme: Scheme::S3,
            payload: absolute.to_string(),
            format,
        });
    }
    if base.scheme != Scheme::S3 {
        return Err(IidyError::Import(format!(
            "relative s3 location '{raw}' requires an s3 base, got '{base}'"
        )));
    }
    Ok(ImportLocation {
        scheme: Scheme::S3,
        payload: join_relative(&url_directory(&base.payload), payload),
        format,
    })
}

/// Truncates a URL or key to its containing directory, keeping the slash.
fn url_directory(location: &str) -> String {
    match location.rfind('/') {
        Some(pos) => location[..=pos].to_string(),
        None => String::new(),
    }
}

fn resolve_relative_url(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        if let Some(scheme_end) = base.find("://") {
            let after_scheme = &base[scheme_end + 3..];
            if let Some(slash) = after_scheme.find('/') {
                return format!("{}{}", &base[..scheme_end + 3 + slash], relative);
            }
        }
        return format!("{}{}", base.trim_end_matches('/'), relative);
    }
    join_relative(base, relative)
}

fn join_relative(base: &str, relative: &str) -> String {
    let mut result = base.to_string();
    for segment in relative.split('/') {
        match segment {
            ".." => {
                if result.ends_with('/') {
                    result.pop();
                }
                if let Some(pos) = result.rfind('/') {
                    result.truncate(pos + 1);
                }
            }
            "." => {}
            other => {
                if !result.is_empty() && !result.ends_with('/') {
                    result.push('/');
                }
                result.push_str(other);
            }
        }
    }
    result
}
