//! Secret path handling
//!
//! Paths are `/`-separated and never carry leading or trailing separators
//! once canonicalized. A path argument may name a single key with `:key`
//! and a specific version with `^N`, e.g. `secret/db:password^3`.

use crate::error::ConfigError;

/// Normalize a path: trim whitespace, collapse repeated `/`, and drop the
/// leading and trailing separators.
pub fn canonicalize(path: &str) -> String {
    path.trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A path argument split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPath {
    /// Canonical secret path
    pub path: String,

    /// Single key within the secret
    pub key: Option<String>,

    /// Specific version (KV v2)
    pub version: Option<u32>,
}

impl SecretPath {
    /// Parse `path[:key][^version]`
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let (rest, version) = match input.rsplit_once('^') {
            Some((rest, raw)) => {
                let version = raw.parse::<u32>().map_err(|e| ConfigError::InvalidPath {
                    path: input.to_string(),
                    reason: format!("bad version '{}': {}", raw, e),
                })?;
                if version == 0 {
                    return Err(ConfigError::InvalidPath {
                        path: input.to_string(),
                        reason: "versions start at 1".into(),
                    });
                }
                (rest, Some(version))
            }
            None => (input, None),
        };

        let (path, key) = match rest.rsplit_once(':') {
            Some((path, key)) if !key.is_empty() => (path, Some(key.to_string())),
            Some((path, _)) => (path, None),
            None => (rest, None),
        };

        Ok(Self {
            path: canonicalize(path),
            key,
            version,
        })
    }
}

/// Sort paths and drop any that lie underneath an earlier one
///
/// Walking `secret/a` already covers `secret/a/b`, so exporting both would
/// just duplicate work.
pub fn dedupe_paths(paths: &[String]) -> Vec<String> {
    let mut sorted: Vec<String> = paths.iter().map(|p| canonicalize(p)).collect();
    sorted.sort();
    sorted.dedup();

    let mut kept: Vec<String> = Vec::with_capacity(sorted.len());
    for path in sorted {
        let covered = kept.iter().any(|parent| {
            parent.is_empty() || path == *parent || path.starts_with(&format!("{}/", parent))
        });
        if !covered {
            kept.push(path);
        }
    }
    kept
}
