//! Backup documents
//!
//! Two JSON formats exist:
//!
//! ```text
//! v1:  { "secret/a": { "key": "value" }, ... }
//!
//! v2:  [ { "export_version": 2,
//!          "data": { "secret/a": { "first": 3,
//!                                  "versions": [ { "deleted": true, "value": {..} },
//!                                                { "destroyed": true },
//!                                                { "value": {..} } ] } },
//!          "requires_versioning": { "secret": true } } ]
//! ```
//!
//! v1 holds only the latest data of each secret and is readable by every
//! release; v2 is used as soon as any secret has more than one version. The
//! v2 document is wrapped in a one-element array so that old readers
//! reject it instead of importing it as v1.

use crate::backend::{Backend, SecretData};
use crate::error::{ExportError, SafeError};
use crate::tree::{NodeType, TreeNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Version number of the current multi-version format
pub const EXPORT_VERSION: u32 = 2;

/// One version of a secret, gathered from a tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretVersion {
    pub number: u32,
    pub deleted: bool,
    pub destroyed: bool,
    pub data: SecretData,
}

/// Secret path to its versions, oldest first
pub type SecretMap = BTreeMap<String, Vec<SecretVersion>>;

/// Flatten the key nodes of a tree into per-secret versions
///
/// Gaps in version numbering (destroyed versions never make it into a tree)
/// are filled with destroyed placeholders so numbering survives an import.
pub fn collect_secrets(mut tree: TreeNode) -> SecretMap {
    let mut grouped: BTreeMap<String, BTreeMap<u32, SecretVersion>> = BTreeMap::new();

    tree.depth_first_map(|node| {
        if node.node_type != NodeType::Key {
            return;
        }
        let Some((path, key)) = node.name.rsplit_once(':') else {
            return;
        };

        let version = grouped
            .entry(path.to_string())
            .or_default()
            .entry(node.version)
            .or_insert_with(|| SecretVersion {
                number: node.version,
                deleted: node.deleted,
                ..Default::default()
            });
        version
            .data
            .insert(key.to_string(), node.value.take().unwrap_or_default());
    });

    grouped
        .into_iter()
        .map(|(path, versions)| {
            let first = versions.keys().next().copied().unwrap_or(1);
            let last = versions.keys().next_back().copied().unwrap_or(first);

            let mut filled = Vec::with_capacity((last - first + 1) as usize);
            let mut versions = versions;
            for number in first..=last {
                filled.push(versions.remove(&number).unwrap_or(SecretVersion {
                    number,
                    destroyed: true,
                    ..Default::default()
                }));
            }
            (path, filled)
        })
        .collect()
}

/// Export flags
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Keep soft-deleted versions as deleted (with data) instead of
    /// exporting them as destroyed
    pub include_deleted: bool,

    /// Leave out the first version number
    pub shallow: bool,
}

/// One version in a v2 export
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportVersion {
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub destroyed: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value: SecretData,
}

/// One secret in a v2 export
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportSecret {
    /// Number of the first version; 0 when omitted (meaning 1)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub first: u32,

    pub versions: Vec<ExportVersion>,
}

/// Body of a v2 export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportV2 {
    pub export_version: u32,

    #[serde(default)]
    pub data: BTreeMap<String, ExportSecret>,

    #[serde(default)]
    pub requires_versioning: BTreeMap<String, bool>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// A parsed or generated backup document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportDocument {
    V1(BTreeMap<String, SecretData>),
    V2(ExportV2),
}

impl ExportDocument {
    /// Build a document from collected secrets
    ///
    /// The backend is only consulted to name the mounts of multi-version
    /// secrets.
    pub fn build<B: Backend + ?Sized>(
        backend: &B,
        secrets: &SecretMap,
        options: ExportOptions,
    ) -> Result<Self, SafeError> {
        let multi_version = secrets.values().any(|versions| versions.len() > 1);

        if !multi_version {
            let data = secrets
                .iter()
                .filter_map(|(path, versions)| {
                    let latest = versions.last()?;
                    let usable = !latest.destroyed && (options.include_deleted || !latest.deleted);
                    usable.then(|| (path.clone(), latest.data.clone()))
                })
                .collect();
            return Ok(ExportDocument::V1(data));
        }

        let mut export = ExportV2 {
            export_version: EXPORT_VERSION,
            data: BTreeMap::new(),
            requires_versioning: BTreeMap::new(),
        };

        for (path, versions) in secrets {
            if versions.len() > 1 {
                let mount = backend.mount(path)?;
                export
                    .requires_versioning
                    .insert(mount.path.trim_end_matches('/').to_string(), true);
            }

            let first = versions.first().map(|v| v.number).unwrap_or(1);
            let secret = ExportSecret {
                first: if first == 1 || options.shallow { 0 } else { first },
                versions: versions
                    .iter()
                    .map(|v| {
                        let destroyed = v.destroyed || (v.deleted && !options.include_deleted);
                        ExportVersion {
                            deleted: v.deleted && options.include_deleted,
                            destroyed,
                            value: if destroyed { SecretData::new() } else { v.data.clone() },
                        }
                    })
                    .collect(),
            };
            export.data.insert(path.clone(), secret);
        }

        Ok(ExportDocument::V2(export))
    }

    /// Detect the format of `input` and parse it
    pub fn parse(input: &str) -> Result<Self, ExportError> {
        let value: Value = serde_json::from_str(input)?;

        match value {
            Value::Object(_) => Ok(ExportDocument::V1(serde_json::from_value(value)?)),
            Value::Array(mut items) => {
                let is_v2 = items.len() == 1
                    && items[0].get("export_version").and_then(Value::as_u64)
                        == Some(EXPORT_VERSION as u64);
                if !is_v2 {
                    return Err(ExportError::UnknownFormat);
                }
                let body = items.remove(0);
                serde_json::from_value(body)
                    .map(ExportDocument::V2)
                    .map_err(|e| ExportError::Malformed(e.to_string()))
            }
            _ => Err(ExportError::UnknownFormat),
        }
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, ExportError> {
        let json = match self {
            ExportDocument::V1(data) => serde_json::to_string(data)?,
            ExportDocument::V2(export) => serde_json::to_string(&[export])?,
        };
        Ok(json)
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, ExportDocument::V2(_))
    }
}

/// Import flags
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Do not write versions flagged as deleted
    pub ignore_deleted: bool,

    /// Write only the latest version of each secret
    pub shallow: bool,

    /// Do not recreate destroyed versions, giving up the original numbering
    pub ignore_destroyed: bool,
}

/// What an import did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Secrets touched
    pub secrets: usize,

    /// Versions written
    pub written: usize,

    /// Versions soft-deleted after writing
    pub deleted: usize,

    /// Throwaway versions written and destroyed to keep numbering
    pub padded: usize,

    /// Versions left out (destroyed without padding, or deleted with
    /// `ignore_deleted`)
    pub skipped: usize,
}

/// Write a backup document into a backend
pub fn import<B: Backend + ?Sized>(
    backend: &B,
    document: &ExportDocument,
    options: ImportOptions,
) -> Result<ImportSummary, SafeError> {
    let mut summary = ImportSummary::default();

    match document {
        ExportDocument::V1(data) => {
            for (path, secret) in data {
                backend.write(path, secret)?;
                info!(path = %path, "wrote");
                summary.secrets += 1;
                summary.written += 1;
            }
        }
        ExportDocument::V2(export) => {
            if !options.shallow {
                check_versioning(backend, export)?;
            }

            let pad = !(options.shallow || options.ignore_destroyed);
            for (path, secret) in &export.data {
                import_secret(backend, path, secret, options, pad, &mut summary)?;
                info!(path = %path, "wrote");
                summary.secrets += 1;
            }
        }
    }

    Ok(summary)
}

/// Write the versions of one secret in order
///
/// Version `i` of the export is numbered `first + i`. With `pad` set, a
/// throwaway version is written and destroyed for every number the target
/// would otherwise skip, so each version lands on its original number.
fn import_secret<B: Backend + ?Sized>(
    backend: &B,
    path: &str,
    secret: &ExportSecret,
    options: ImportOptions,
    pad: bool,
    summary: &mut ImportSummary,
) -> Result<(), SafeError> {
    let first = secret.first.max(1);
    let start = if options.shallow {
        secret.versions.len().saturating_sub(1)
    } else {
        0
    };

    // Number the next write will receive
    let mut next = if pad { existing_versions(backend, path)? + 1 } else { 1 };

    for (i, version) in secret.versions.iter().enumerate().skip(start) {
        let number = first + i as u32;

        if (version.destroyed && !pad) || (version.deleted && options.ignore_deleted) {
            summary.skipped += 1;
            continue;
        }

        if pad {
            while next < number {
                pad_version(backend, path, next)?;
                summary.padded += 1;
                next += 1;
            }
            if next > number {
                warn!(path = %path, version = number, next, "Target already holds newer versions; numbering shifts");
            }
            if version.destroyed {
                pad_version(backend, path, next)?;
                summary.padded += 1;
                next += 1;
                continue;
            }
        }

        backend.write(path, &version.value)?;
        summary.written += 1;
        if version.deleted {
            backend.delete(path, None)?;
            summary.deleted += 1;
        }
        next += 1;
    }

    debug!(path = %path, versions = secret.versions.len(), first, "Imported secret");
    Ok(())
}

fn existing_versions<B: Backend + ?Sized>(backend: &B, path: &str) -> Result<u32, SafeError> {
    match backend.versions(path) {
        Ok(versions) => Ok(versions.len() as u32),
        Err(e) if e.is_not_found() => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Occupy version `number` with empty data, then destroy it
fn pad_version<B: Backend + ?Sized>(backend: &B, path: &str, number: u32) -> Result<(), SafeError> {
    backend.write(path, &SecretData::new())?;
    backend.destroy(path, number)?;
    Ok(())
}

fn check_versioning<B: Backend + ?Sized>(backend: &B, export: &ExportV2) -> Result<(), SafeError> {
    for (mount, needed) in &export.requires_versioning {
        if !needed {
            continue;
        }
        let versioned = match backend.mount_version(mount) {
            Ok(version) => version.is_versioned(),
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };
        if !versioned {
            return Err(ExportError::VersioningUnsupported {
                mount: mount.clone(),
            }
            .into());
        }
    }
    Ok(())
}
