//! Secret backend data types
//!
//! These types describe what the backend hands back: secret data, version
//! metadata and mount information. They are independent of the HTTP wire
//! format, which lives in the client.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Key/value pairs of one secret version, ordered by key
pub type SecretData = BTreeMap<String, String>;

/// KV backend generation governing a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KvVersion {
    /// Flat, single-version secrets
    #[default]
    V1,
    /// Versioned secrets with soft-delete and destroy
    V2,
}

impl KvVersion {
    /// Parse the `options.version` value of a mount description
    pub fn from_option(value: Option<&str>) -> Self {
        match value {
            Some("2") => KvVersion::V2,
            _ => KvVersion::V1,
        }
    }

    /// Numeric generation (1 or 2)
    pub fn as_u8(&self) -> u8 {
        match self {
            KvVersion::V1 => 1,
            KvVersion::V2 => 2,
        }
    }

    /// Check if soft-delete/version semantics apply
    pub fn is_versioned(&self) -> bool {
        *self == KvVersion::V2
    }
}

impl fmt::Display for KvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Kind of secret engine mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountKind {
    /// `kv` engine (either generation)
    Kv,
    /// Legacy `generic` engine (always v1)
    Generic,
}

impl MountKind {
    /// Engine type string as reported by the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            MountKind::Kv => "kv",
            MountKind::Generic => "generic",
        }
    }

    /// Parse an engine type string; other engines are not secret stores
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "kv" => Some(MountKind::Kv),
            "generic" => Some(MountKind::Generic),
            _ => None,
        }
    }
}

/// A mount point and its generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Mount path with a trailing `/` (e.g. `secret/`)
    pub path: String,

    /// Engine kind
    pub kind: MountKind,

    /// KV generation
    pub version: KvVersion,
}

impl MountInfo {
    /// Create a mount description, normalizing the path to end in `/`
    pub fn new(path: &str, kind: MountKind, version: KvVersion) -> Self {
        Self {
            path: format!("{}/", path.trim_matches('/')),
            kind,
            version,
        }
    }

    /// Check if a secret path lives under this mount
    pub fn contains(&self, path: &str) -> bool {
        let probe = format!("{}/", path.trim_matches('/'));
        probe.starts_with(&self.path)
    }

    /// The part of `path` below the mount point
    pub fn relative<'p>(&self, path: &'p str) -> &'p str {
        let path = path.trim_start_matches('/');
        let mount = self.path.trim_end_matches('/');
        path.strip_prefix(mount)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(path)
    }
}

/// Metadata about one version of a secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    /// Version number (1-based)
    pub number: u32,

    /// Soft-deleted (recoverable)
    pub deleted: bool,

    /// Destroyed (permanently gone)
    pub destroyed: bool,

    /// Creation time, when the backend reports one
    pub created_at: Option<DateTime<Utc>>,
}

impl VersionMeta {
    /// Version that is neither deleted nor destroyed
    pub fn alive(number: u32) -> Self {
        Self {
            number,
            deleted: false,
            destroyed: false,
            created_at: None,
        }
    }

    /// Human-readable state
    pub fn state(&self) -> &'static str {
        if self.destroyed {
            "destroyed"
        } else if self.deleted {
            "deleted"
        } else {
            "alive"
        }
    }
}
