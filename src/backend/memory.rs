//! In-memory secret backend
//!
//! Behaves like a Vault KV store closely enough for the tree engine: v2
//! listings include soft-deleted secrets, reads of deleted versions fail
//! with `NotFound`, and flat v1 mounts ignore version numbers. Builders
//! make it convenient for tests and benchmarks; list failures can be
//! injected to exercise cancellation.

use super::types::{KvVersion, MountInfo, MountKind, SecretData, VersionMeta};
use super::Backend;
use crate::error::{BackendError, BackendResult};
use crate::path::canonicalize;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct StoredVersion {
    data: SecretData,
    deleted: bool,
    destroyed: bool,
    created_at: DateTime<Utc>,
}

impl StoredVersion {
    fn new(data: SecretData) -> Self {
        Self {
            data,
            deleted: false,
            destroyed: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    mounts: Vec<MountInfo>,
    secrets: BTreeMap<String, Vec<StoredVersion>>,
    listings: BTreeMap<String, Vec<String>>,
    list_failures: BTreeMap<String, String>,
}

impl MemoryState {
    fn mount_for(&self, path: &str) -> Option<&MountInfo> {
        self.mounts
            .iter()
            .filter(|m| m.contains(path))
            .max_by_key(|m| m.path.len())
    }

    fn generation(&self, path: &str) -> KvVersion {
        self.mount_for(path).map(|m| m.version).unwrap_or_default()
    }

    fn store(&mut self, path: String, data: SecretData) {
        let generation = self.generation(&path);
        let versions = self.secrets.entry(path).or_default();
        if !generation.is_versioned() {
            versions.clear();
        }
        versions.push(StoredVersion::new(data));
    }

    fn version_mut(&mut self, path: &str, number: Option<u32>) -> BackendResult<&mut StoredVersion> {
        let versions = self
            .secrets
            .get_mut(path)
            .ok_or_else(|| not_found(path))?;

        let found = match number {
            Some(n) if n > 0 => versions.get_mut(n as usize - 1),
            _ => versions.last_mut(),
        };
        found.ok_or_else(|| not_found(path))
    }

    fn derived_listing(&self, path: &str) -> Vec<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let entries: BTreeSet<String> = self
            .secrets
            .keys()
            .filter_map(|secret| secret.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty())
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => format!("{}/", dir),
                None => rest.to_string(),
            })
            .collect();

        entries.into_iter().collect()
    }
}

fn not_found(path: &str) -> BackendError {
    BackendError::NotFound {
        path: path.to_string(),
    }
}

/// Thread-safe in-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    calls: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend with no mounts
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mount point
    pub fn with_mount(mut self, path: &str, kind: MountKind, version: KvVersion) -> Self {
        let mount = MountInfo::new(path, kind, version);
        let state = self.state.get_mut();
        state.mounts.retain(|m| m.path != mount.path);
        state.mounts.push(mount);
        self
    }

    /// Store a secret; on v2 mounts each call adds a new version
    pub fn with_secret(mut self, path: &str, pairs: &[(&str, &str)]) -> Self {
        let data = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.get_mut().store(canonicalize(path), data);
        self
    }

    /// Soft-delete one version of a stored secret
    pub fn with_deleted(mut self, path: &str, version: u32) -> Self {
        if let Ok(stored) = self.state.get_mut().version_mut(&canonicalize(path), Some(version)) {
            stored.deleted = true;
        }
        self
    }

    /// Destroy one version of a stored secret
    pub fn with_destroyed(mut self, path: &str, version: u32) -> Self {
        if let Ok(stored) = self.state.get_mut().version_mut(&canonicalize(path), Some(version)) {
            stored.destroyed = true;
            stored.data.clear();
        }
        self
    }

    /// Override what `list` returns for a directory
    pub fn with_listing(mut self, path: &str, entries: &[&str]) -> Self {
        self.state.get_mut().listings.insert(
            canonicalize(path),
            entries.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    /// Make `list` on a directory fail with a transport error
    pub fn with_list_failure(mut self, path: &str, reason: &str) -> Self {
        self.state
            .get_mut()
            .list_failures
            .insert(canonicalize(path), reason.to_string());
        self
    }

    /// Total number of backend calls served
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl Backend for MemoryBackend {
    fn list(&self, path: &str) -> BackendResult<Vec<String>> {
        self.record_call();
        let path = canonicalize(path);
        let state = self.state.lock();

        if let Some(reason) = state.list_failures.get(&path) {
            return Err(BackendError::Transport {
                path,
                reason: reason.clone(),
            });
        }

        let entries = match state.listings.get(&path) {
            Some(entries) => entries.clone(),
            None => state.derived_listing(&path),
        };

        if entries.is_empty() {
            return Err(not_found(&path));
        }
        Ok(entries)
    }

    fn read(&self, path: &str, version: Option<u32>) -> BackendResult<SecretData> {
        self.record_call();
        let path = canonicalize(path);
        let mut state = self.state.lock();

        let version = if state.generation(&path).is_versioned() {
            version
        } else {
            None
        };

        let stored = state.version_mut(&path, version)?;
        if stored.deleted || stored.destroyed {
            return Err(not_found(&path));
        }
        Ok(stored.data.clone())
    }

    fn versions(&self, path: &str) -> BackendResult<Vec<VersionMeta>> {
        self.record_call();
        let path = canonicalize(path);
        let state = self.state.lock();

        let stored = state.secrets.get(&path).ok_or_else(|| not_found(&path))?;
        Ok(stored
            .iter()
            .zip(1u32..)
            .map(|(v, number)| VersionMeta {
                number,
                deleted: v.deleted,
                destroyed: v.destroyed,
                created_at: Some(v.created_at),
            })
            .collect())
    }

    fn mounts(&self, kind: MountKind) -> BackendResult<Vec<String>> {
        self.record_call();
        let state = self.state.lock();
        Ok(state
            .mounts
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.path.trim_end_matches('/').to_string())
            .collect())
    }

    fn mount(&self, path: &str) -> BackendResult<MountInfo> {
        self.record_call();
        let state = self.state.lock();
        state
            .mount_for(path)
            .cloned()
            .ok_or_else(|| not_found(&canonicalize(path)))
    }

    fn undelete(&self, path: &str, version: u32) -> BackendResult<()> {
        self.record_call();
        let path = canonicalize(path);
        let mut state = self.state.lock();

        if !state.generation(&path).is_versioned() {
            return Err(BackendError::Unsupported {
                path,
                operation: "undelete".into(),
            });
        }
        state.version_mut(&path, Some(version))?.deleted = false;
        Ok(())
    }

    fn delete(&self, path: &str, version: Option<u32>) -> BackendResult<()> {
        self.record_call();
        let path = canonicalize(path);
        let mut state = self.state.lock();

        if !state.generation(&path).is_versioned() {
            return match state.secrets.remove(&path) {
                Some(_) => Ok(()),
                None => Err(not_found(&path)),
            };
        }
        state.version_mut(&path, version)?.deleted = true;
        Ok(())
    }

    fn destroy(&self, path: &str, version: u32) -> BackendResult<()> {
        self.record_call();
        let path = canonicalize(path);
        let mut state = self.state.lock();

        if !state.generation(&path).is_versioned() {
            return Err(BackendError::Unsupported {
                path,
                operation: "destroy".into(),
            });
        }
        let stored = state.version_mut(&path, Some(version))?;
        stored.destroyed = true;
        stored.data.clear();
        Ok(())
    }

    fn write(&self, path: &str, data: &SecretData) -> BackendResult<()> {
        self.record_call();
        let path = canonicalize(path);
        let mut state = self.state.lock();

        if state.mount_for(&path).is_none() {
            return Err(not_found(&path));
        }
        state.store(path, data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_mount("secret", MountKind::Kv, KvVersion::V2)
            .with_mount("legacy", MountKind::Generic, KvVersion::V1)
            .with_secret("secret/app/db", &[("user", "admin")])
            .with_secret("secret/app/db", &[("user", "root")])
            .with_secret("secret/top", &[("k", "v")])
            .with_secret("legacy/x", &[("a", "1")])
    }

    #[test]
    fn test_derived_listing() {
        let b = backend();
        assert_eq!(b.list("secret").unwrap(), vec!["app/", "top"]);
        assert_eq!(b.list("secret/app/").unwrap(), vec!["db"]);
        assert!(b.list("secret/none").unwrap_err().is_not_found());
    }

    #[test]
    fn test_explicit_listing_and_failure() {
        let b = backend()
            .with_listing("secret", &["z/", "y"])
            .with_list_failure("legacy", "boom");
        assert_eq!(b.list("secret").unwrap(), vec!["z/", "y"]);
        assert!(matches!(
            b.list("legacy"),
            Err(BackendError::Transport { .. })
        ));
    }

    #[test]
    fn test_versioned_reads() {
        let b = backend();
        assert_eq!(b.read("secret/app/db", None).unwrap()["user"], "root");
        assert_eq!(b.read("secret/app/db", Some(1)).unwrap()["user"], "admin");
        assert!(b.read("secret/app/db", Some(9)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_and_undelete() {
        let b = backend();
        b.delete("secret/app/db", Some(2)).unwrap();
        assert!(b.read("secret/app/db", None).unwrap_err().is_not_found());
        assert!(b.versions("secret/app/db").unwrap()[1].deleted);

        b.undelete("secret/app/db", 2).unwrap();
        assert_eq!(b.read("secret/app/db", None).unwrap()["user"], "root");
    }

    #[test]
    fn test_destroy_version() {
        let b = backend();
        b.destroy("secret/app/db", 1).unwrap();

        let versions = b.versions("secret/app/db").unwrap();
        assert!(versions[0].destroyed);
        assert!(!versions[1].destroyed);
        assert!(b.read("secret/app/db", Some(1)).unwrap_err().is_not_found());
        assert_eq!(b.read("secret/app/db", None).unwrap()["user"], "root");
        assert!(b.destroy("secret/app/db", 7).unwrap_err().is_not_found());
    }

    #[test]
    fn test_v1_semantics() {
        let b = backend();
        let mut data = SecretData::new();
        data.insert("a".into(), "2".into());
        b.write("legacy/x", &data).unwrap();

        assert_eq!(b.versions("legacy/x").unwrap().len(), 1);
        assert_eq!(b.read("legacy/x", Some(5)).unwrap()["a"], "2");
        assert!(matches!(
            b.undelete("legacy/x", 1),
            Err(BackendError::Unsupported { .. })
        ));
        assert!(matches!(
            b.destroy("legacy/x", 1),
            Err(BackendError::Unsupported { .. })
        ));

        b.delete("legacy/x", None).unwrap();
        assert!(b.read("legacy/x", None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_mounts_and_generation() {
        let b = backend();
        assert_eq!(b.mounts(MountKind::Kv).unwrap(), vec!["secret"]);
        assert_eq!(b.mounts(MountKind::Generic).unwrap(), vec!["legacy"]);
        assert_eq!(b.mount_version("secret/app/db:user").unwrap(), KvVersion::V2);
        assert_eq!(b.mount_version("legacy/").unwrap(), KvVersion::V1);
        assert!(b.mount("nowhere/x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_write_requires_mount() {
        let b = backend();
        assert!(b.write("nowhere/x", &SecretData::new()).is_err());
        assert!(b.calls() > 0);
    }
}
