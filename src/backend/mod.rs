//! Secret backend access
//!
//! The tree engine and the CLI commands talk to the secret store only
//! through the [`Backend`] trait. Two implementations are provided:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Backend trait                      │
//! │  list / read / versions / mounts / mount             │
//! │  undelete / delete / destroy / write                 │
//! └──────────────┬─────────────────────────┬─────────────┘
//!                │                         │
//!                ▼                         ▼
//! ┌──────────────────────────┐  ┌─────────────────────────┐
//! │       VaultClient        │  │      MemoryBackend      │
//! │  - reqwest (blocking)    │  │  - in-process store     │
//! │  - KV v1 / v2 routing    │  │  - tests, benchmarks    │
//! │  - mount prefix cache    │  │  - fault injection      │
//! └──────────────────────────┘  └─────────────────────────┘
//! ```
//!
//! Paths passed to a backend are logical secret paths (`secret/app/db`).
//! Translating them to KV v2 `data/` and `metadata/` endpoints is the
//! client's job.

mod client;
pub mod memory;
pub mod types;

pub use client::{ClientConfig, VaultClient};
pub use memory::MemoryBackend;
pub use types::{KvVersion, MountInfo, MountKind, SecretData, VersionMeta};

use crate::error::BackendResult;

/// Operations the secret store must support
///
/// Implementations are shared by every tree worker, so they must be usable
/// from several threads at once.
pub trait Backend: Send + Sync {
    /// List the immediate children of a directory path
    ///
    /// Directory entries carry a trailing `/`. Fails with `NotFound` when
    /// nothing exists below the path.
    fn list(&self, path: &str) -> BackendResult<Vec<String>>;

    /// Read the data of a secret, optionally at a specific version
    fn read(&self, path: &str, version: Option<u32>) -> BackendResult<SecretData>;

    /// All known versions of a secret, oldest first
    fn versions(&self, path: &str) -> BackendResult<Vec<VersionMeta>>;

    /// Mount points of the given kind, without trailing `/`
    fn mounts(&self, kind: MountKind) -> BackendResult<Vec<String>>;

    /// The mount governing a path
    fn mount(&self, path: &str) -> BackendResult<MountInfo>;

    /// KV generation of the mount governing a path
    fn mount_version(&self, path: &str) -> BackendResult<KvVersion> {
        Ok(self.mount(path)?.version)
    }

    /// Restore a soft-deleted version
    fn undelete(&self, path: &str, version: u32) -> BackendResult<()>;

    /// Soft-delete a version (`None` means the latest one, or the whole
    /// secret on KV v1)
    fn delete(&self, path: &str, version: Option<u32>) -> BackendResult<()>;

    /// Permanently destroy one version (KV v2 only)
    fn destroy(&self, path: &str, version: u32) -> BackendResult<()>;

    /// Write a new version of a secret
    fn write(&self, path: &str, data: &SecretData) -> BackendResult<()>;
}
