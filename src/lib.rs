//! kvsafe - Operator CLI for Vault-compatible KV secret stores
//!
//! Lists, walks, reads, exports and imports secrets kept in KV v1 and KV v2
//! mounts. Walking is done by a small pool of worker threads that grow a
//! tree of secrets concurrently.
//!
//! # Features
//!
//! - **Concurrent Tree Construction**: Up to three workers list directories,
//!   read secrets and enumerate versions in parallel, detecting completion
//!   through quiescence of a shared work queue.
//!
//! - **KV v1 and v2**: Versioned mounts are handled transparently, including
//!   soft-deleted versions, which are hidden unless asked for.
//!
//! - **Partial Results**: A failed walk still returns the tree built up to
//!   the point of failure.
//!
//! - **Backup and Migration**: JSON export of whole subtrees (latest or all
//!   versions) and import back into any mount.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Vault-compatible server                     │
//! │                     (KV v1 / KV v2 mounts)                      │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ HTTP (reqwest)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Backend trait                           │
//! │             VaultClient            MemoryBackend                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          TreeBuilder                            │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐                          │
//! │  │Worker 0 │  │Worker 1 │  │Worker 2 │                          │
//! │  └────┬────┘  └────┬────┘  └────┬────┘                          │
//! │       └────────────┼────────────┘                               │
//! │                    ▼                                            │
//! │            ┌──────────────────────────┐                         │
//! │            │       Work Queue         │                         │
//! │            │  - quiescence detection  │                         │
//! │            │  - close on first error  │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ TreeNode
//!                               ▼
//!        ┌──────────┬──────────┬──────────┬──────────────────┐
//!        │   tree   │  paths   │  export  │  (draw / paths / │
//!        │          │          │          │   depth-first)   │
//!        └──────────┴──────────┴──────────┴──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Mounts, then a subtree with keys
//! safe ls
//! safe tree secret/app --keys
//!
//! # Every version of a subtree, and back again
//! safe export -a secret/app > backup.json
//! safe import backup.json
//! ```

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod path;
pub mod progress;
pub mod tree;

pub use backend::{Backend, MemoryBackend, VaultClient};
pub use commands::Session;
pub use config::{CliArgs, TargetConfig};
pub use error::{Result, SafeError};
pub use tree::{construct_tree, NodeType, TreeBuilder, TreeNode, TreeOptions};
