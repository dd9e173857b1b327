//! Error types for kvsafe
//!
//! This module defines the error hierarchy for:
//! - Secret backend calls (HTTP transport, status codes, response decoding)
//! - Tree construction (crawl failures, worker failures)
//! - Configuration and CLI errors
//! - Export/import documents
//!
//! Library code returns these structured errors; the binary wraps them with
//! `anyhow` context at the edges.

use crate::tree::TreeNode;
use thiserror::Error;

/// Top-level error type for the kvsafe library
#[derive(Error, Debug)]
pub enum SafeError {
    /// Secret backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Tree construction errors
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Export/import errors
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// I/O errors (stdout, import files, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a secret backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Nothing exists at the path
    #[error("no secret exists at path '{path}'")]
    NotFound { path: String },

    /// The token is not allowed to perform the operation
    #[error("permission denied for '{path}'")]
    PermissionDenied { path: String },

    /// The request never produced an HTTP response
    #[error("request for '{path}' failed: {reason}")]
    Transport { path: String, reason: String },

    /// The backend answered with an unexpected status
    #[error("API {code} for '{path}': {message}")]
    Status {
        path: String,
        code: u16,
        message: String,
    },

    /// The response body could not be interpreted
    #[error("malformed response for '{path}': {reason}")]
    Malformed { path: String, reason: String },

    /// The operation does not exist for this mount generation
    #[error("'{operation}' is not supported on KV v1 path '{path}'")]
    Unsupported { path: String, operation: String },

    /// The HTTP client could not be constructed
    #[error("failed to initialize backend client: {0}")]
    Init(String),
}

impl BackendError {
    /// Check if this error means the path simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    /// The path the failing call was made against, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            BackendError::NotFound { path }
            | BackendError::PermissionDenied { path }
            | BackendError::Transport { path, .. }
            | BackendError::Status { path, .. }
            | BackendError::Malformed { path, .. }
            | BackendError::Unsupported { path, .. } => Some(path),
            BackendError::Init(_) => None,
        }
    }
}

/// Worker thread errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker thread could not be started
    #[error("Failed to spawn tree worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// The worker thread panicked
    #[error("Tree worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },
}

/// Tree construction errors
///
/// Crawl and worker failures carry the best-effort tree built up to the
/// point of cancellation, already pruned and sorted.
#[derive(Error, Debug)]
pub enum TreeError {
    /// The starting path could not be classified
    #[error(transparent)]
    Probe(BackendError),

    /// A worker hit a fatal backend error and cancelled the crawl
    #[error("{source}")]
    Crawl {
        source: BackendError,
        partial: Box<TreeNode>,
    },

    /// The worker pool itself failed
    #[error("{source}")]
    Worker {
        source: WorkerError,
        partial: Box<TreeNode>,
    },
}

impl TreeError {
    /// The partial tree, when construction got far enough to have one
    pub fn partial_tree(&self) -> Option<&TreeNode> {
        match self {
            TreeError::Probe(_) => None,
            TreeError::Crawl { partial, .. } | TreeError::Worker { partial, .. } => Some(partial),
        }
    }

    /// Consume the error, keeping only the partial tree
    pub fn into_partial_tree(self) -> Option<TreeNode> {
        match self {
            TreeError::Probe(_) => None,
            TreeError::Crawl { partial, .. } | TreeError::Worker { partial, .. } => Some(*partial),
        }
    }

    /// The backend error behind this failure, if there was one
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            TreeError::Probe(source) | TreeError::Crawl { source, .. } => Some(source),
            TreeError::Worker { .. } => None,
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No backend address was given
    #[error("no backend address given; set VAULT_ADDR or pass --addr")]
    MissingAddress,

    /// Backend address could not be parsed
    #[error("Invalid backend address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// No token was found anywhere
    #[error("no token specified; set VAULT_TOKEN, pass --token, or write ~/.vault-token")]
    MissingToken,

    /// Timeout out of range
    #[error("Invalid timeout {secs}s: must be between 1 and {max}")]
    InvalidTimeout { secs: u64, max: u64 },

    /// Path argument could not be used
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Two flags that cannot be combined
    #[error("Cannot specify both {first} and {second} at the same time")]
    ConflictingFlags {
        first: &'static str,
        second: &'static str,
    },
}

/// Export/import document errors
#[derive(Error, Debug)]
pub enum ExportError {
    /// JSON encoding/decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input is neither a v1 nor a v2 export
    #[error("Unknown export file format - aborting")]
    UnknownFormat,

    /// V2 document is structurally wrong
    #[error("Improperly formatted export file: {0}")]
    Malformed(String),

    /// Mount cannot hold the versions in the export
    #[error("Export for mount '{mount}' has secrets with multiple versions, but the mount does not support versioning")]
    VersioningUnsupported { mount: String },
}

/// Result type alias for SafeError
pub type Result<T> = std::result::Result<T, SafeError>;

/// Result type alias for BackendError
pub type BackendResult<T> = std::result::Result<T, BackendError>;
