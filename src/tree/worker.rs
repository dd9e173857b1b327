//! Tree worker threads
//!
//! Each worker:
//! - Pops a work order (a node it alone may mutate, plus the operations to run)
//! - Runs GET, LIST, MOUNTS and VERSIONS against the backend as requested
//! - Stamps every discovered child with its mount generation
//! - Appends the children to the node and queues an order for each child
//!   that still needs expanding
//!
//! A fatal backend error closes the queue, which makes every other worker
//! see "no more work" at its next pop. Every worker reports exactly once on
//! the completion channel.

use super::classify::{classify, Operations, TreeOptions};
use super::node::{NodeType, TreeNode};
use super::queue::WorkQueue;
use crate::backend::{Backend, MountKind};
use crate::error::{BackendError, BackendResult};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A node to expand and the operations to expand it with
///
/// The order holds the only mutable reference to its node for as long as
/// it exists.
#[derive(Debug)]
pub struct WorkOrder<'t> {
    pub node: &'t mut TreeNode,
    pub operations: Operations,
}

/// Outcome reported by each worker when it exits
pub type Completion = BackendResult<()>;

/// Counters shared by all workers of one construction
#[derive(Debug, Default)]
pub struct CrawlStats {
    /// Work orders fully expanded
    pub expanded: AtomicU64,

    /// Nodes added to the tree
    pub discovered: AtomicU64,

    /// Backend calls issued
    pub requests: AtomicU64,

    /// Workers that hit a fatal error
    pub failures: AtomicU64,
}

impl CrawlStats {
    fn record_expanded(&self) {
        self.expanded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_discovered(&self, count: u64) {
        self.discovered.fetch_add(count, Ordering::Relaxed);
    }

    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expanded(&self) -> u64 {
        self.expanded.load(Ordering::Relaxed)
    }

    pub fn discovered(&self) -> u64 {
        self.discovered.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Snapshot of a construction in progress
#[derive(Debug, Clone)]
pub struct CrawlProgress {
    /// Orders expanded so far
    pub expanded: u64,

    /// Nodes discovered so far
    pub discovered: u64,

    /// Backend calls issued
    pub requests: u64,

    /// Orders waiting in the queue
    pub queued: usize,

    /// Workers currently holding an order
    pub active_workers: usize,

    /// Pool size
    pub total_workers: usize,

    /// Time since the pool started
    pub elapsed: Duration,
}

impl CrawlProgress {
    /// Discovered nodes per second
    pub fn nodes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.discovered as f64 / secs
        } else {
            0.0
        }
    }
}

/// Closes the queue if the worker thread unwinds, so the rest of the pool
/// still terminates
struct CloseOnPanic<'q, 't> {
    queue: &'q WorkQueue<WorkOrder<'t>>,
}

impl Drop for CloseOnPanic<'_, '_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.queue.close();
        }
    }
}

/// One member of the worker pool
pub struct TreeWorker<'a, 't, B: Backend + ?Sized> {
    pub id: usize,
    pub backend: &'a B,
    pub queue: &'a WorkQueue<WorkOrder<'t>>,
    pub completions: Sender<Completion>,
    pub options: TreeOptions,
    pub stats: &'a CrawlStats,
}

impl<'a, 't, B: Backend + ?Sized> TreeWorker<'a, 't, B> {
    /// Main worker loop; returns once the queue reports no more work
    pub fn run(self) {
        debug!(worker = self.id, "Tree worker starting");
        let _guard = CloseOnPanic { queue: self.queue };

        let outcome = self.work();
        match &outcome {
            Ok(()) => debug!(worker = self.id, "Tree worker finished"),
            Err(e) => {
                self.stats.record_failure();
                warn!(worker = self.id, error = %e, "Tree worker cancelled the crawl");
            }
        }

        if self.completions.send(outcome).is_err() {
            debug!(worker = self.id, "Completion receiver already gone");
        }
    }

    fn work(&self) -> Completion {
        while let Some(order) = self.queue.pop() {
            if let Err(e) = self.expand(order) {
                self.queue.close();
                // Keeps the awake count consistent; the queue is closed so
                // this returns immediately
                let _ = self.queue.pop();
                return Err(e);
            }
        }
        Ok(())
    }

    fn expand(&self, order: WorkOrder<'t>) -> BackendResult<()> {
        let WorkOrder { node, operations } = order;
        trace!(worker = self.id, path = %node.name, ops = ?operations, "Expanding node");

        let mut children = Vec::new();
        if operations.contains(Operations::GET) {
            children.extend(self.get(node)?);
        }
        if operations.contains(Operations::LIST) {
            children.extend(self.list(node)?);
        }
        if operations.contains(Operations::MOUNTS) {
            children.extend(self.mounts()?);
        }
        if operations.contains(Operations::VERSIONS) {
            children.extend(self.versions(node)?);
        }

        // Classification of a child depends on its generation, so it must be
        // known before the child is queued
        for child in &mut children {
            self.stats.record_request();
            child.mount_version = self.backend.mount_version(&child.name)?;
        }

        self.stats.record_discovered(children.len() as u64);
        self.stats.record_expanded();

        node.branches.extend(children);
        for child in node.branches.iter_mut() {
            let operations = classify(child, &self.options);
            if !operations.is_empty() {
                self.queue.push(WorkOrder {
                    node: child,
                    operations,
                });
            }
        }
        Ok(())
    }

    fn get(&self, node: &TreeNode) -> BackendResult<Vec<TreeNode>> {
        let path = node.name.trim_end_matches('/');
        // Stamped before the node was queued
        let generation = node.mount_version;

        let version = (node.version > 0).then_some(node.version);
        let restore = node.deleted && self.options.fetch_all_versions && node.version > 0;

        if restore {
            debug!(worker = self.id, path = %path, version = node.version, "Temporarily undeleting version");
            self.stats.record_request();
            self.backend.undelete(path, node.version)?;
        }

        self.stats.record_request();
        let read = self.backend.read(path, version);

        let redelete = if restore {
            self.stats.record_request();
            self.backend.delete(path, Some(node.version))
        } else {
            Ok(())
        };

        let data = match read {
            Ok(data) => data,
            // v2 listings include fully soft-deleted secrets
            Err(e) if e.is_not_found() && generation.is_versioned() => {
                redelete?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        redelete?;

        let version = node.version.max(1);
        Ok(data
            .into_iter()
            .map(|(key, value)| TreeNode::key(path, &key, value, version, node.deleted))
            .collect())
    }

    fn list(&self, node: &TreeNode) -> BackendResult<Vec<TreeNode>> {
        let path = node.name.trim_end_matches('/');
        self.stats.record_request();

        let entries = match self.backend.list(path) {
            Ok(entries) => entries,
            // Mount exists but holds nothing yet
            Err(BackendError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let node_type = if entry.ends_with('/') {
                    NodeType::Directory
                } else {
                    NodeType::Secret
                };
                TreeNode::new(format!("{}/{}", path, entry), node_type)
            })
            .collect())
    }

    fn mounts(&self) -> BackendResult<Vec<TreeNode>> {
        let mut children = Vec::new();
        for kind in [MountKind::Kv, MountKind::Generic] {
            self.stats.record_request();
            for mount in self.backend.mounts(kind)? {
                children.push(TreeNode::new(format!("{}/", mount), NodeType::Directory));
            }
        }
        Ok(children)
    }

    fn versions(&self, node: &TreeNode) -> BackendResult<Vec<TreeNode>> {
        self.stats.record_request();
        let versions = self.backend.versions(&node.name)?;

        Ok(versions
            .into_iter()
            .filter(|v| !v.destroyed)
            .map(|v| TreeNode::version_of(&node.name, v.number, v.deleted))
            .collect())
    }
}
