//! Tree construction orchestrator
//!
//! Classifies the starting path, seeds the work queue with it, runs a small
//! pool of scoped worker threads until the queue detects quiescence (or a
//! worker cancels), then prunes and sorts the result.
//!
//! The pool is capped at three threads: the crawl is bound by network
//! latency, and more concurrent requests only add load on the server.

use super::classify::{classify, TreeOptions};
use super::node::{NodeType, TreeNode};
use super::queue::WorkQueue;
use super::worker::{Completion, CrawlProgress, CrawlStats, TreeWorker, WorkOrder};
use crate::backend::Backend;
use crate::error::{BackendError, BackendResult, TreeError, WorkerError};
use crate::path::canonicalize;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use std::any::Any;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on the worker pool
pub const MAX_WORKERS: usize = 3;

/// How often the progress callback fires
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Pool size for this machine: one worker per CPU, at most [`MAX_WORKERS`]
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

enum Failure {
    Backend(BackendError),
    Worker(WorkerError),
}

/// Builds secret trees against a backend
pub struct TreeBuilder<'b, B: Backend + ?Sized> {
    backend: &'b B,
    workers: usize,
}

impl<'b, B: Backend + ?Sized> TreeBuilder<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            workers: default_workers(),
        }
    }

    /// Override the pool size (clamped to `1..=MAX_WORKERS`)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Build the tree rooted at `path`
    ///
    /// On failure the error carries the pruned and sorted tree built up to
    /// the point of cancellation.
    pub fn construct(&self, path: &str, options: TreeOptions) -> Result<TreeNode, TreeError> {
        self.build(path, options, None::<fn(CrawlProgress)>)
    }

    /// Like [`construct`](Self::construct), calling `on_progress` with a
    /// snapshot every 100ms while the pool runs
    pub fn construct_with_progress<F>(
        &self,
        path: &str,
        options: TreeOptions,
        on_progress: F,
    ) -> Result<TreeNode, TreeError>
    where
        F: FnMut(CrawlProgress) + Send,
    {
        self.build(path, options, Some(on_progress))
    }

    fn build<F>(&self, path: &str, options: TreeOptions, progress: Option<F>) -> Result<TreeNode, TreeError>
    where
        F: FnMut(CrawlProgress) + Send,
    {
        let path = canonicalize(path);
        let path = if path.is_empty() { "/".to_string() } else { path };
        let start = Instant::now();

        let mut root = self.probe(&path).map_err(TreeError::Probe)?;
        info!(
            path = %root.name,
            node_type = ?root.node_type,
            workers = self.workers,
            "Constructing secret tree"
        );

        let stats = CrawlStats::default();
        let outcome = self.crawl(&mut root, options, &stats, progress);

        if !options.allow_deleted_keys {
            root.prune_empty();
        }
        if !options.fetch_keys {
            root.prune_keys();
        }
        root.sort();

        info!(
            nodes = root.count(),
            expanded = stats.expanded(),
            requests = stats.requests(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Secret tree constructed"
        );

        match outcome {
            Ok(()) => Ok(root),
            Err(Failure::Backend(source)) => Err(TreeError::Crawl {
                source,
                partial: Box::new(root),
            }),
            Err(Failure::Worker(source)) => Err(TreeError::Worker {
                source,
                partial: Box::new(root),
            }),
        }
    }

    /// Determine the type of the starting node
    ///
    /// A traversal root has no parent listing to infer its type from, so it
    /// is read and then listed directly.
    pub fn probe(&self, path: &str) -> BackendResult<TreeNode> {
        if path == "/" {
            return Ok(TreeNode::new("/", NodeType::Root));
        }

        let node_type = match self.backend.read(path, None) {
            Err(e) if e.is_not_found() => NodeType::Directory,
            Err(e) => return Err(e),
            Ok(_) => match self.backend.list(path) {
                Ok(_) => NodeType::DirectoryAndSecret,
                Err(e) if e.is_not_found() => NodeType::Secret,
                Err(e) => return Err(e),
            },
        };

        let name = match node_type {
            NodeType::Directory => format!("{}/", path.trim_end_matches('/')),
            _ => path.to_string(),
        };

        let mut node = TreeNode::new(name, node_type);
        node.mount_version = self.backend.mount_version(path)?;
        debug!(path = %node.name, node_type = ?node.node_type, mount_version = %node.mount_version, "Probed root");
        Ok(node)
    }

    fn crawl<F>(
        &self,
        root: &mut TreeNode,
        options: TreeOptions,
        stats: &CrawlStats,
        progress: Option<F>,
    ) -> Result<(), Failure>
    where
        F: FnMut(CrawlProgress) + Send,
    {
        let queue = WorkQueue::new(self.workers);
        let operations = classify(root, &options);
        if !operations.is_empty() {
            queue.push(WorkOrder {
                node: root,
                operations,
            });
        }

        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let (done_tx, done_rx) = bounded::<()>(0);
        let started = Instant::now();
        let total_workers = self.workers;

        thread::scope(|scope| {
            let queue = &queue;
            let mut handles = Vec::with_capacity(self.workers);
            let mut worker_error = None;

            for id in 0..self.workers {
                let worker = TreeWorker {
                    id,
                    backend: self.backend,
                    queue,
                    completions: completion_tx.clone(),
                    options,
                    stats,
                };

                let spawned = thread::Builder::new()
                    .name(format!("tree-worker-{}", id))
                    .spawn_scoped(scope, move || worker.run());

                match spawned {
                    Ok(handle) => handles.push((id, handle)),
                    Err(e) => {
                        warn!(worker = id, error = %e, "Failed to spawn tree worker");
                        // The queue counts on a full pool to detect quiescence
                        queue.close();
                        worker_error = Some(WorkerError::SpawnFailed {
                            id,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
            drop(completion_tx);

            let reporter = progress.and_then(|mut callback| {
                thread::Builder::new()
                    .name("tree-progress".into())
                    .spawn_scoped(scope, move || loop {
                        match done_rx.recv_timeout(PROGRESS_INTERVAL) {
                            Err(RecvTimeoutError::Timeout) => callback(CrawlProgress {
                                expanded: stats.expanded(),
                                discovered: stats.discovered(),
                                requests: stats.requests(),
                                queued: queue.len(),
                                active_workers: queue.awake(),
                                total_workers,
                                elapsed: started.elapsed(),
                            }),
                            _ => break,
                        }
                    })
                    .map_err(|e| warn!(error = %e, "Progress reporting disabled"))
                    .ok()
            });

            // Exactly one completion per spawned worker; a disconnect means a
            // worker died without reporting
            let mut first_error: Option<BackendError> = None;
            for _ in 0..handles.len() {
                match completion_rx.recv() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => break,
                }
            }
            drop(done_tx);

            for (id, handle) in handles {
                if let Err(payload) = handle.join() {
                    let message = panic_message(payload.as_ref());
                    warn!(worker = id, message = %message, "Tree worker panicked");
                    worker_error.get_or_insert(WorkerError::Panicked { id, message });
                }
            }
            if let Some(reporter) = reporter {
                if reporter.join().is_err() {
                    warn!("Progress reporter panicked");
                }
            }

            match (first_error, worker_error) {
                (Some(e), _) => Err(Failure::Backend(e)),
                (None, Some(e)) => Err(Failure::Worker(e)),
                (None, None) => Ok(()),
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker thread panicked".to_string()
    }
}

/// Build the tree rooted at `path` with the default pool size
pub fn construct_tree<B: Backend + ?Sized>(
    backend: &B,
    path: &str,
    options: TreeOptions,
) -> Result<TreeNode, TreeError> {
    TreeBuilder::new(backend).construct(path, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KvVersion, MemoryBackend, MountKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_mount("secret", MountKind::Kv, KvVersion::V2)
            .with_secret("secret/app", &[("k", "v")])
            .with_secret("secret/app/db", &[("k", "v")])
            .with_secret("secret/leaf", &[("k", "v")])
    }

    #[test]
    fn test_worker_count_clamped() {
        let b = backend();
        assert_eq!(TreeBuilder::new(&b).workers(0).worker_count(), 1);
        assert_eq!(TreeBuilder::new(&b).workers(64).worker_count(), MAX_WORKERS);
        let default = TreeBuilder::new(&b).worker_count();
        assert!((1..=MAX_WORKERS).contains(&default));
    }

    #[test]
    fn test_probe_node_types() {
        let b = backend();
        let builder = TreeBuilder::new(&b);

        assert_eq!(builder.probe("/").unwrap().node_type, NodeType::Root);

        let dir = builder.probe("secret").unwrap();
        assert_eq!(dir.node_type, NodeType::Directory);
        assert_eq!(dir.name, "secret/");
        assert_eq!(dir.mount_version, KvVersion::V2);

        assert_eq!(builder.probe("secret/app").unwrap().node_type, NodeType::DirectoryAndSecret);
        assert_eq!(builder.probe("secret/leaf").unwrap().node_type, NodeType::Secret);
    }

    #[test]
    fn test_construct_empty_path_is_root() {
        let b = backend();
        let tree = construct_tree(&b, "  ", TreeOptions::default()).unwrap();
        assert_eq!(tree.node_type, NodeType::Root);
        assert_eq!(tree.branches.len(), 1);
        assert_eq!(tree.branches[0].name, "secret/");
    }

    #[test]
    fn test_construct_secret_without_work() {
        let b = MemoryBackend::new()
            .with_mount("legacy", MountKind::Generic, KvVersion::V1)
            .with_secret("legacy/x", &[("k", "v")]);

        let tree = construct_tree(&b, "legacy/x", TreeOptions::default()).unwrap();
        assert_eq!(tree.node_type, NodeType::Secret);
        assert!(tree.is_leaf());
    }

    #[test]
    fn test_progress_callback_receives_snapshots() {
        let b = backend();
        let calls = AtomicUsize::new(0);
        let tree = TreeBuilder::new(&b)
            .workers(2)
            .construct_with_progress("secret", TreeOptions::default(), |p| {
                assert_eq!(p.total_workers, 2);
                calls.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        // The crawl may finish before the first tick
        assert!(calls.load(Ordering::Relaxed) < 1000);
        assert_eq!(
            tree.paths(),
            vec!["secret/app", "secret/app/db", "secret/leaf"]
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "worker thread panicked");
    }
}
