//! Secret tree nodes
//!
//! A tree is a strict hierarchy: every node owns its `branches` and no node
//! is shared. Names are full paths; key nodes append `:key`, and version
//! nodes repeat their secret's name with a distinct `version`.

use crate::backend::KvVersion;
use std::cmp::Ordering;

/// What a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// The `/` of a whole-backend traversal
    Root,

    /// A path that only has children
    Directory,

    /// A path holding key/value data
    Secret,

    /// A path that both holds data and has children
    DirectoryAndSecret,

    /// One key within a secret
    Key,

    /// One version of a secret (only when all versions are fetched)
    Version,
}

/// One element of the secret hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Full path; key nodes carry a `:key` suffix
    pub name: String,

    pub node_type: NodeType,

    /// Generation of the mount this path lives under
    pub mount_version: KvVersion,

    /// Raw value, only set on key nodes
    pub value: Option<String>,

    /// Version this node stands for; 0 means latest on non-key nodes
    pub version: u32,

    /// Soft-deleted version
    pub deleted: bool,

    /// Children, exclusively owned
    pub branches: Vec<TreeNode>,
}

impl TreeNode {
    /// Create a childless node
    pub fn new(name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            name: name.into(),
            node_type,
            mount_version: KvVersion::V1,
            value: None,
            version: 0,
            deleted: false,
            branches: Vec::new(),
        }
    }

    /// Create a key node for `secret:key`
    pub fn key(secret: &str, key: &str, value: impl Into<String>, version: u32, deleted: bool) -> Self {
        Self {
            value: Some(value.into()),
            version,
            deleted,
            ..Self::new(format!("{}:{}", secret, key), NodeType::Key)
        }
    }

    /// Create a node for one version of a secret
    pub fn version_of(secret: &str, number: u32, deleted: bool) -> Self {
        Self {
            version: number,
            deleted,
            ..Self::new(secret, NodeType::Version)
        }
    }

    /// Builder-style child attachment, mostly for assembling trees by hand
    pub fn with_branches(mut self, branches: Vec<TreeNode>) -> Self {
        self.branches = branches;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.branches.is_empty()
    }

    /// Names of every leaf, depth first
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths(&self, out: &mut Vec<String>) {
        if self.branches.is_empty() {
            out.push(self.name.clone());
            return;
        }
        for branch in &self.branches {
            branch.collect_paths(out);
        }
    }

    /// Last path segment, as it would appear in a listing
    ///
    /// Directories keep a trailing `/`, keys get a leading `:`.
    pub fn basename(&self) -> String {
        let last_segment = || {
            self.name
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        };

        match self.node_type {
            NodeType::Root => "/".to_string(),
            NodeType::Directory => format!("{}/", last_segment()),
            NodeType::Secret | NodeType::DirectoryAndSecret | NodeType::Version => last_segment(),
            NodeType::Key => {
                let key = self.name.rsplit(':').next().unwrap_or_default();
                format!(":{}", key)
            }
        }
    }

    /// Visit this node and every descendant, parents before children
    pub fn depth_first_map<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut TreeNode),
    {
        self.map_inner(&mut visit);
    }

    fn map_inner<F>(&mut self, visit: &mut F)
    where
        F: FnMut(&mut TreeNode),
    {
        visit(self);
        for branch in &mut self.branches {
            branch.map_inner(visit);
        }
    }

    /// Total number of nodes, this one included
    pub fn count(&self) -> usize {
        1 + self.branches.iter().map(TreeNode::count).sum::<usize>()
    }

    /// Drop v2 subtrees left empty by filtered soft-deleted secrets
    ///
    /// Mount directories directly under the root and key nodes are kept.
    pub(crate) fn prune_empty(&mut self) {
        let is_root = self.node_type == NodeType::Root;
        let branches = std::mem::take(&mut self.branches);

        self.branches = branches
            .into_iter()
            .filter_map(|mut branch| {
                if !branch.mount_version.is_versioned() {
                    return Some(branch);
                }
                branch.prune_empty();
                let keep = is_root || branch.node_type == NodeType::Key || !branch.branches.is_empty();
                keep.then_some(branch)
            })
            .collect();
    }

    /// Remove every key node
    pub(crate) fn prune_keys(&mut self) {
        self.branches.retain(|branch| branch.node_type != NodeType::Key);
        for branch in &mut self.branches {
            branch.prune_keys();
        }
    }

    /// Sort siblings by name, then by version, recursively
    pub(crate) fn sort(&mut self) {
        for branch in &mut self.branches {
            branch.sort();
        }
        self.branches.sort_by(compare_siblings);
    }
}

fn compare_siblings(a: &TreeNode, b: &TreeNode) -> Ordering {
    a.name
        .as_bytes()
        .cmp(b.name.as_bytes())
        .then(a.version.cmp(&b.version))
}
