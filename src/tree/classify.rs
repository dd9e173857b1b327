//! Mapping nodes to the backend calls needed to expand them

use super::node::{NodeType, TreeNode};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of backend operations for one work order
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Operations(u8);

impl Operations {
    pub const NONE: Operations = Operations(0);
    pub const LIST: Operations = Operations(1);
    pub const GET: Operations = Operations(1 << 1);
    pub const MOUNTS: Operations = Operations(1 << 2);
    pub const VERSIONS: Operations = Operations(1 << 3);

    /// Check if every operation in `other` is set
    pub fn contains(self, other: Operations) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Operations {
    type Output = Operations;

    fn bitor(self, rhs: Operations) -> Operations {
        Operations(self.0 | rhs.0)
    }
}

impl BitOrAssign for Operations {
    fn bitor_assign(&mut self, rhs: Operations) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Operations::LIST, "LIST"),
            (Operations::GET, "GET"),
            (Operations::MOUNTS, "MOUNTS"),
            (Operations::VERSIONS, "VERSIONS"),
        ]
        .iter()
        .filter(|(op, _)| self.contains(*op))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// What a tree construction should fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeOptions {
    /// Read every secret and keep its keys in the tree
    pub fetch_keys: bool,

    /// Keep soft-deleted secrets listed by KV v2 instead of reading them
    /// to filter them out
    pub allow_deleted_keys: bool,

    /// Expand every non-destroyed version of each secret
    pub fetch_all_versions: bool,
}

impl TreeOptions {
    fn wants_get(&self, node: &TreeNode) -> bool {
        self.fetch_keys || (node.mount_version.is_versioned() && !self.allow_deleted_keys)
    }
}

/// Operations needed to expand `node`
pub fn classify(node: &TreeNode, options: &TreeOptions) -> Operations {
    match node.node_type {
        NodeType::Root => Operations::MOUNTS,
        NodeType::Directory => Operations::LIST,
        NodeType::DirectoryAndSecret if options.wants_get(node) => Operations::LIST | Operations::GET,
        NodeType::DirectoryAndSecret => Operations::LIST,
        NodeType::Secret if options.fetch_all_versions => Operations::VERSIONS,
        NodeType::Secret if options.wants_get(node) => Operations::GET,
        NodeType::Secret => Operations::NONE,
        NodeType::Version => Operations::GET,
        NodeType::Key => Operations::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::KvVersion;

    fn node(node_type: NodeType, mount_version: KvVersion) -> TreeNode {
        TreeNode {
            mount_version,
            ..TreeNode::new("secret/x", node_type)
        }
    }

    #[test]
    fn test_operations_bits() {
        let ops = Operations::LIST | Operations::GET;
        assert!(ops.contains(Operations::LIST));
        assert!(ops.contains(Operations::GET));
        assert!(!ops.contains(Operations::MOUNTS));
        assert!(Operations::NONE.is_empty());
        assert_eq!(format!("{:?}", ops), "LIST|GET");
        assert_eq!(format!("{:?}", Operations::NONE), "NONE");
    }

    #[test]
    fn test_classify_structural_nodes() {
        let opts = TreeOptions::default();
        assert_eq!(classify(&node(NodeType::Root, KvVersion::V1), &opts), Operations::MOUNTS);
        assert_eq!(classify(&node(NodeType::Directory, KvVersion::V2), &opts), Operations::LIST);
        assert_eq!(classify(&node(NodeType::Version, KvVersion::V2), &opts), Operations::GET);
        assert_eq!(classify(&node(NodeType::Key, KvVersion::V2), &opts), Operations::NONE);
    }

    #[test]
    fn test_classify_secret() {
        let v1 = node(NodeType::Secret, KvVersion::V1);
        let v2 = node(NodeType::Secret, KvVersion::V2);

        let plain = TreeOptions::default();
        assert_eq!(classify(&v1, &plain), Operations::NONE);
        assert_eq!(classify(&v2, &plain), Operations::GET);

        let allow = TreeOptions {
            allow_deleted_keys: true,
            ..Default::default()
        };
        assert_eq!(classify(&v2, &allow), Operations::NONE);

        let keys = TreeOptions {
            fetch_keys: true,
            allow_deleted_keys: true,
            ..Default::default()
        };
        assert_eq!(classify(&v1, &keys), Operations::GET);

        let all = TreeOptions {
            fetch_keys: true,
            fetch_all_versions: true,
            ..Default::default()
        };
        assert_eq!(classify(&v1, &all), Operations::VERSIONS);
    }

    #[test]
    fn test_classify_directory_and_secret() {
        let v1 = node(NodeType::DirectoryAndSecret, KvVersion::V1);
        let v2 = node(NodeType::DirectoryAndSecret, KvVersion::V2);
        let opts = TreeOptions::default();

        assert_eq!(classify(&v1, &opts), Operations::LIST);
        assert_eq!(classify(&v2, &opts), Operations::LIST | Operations::GET);

        let keys = TreeOptions {
            fetch_keys: true,
            ..Default::default()
        };
        assert_eq!(classify(&v1, &keys), Operations::LIST | Operations::GET);
    }

    #[test]
    fn test_classify_is_pure() {
        let dir = TreeNode::new("secret/a", NodeType::Directory);
        classify(&dir, &TreeOptions::default());
        assert_eq!(dir.name, "secret/a");
    }
}
