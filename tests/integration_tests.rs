//! Integration tests for kvsafe
//!
//! Everything runs against the in-memory backend; no server is needed.

use kvsafe::backend::{Backend, KvVersion, MemoryBackend, MountKind};
use kvsafe::config::{ExportArgs, ImportArgs, PathsArgs};
use kvsafe::error::{BackendError, TreeError};
use kvsafe::tree::{construct_tree, NodeType, TreeBuilder, TreeNode, TreeOptions};
use kvsafe::Session;
use std::io::Write;

fn keys() -> TreeOptions {
    TreeOptions {
        fetch_keys: true,
        ..Default::default()
    }
}

fn mixed_listing() -> MemoryBackend {
    MemoryBackend::new()
        .with_mount("secret", MountKind::Generic, KvVersion::V1)
        .with_mount("cf", MountKind::Kv, KvVersion::V1)
        .with_listing("secret", &["a/", "a/b"])
        .with_listing("secret/a", &["c"])
        .with_secret("secret/a/c", &[("key", "v")])
        .with_secret("secret/a/b", &[("key", "v")])
}

#[test]
fn test_construct_from_root() {
    let backend = mixed_listing();

    let tree = construct_tree(&backend, "/", keys()).unwrap();

    let expected = TreeNode::new("/", NodeType::Root).with_branches(vec![
        TreeNode::new("cf/", NodeType::Directory),
        TreeNode::new("secret/", NodeType::Directory).with_branches(vec![
            TreeNode::new("secret/a/", NodeType::Directory).with_branches(vec![
                TreeNode::new("secret/a/c", NodeType::Secret)
                    .with_branches(vec![TreeNode::key("secret/a/c", "key", "v", 1, false)]),
            ]),
            TreeNode::new("secret/a/b", NodeType::Secret)
                .with_branches(vec![TreeNode::key("secret/a/b", "key", "v", 1, false)]),
        ]),
    ]);
    assert_eq!(tree, expected);
    assert_eq!(
        tree.paths(),
        vec!["cf/", "secret/a/c:key", "secret/a/b:key"]
    );
}

#[test]
fn test_construct_is_repeatable_across_pool_sizes() {
    let backend = mixed_listing();

    let single = TreeBuilder::new(&backend).workers(1).construct("/", keys()).unwrap();
    let pooled = TreeBuilder::new(&backend).workers(3).construct("/", keys()).unwrap();
    let again = TreeBuilder::new(&backend).workers(3).construct("/", keys()).unwrap();

    assert_eq!(single, pooled);
    assert_eq!(pooled, again);
}

#[test]
fn test_soft_deleted_secrets_pruned() {
    let backend = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/a/b", &[("k", "v")])
        .with_deleted("secret/a/b", 1)
        .with_secret("secret/a/c", &[("k", "v")])
        .with_secret("secret/gone/x", &[("k", "v")])
        .with_deleted("secret/gone/x", 1);

    let tree = construct_tree(&backend, "secret", TreeOptions::default()).unwrap();
    assert_eq!(tree.paths(), vec!["secret/a/c"]);
    assert!(tree.branches.iter().all(|b| b.name != "secret/gone/"));

    let quick = TreeOptions {
        allow_deleted_keys: true,
        ..Default::default()
    };
    let tree = construct_tree(&backend, "secret", quick).unwrap();
    assert_eq!(
        tree.paths(),
        vec!["secret/a/b", "secret/a/c", "secret/gone/x"]
    );
}

#[test]
fn test_emptied_root_directory_is_kept_bare() {
    let backend = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/a/b", &[("k", "v")])
        .with_deleted("secret/a/b", 1);

    let tree = construct_tree(&backend, "secret/a", TreeOptions::default()).unwrap();
    assert_eq!(tree.name, "secret/a/");
    assert_eq!(tree.node_type, NodeType::Directory);
    assert!(tree.branches.is_empty());
    assert_eq!(tree.paths(), vec!["secret/a/"]);
}

#[test]
fn test_all_versions_expand_to_version_nodes() {
    let backend = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/db", &[("user", "admin")])
        .with_secret("secret/db", &[("user", "root")])
        .with_secret("secret/db", &[("user", "nobody")])
        .with_destroyed("secret/db", 2);

    let options = TreeOptions {
        fetch_keys: true,
        fetch_all_versions: true,
        ..Default::default()
    };
    let tree = construct_tree(&backend, "secret", options).unwrap();

    let db = &tree.branches[0];
    assert_eq!(db.name, "secret/db");
    let versions: Vec<u32> = db.branches.iter().map(|v| v.version).collect();
    assert_eq!(versions, vec![1, 3]);
    assert!(db.branches.iter().all(|v| v.node_type == NodeType::Version));
    assert_eq!(db.branches[1].branches[0].value.as_deref(), Some("nobody"));
}

#[test]
fn test_list_failure_returns_partial_tree() {
    let backend = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V1)
        .with_secret("secret/a/b", &[("k", "v")])
        .with_secret("secret/x", &[("k", "v")])
        .with_list_failure("secret/a", "connection reset");

    let err = TreeBuilder::new(&backend)
        .workers(3)
        .construct("secret", TreeOptions::default())
        .unwrap_err();

    assert!(matches!(
        err.backend_error(),
        Some(BackendError::Transport { path, .. }) if path == "secret/a"
    ));
    assert!(matches!(err, TreeError::Crawl { .. }));

    let partial = err.into_partial_tree().unwrap();
    assert_eq!(partial.name, "secret/");
    assert_eq!(partial.paths(), vec!["secret/a/", "secret/x"]);
}

#[test]
fn test_missing_root_fails_probe() {
    let backend = MemoryBackend::new().with_mount("secret", MountKind::Kv, KvVersion::V2);
    let err = construct_tree(&backend, "nowhere", TreeOptions::default()).unwrap_err();
    assert!(matches!(err, TreeError::Probe(_)));
    assert!(err.partial_tree().is_none());
}

#[test]
fn test_depth_first_map_rewrites_tree() {
    let backend = mixed_listing();
    let mut tree = construct_tree(&backend, "secret", keys()).unwrap();

    tree.depth_first_map(|node| {
        if node.node_type == NodeType::Key {
            node.value = Some("redacted".into());
        }
    });

    let mut values = Vec::new();
    tree.depth_first_map(|node| values.extend(node.value.clone()));
    assert_eq!(values, vec!["redacted", "redacted"]);
}

#[test]
fn test_paths_command_output() {
    let backend = mixed_listing();
    let session = Session::new(&backend).workers(Some(2));

    let mut out = Vec::new();
    let args = PathsArgs {
        paths: vec!["secret".into()],
        ..Default::default()
    };
    session.paths(&args, &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "secret/a/c\nsecret/a/b\n");
}

#[test]
fn test_export_import_round_trip() {
    let source = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/app/db", &[("user", "admin")])
        .with_secret("secret/app/db", &[("user", "root")])
        .with_deleted("secret/app/db", 1)
        .with_secret("secret/app/api", &[("token", "abc")]);

    let mut exported = Vec::new();
    let export = ExportArgs {
        all: true,
        deleted: true,
        paths: vec!["secret/app".into()],
        ..Default::default()
    };
    Session::new(&source).export(&export, &mut exported).unwrap();

    // Exporting must leave the soft-deleted version deleted
    assert!(source.read("secret/app/db", Some(1)).unwrap_err().is_not_found());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&exported).unwrap();

    let target = MemoryBackend::new().with_mount("secret", MountKind::Kv, KvVersion::V2);
    let mut out = Vec::new();
    let import = ImportArgs {
        file: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    Session::new(&target).import(&import, &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "imported 2 secrets (3 versions written, 0 padded, 0 skipped)\n"
    );

    let versions = target.versions("secret/app/db").unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].deleted);
    assert!(!versions[1].deleted);
    assert_eq!(target.read("secret/app/db", None).unwrap()["user"], "root");
    assert_eq!(target.read("secret/app/api", None).unwrap()["token"], "abc");
}

#[test]
fn test_versioned_import_needs_versioned_mount() {
    let source = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/db", &[("user", "admin")])
        .with_secret("secret/db", &[("user", "root")]);

    let mut exported = Vec::new();
    let export = ExportArgs {
        all: true,
        ..Default::default()
    };
    Session::new(&source).export(&export, &mut exported).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&exported).unwrap();

    let flat = MemoryBackend::new().with_mount("secret", MountKind::Generic, KvVersion::V1);
    let import = ImportArgs {
        file: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    assert!(Session::new(&flat).import(&import, &mut Vec::new()).is_err());

    let shallow = ImportArgs {
        shallow: true,
        ..import
    };
    Session::new(&flat).import(&shallow, &mut Vec::new()).unwrap();
    assert_eq!(flat.read("secret/db", None).unwrap()["user"], "root");
}

fn export_then_import(source: &MemoryBackend, target: &MemoryBackend, import: ImportArgs) -> String {
    let mut exported = Vec::new();
    let export = ExportArgs {
        all: true,
        ..Default::default()
    };
    Session::new(source).export(&export, &mut exported).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&exported).unwrap();

    let mut out = Vec::new();
    let import = ImportArgs {
        file: Some(file.path().to_path_buf()),
        ..import
    };
    Session::new(target).import(&import, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn states(backend: &MemoryBackend, path: &str) -> Vec<&'static str> {
    backend
        .versions(path)
        .unwrap()
        .iter()
        .map(|v| v.state())
        .collect()
}

#[test]
fn test_round_trip_keeps_destroyed_version_numbers() {
    let source = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/db", &[("u", "one")])
        .with_secret("secret/db", &[("u", "two")])
        .with_secret("secret/db", &[("u", "three")])
        .with_destroyed("secret/db", 2);

    let target = MemoryBackend::new().with_mount("secret", MountKind::Kv, KvVersion::V2);
    let summary = export_then_import(&source, &target, ImportArgs::default());
    assert_eq!(summary, "imported 1 secrets (2 versions written, 1 padded, 0 skipped)\n");

    assert_eq!(states(&target, "secret/db"), vec!["alive", "destroyed", "alive"]);
    assert_eq!(target.read("secret/db", Some(1)).unwrap()["u"], "one");
    assert!(target.read("secret/db", Some(2)).unwrap_err().is_not_found());
    assert_eq!(target.read("secret/db", Some(3)).unwrap()["u"], "three");
}

#[test]
fn test_round_trip_keeps_late_first_version() {
    let source = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/db", &[("u", "one")])
        .with_secret("secret/db", &[("u", "two")])
        .with_secret("secret/db", &[("u", "three")])
        .with_destroyed("secret/db", 1);

    let target = MemoryBackend::new().with_mount("secret", MountKind::Kv, KvVersion::V2);
    export_then_import(&source, &target, ImportArgs::default());

    assert_eq!(states(&target, "secret/db"), vec!["destroyed", "alive", "alive"]);
    assert_eq!(target.read("secret/db", Some(2)).unwrap()["u"], "two");
    assert_eq!(target.read("secret/db", Some(3)).unwrap()["u"], "three");
}

#[test]
fn test_ignore_destroyed_compacts_versions() {
    let source = MemoryBackend::new()
        .with_mount("secret", MountKind::Kv, KvVersion::V2)
        .with_secret("secret/db", &[("u", "one")])
        .with_secret("secret/db", &[("u", "two")])
        .with_secret("secret/db", &[("u", "three")])
        .with_destroyed("secret/db", 2);

    let target = MemoryBackend::new().with_mount("secret", MountKind::Kv, KvVersion::V2);
    let import = ImportArgs {
        ignore_destroyed: true,
        ..Default::default()
    };
    let summary = export_then_import(&source, &target, import);
    assert_eq!(summary, "imported 1 secrets (2 versions written, 0 padded, 1 skipped)\n");

    assert_eq!(states(&target, "secret/db"), vec!["alive", "alive"]);
    assert_eq!(target.read("secret/db", Some(2)).unwrap()["u"], "three");
}
