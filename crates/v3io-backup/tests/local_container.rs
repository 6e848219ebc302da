//! Tests for the local filesystem container
//!

use core::time::Duration;
use std::fs;

use v3io_backup::{
    container::{Container, ContainerErrorKind, Credentials, LocalContainer},
    entry::ChildEntry,
};

const TIMEOUT: Duration = Duration::from_secs(1);

fn mounted() -> (tempfile::TempDir, LocalContainer) {
    let mount = tempfile::tempdir().unwrap();
    let root = mount.path().join("bigdata");
    fs::create_dir_all(root.join("b/c")).unwrap();
    fs::write(root.join("a.txt"), "a").unwrap();
    fs::write(root.join("b/c/d.txt"), "ddd").unwrap();

    let container = LocalContainer::new(mount.path(), "bigdata");
    (mount, container)
}

#[test]
fn from_endpoint_requires_file_scheme() {
    assert!(LocalContainer::from_endpoint("file:///mnt/v3io", "bigdata").is_some());
    assert!(LocalContainer::from_endpoint("http://webapi:8081", "bigdata").is_none());
}

#[test]
fn lists_sorted_children() {
    let (_mount, container) = mounted();
    container.connect(&Credentials::default(), TIMEOUT).unwrap();

    let children = container.list("/", TIMEOUT).unwrap();

    assert_eq!(children.len(), 2);
    match children.first() {
        Some(ChildEntry::File(info)) => {
            assert_eq!(info.path, "/a.txt");
            assert_eq!(info.size, 1);
        }
        other => panic!("expected /a.txt, got {other:?}"),
    }
    assert!(matches!(children.get(1), Some(ChildEntry::Directory(path)) if path == "/b"));

    let nested = container.list("/b/c", TIMEOUT).unwrap();
    assert!(matches!(nested.first(), Some(ChildEntry::File(info)) if info.path == "/b/c/d.txt"));
}

#[test]
fn reads_content() {
    let (_mount, container) = mounted();

    assert_eq!(container.get("/b/c/d.txt", TIMEOUT).unwrap(), b"ddd");
}

#[test]
fn missing_paths_are_not_found() {
    let (_mount, container) = mounted();

    let error = container.list("/missing", TIMEOUT).unwrap_err();
    assert_eq!(error.kind, ContainerErrorKind::NotFound);

    let error = container.get("/missing.txt", TIMEOUT).unwrap_err();
    assert_eq!(error.kind, ContainerErrorKind::NotFound);
}

#[test]
fn paths_cannot_escape_the_container() {
    let (_mount, container) = mounted();

    let error = container.get("/../secret", TIMEOUT).unwrap_err();
    assert_eq!(error.kind, ContainerErrorKind::Other);
}

#[test]
fn missing_container_is_unreachable() {
    let mount = tempfile::tempdir().unwrap();
    let container = LocalContainer::new(mount.path(), "absent");

    let error = container
        .connect(&Credentials::default(), TIMEOUT)
        .unwrap_err();
    assert_eq!(error.kind, ContainerErrorKind::Unreachable);
}
