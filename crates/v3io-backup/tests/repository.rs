//! Tests for the repository layout
//!

use std::fs;

use common::at;
use v3io_backup::{
    ErrorKind,
    history::History,
    repository::{ReadSessionError, Repository},
};

mod common;

#[test]
fn session_directories_are_named_by_start_time() {
    let directory = tempfile::tempdir().unwrap();
    let repository = Repository::open(&directory.path().to_string_lossy()).unwrap();

    let started_at = "2024-05-01T10:20:30Z".parse().unwrap();
    let layout = repository.create_session(started_at).unwrap();

    assert_eq!(layout.directory(), directory.path().join("2024-05-01_10-20-30"));
    assert!(layout.directory().join("packs").is_dir());
    assert!(layout.directory().join("index").is_dir());
    assert_eq!(
        layout.pack_path(7),
        layout.directory().join("packs").join("pack-000007.pack")
    );
    assert_eq!(
        layout.index_path(12),
        layout.directory().join("index").join("index-000012.jsonl")
    );
}

#[test]
fn existing_session_directory_is_pack_write_error() {
    let directory = tempfile::tempdir().unwrap();
    let repository = Repository::open(&directory.path().to_string_lossy()).unwrap();

    repository.create_session(at(0)).unwrap();
    let error = repository.create_session(at(0)).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::PackWrite);
}

#[test]
fn file_urls_are_accepted() {
    let directory = tempfile::tempdir().unwrap();
    let target = directory.path().join("nested").join("repository");

    let repository = Repository::open(&format!("file://{}", target.display())).unwrap();

    assert_eq!(repository.root(), target);
    assert!(target.is_dir());
}

#[test]
fn other_schemes_are_config_errors() {
    let error = Repository::open("s3://bucket/backups").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Config);

    let error = Repository::open("  ").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Config);
}

#[test]
fn corrupt_index_is_reported_with_its_line() {
    let directory = tempfile::tempdir().unwrap();
    let repository = Repository::open(&directory.path().to_string_lossy()).unwrap();
    let layout = repository.create_session(at(0)).unwrap();

    fs::write(
        layout.index_path(0),
        "{\"path\":\"/a\",\"pack\":0,\"offset\":0,\"length\":1,\"modified\":\"2024-05-01T00:00:00Z\"}\nnot json\n",
    )
    .unwrap();

    match layout.load_index() {
        Err(ReadSessionError::Index(error)) => assert!(error.to_string().contains("line 2")),
        other => panic!("expected an index error, got {other:?}"),
    }
}

#[test]
fn history_round_trips() {
    let directory = tempfile::tempdir().unwrap();
    let key = History::key("bigdata", &["/a"]);

    let mut history = History::load_or_create_file(directory.path()).unwrap();
    assert!(directory.path().join("history.json").is_file());
    assert!(history.last_success(&key).is_none());

    history.update(key.clone(), at(42)).unwrap();

    let history = History::load_or_create_file(directory.path()).unwrap();
    assert_eq!(history.last_success(&key), Some(at(42)));
}

#[test]
fn corrupt_history_fails_to_load() {
    let directory = tempfile::tempdir().unwrap();
    fs::write(directory.path().join("history.json"), "{").unwrap();

    assert!(History::load_or_create_file(directory.path()).is_err());
}
