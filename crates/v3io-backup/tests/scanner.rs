//! Tests for the path scanner
//!

use core::time::Duration;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{at, drain_paths, manager, stats, test_config};
use v3io_backup::{
    CancelToken, ErrorKind,
    container::{Fault, MockContainer},
    iterator::IteratorState,
    scanner::{ScanRequest, Scanner},
    session::SessionCounters,
};

mod common;

fn tree() -> MockContainer {
    MockContainer::new()
        .with_file("/a/1.txt", "0123456789", at(10))
        .with_file("/a/2.txt", "01234", at(20))
        .with_file("/a/b/3.log", "log", at(30))
        .with_file("/c/4.tmp", "tmp", at(40))
        .with_directory("/empty")
}

fn scan(
    mock: MockContainer,
    paths: &[&str],
    excludes: &[&str],
    cutoff: Option<DateTime<Utc>>,
) -> (Vec<String>, SessionCounters, Option<ErrorKind>) {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(mock);
    let stats = stats();

    let scanner = Scanner::new(
        manager(&config, &mock, &cancel),
        config.scanner_parallelism,
        Arc::clone(&stats),
        cancel,
    );
    let request = ScanRequest::new(paths, excludes, cutoff).unwrap();
    let mut iterator = scanner.scan(&request).unwrap();

    let paths = drain_paths(&mut iterator);
    let error = iterator.error().map(|error| error.kind());

    (paths, stats.snapshot(), error)
}

#[test]
fn scans_every_file_below_the_roots() {
    let (paths, counters, error) = scan(tree(), &["/"], &[], None);

    assert_eq!(paths, ["/a/1.txt", "/a/2.txt", "/a/b/3.log", "/c/4.tmp"]);
    assert_eq!(counters.entries_scanned, 4);
    assert_eq!(counters.entries_skipped, 0);
    assert!(error.is_none());
}

#[test]
fn overlapping_roots_are_scanned_once() {
    let (paths, _, _) = scan(tree(), &["/a/b", "/a/b/", "a/b"], &[], None);

    assert_eq!(paths, ["/a/b/3.log"]);
}

#[test]
fn excluded_entries_are_skipped() {
    let (paths, counters, _) = scan(tree(), &["/"], &[r"\.tmp$", r"^/a/b/"], None);

    assert_eq!(paths, ["/a/1.txt", "/a/2.txt"]);
    assert_eq!(counters.entries_skipped, 2);
}

#[test]
fn cutoff_is_strict() {
    let (paths, counters, _) = scan(tree(), &["/"], &[], Some(at(20)));

    // Modified exactly at the cutoff is not newer.
    assert_eq!(paths, ["/a/b/3.log", "/c/4.tmp"]);
    assert_eq!(counters.entries_skipped, 2);
}

#[test]
fn missing_root_is_counted_and_skipped() {
    let (paths, counters, error) = scan(tree(), &["/missing", "/c"], &[], None);

    assert_eq!(paths, ["/c/4.tmp"]);
    assert_eq!(counters.subtrees_missing, 1);
    assert_eq!(counters.subtrees_failed, 0);
    assert!(error.is_none());
}

#[test]
fn failing_subtree_does_not_stop_siblings() {
    let mock = tree().with_list_fault("/a/b", Fault::AlwaysTransient);
    let (paths, counters, error) = scan(mock, &["/"], &[], None);

    assert_eq!(paths, ["/a/1.txt", "/a/2.txt", "/c/4.tmp"]);
    assert_eq!(counters.subtrees_failed, 1);
    assert!(error.is_none());
}

#[test]
fn transient_listing_is_retried() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(tree().with_list_fault("/a", Fault::TransientTimes(2)));
    let stats = stats();

    let scanner = Scanner::new(manager(&config, &mock, &cancel), 2, Arc::clone(&stats), cancel);
    let request = ScanRequest::new(&["/a"], &[], None).unwrap();
    let mut iterator = scanner.scan(&request).unwrap();

    assert_eq!(
        drain_paths(&mut iterator),
        ["/a/1.txt", "/a/2.txt", "/a/b/3.log"]
    );
    assert_eq!(mock.list_calls("/a"), 3);
    assert_eq!(stats.snapshot().subtrees_failed, 0);
}

#[test]
fn fatal_listing_errors_the_iterator() {
    let mock = tree().with_list_fault("/a/b", Fault::Fatal);
    let (_, _, error) = scan(mock, &["/"], &[], None);

    assert_eq!(error, Some(ErrorKind::FatalScan));
}

#[test]
fn fatal_listing_is_sticky() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(tree().with_list_fault("/", Fault::Fatal));

    let scanner = Scanner::new(manager(&config, &mock, &cancel), 4, stats(), cancel.clone());
    let request = ScanRequest::new(&["/"], &[], None).unwrap();
    let mut iterator = scanner.scan(&request).unwrap();

    assert!(!iterator.advance());
    assert_eq!(iterator.state(), IteratorState::Errored);
    assert!(!iterator.advance());
    assert!(iterator.at().is_none());
    assert_eq!(iterator.error().map(|e| e.kind()), Some(ErrorKind::FatalScan));
    assert!(cancel.is_cancelled());

    assert_eq!(
        iterator.finish().map_err(|e| e.kind()),
        Err(ErrorKind::FatalScan)
    );
}

#[test]
fn concurrent_listings_never_exceed_parallelism() {
    let mut mock = MockContainer::new().with_list_delay(Duration::from_millis(10));
    for directory in 0..12 {
        for file in 0..3 {
            mock = mock.with_file(&format!("/d{directory}/f{file}"), "x", at(0));
        }
    }

    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(mock);

    let scanner = Scanner::new(manager(&config, &mock, &cancel), 3, stats(), cancel);
    let request = ScanRequest::new(&["/"], &[], None).unwrap();
    let mut iterator = scanner.scan(&request).unwrap();

    assert_eq!(drain_paths(&mut iterator).len(), 36);
    assert!(mock.max_concurrent_lists() >= 1);
    assert!(mock.max_concurrent_lists() <= 3);
}

#[test]
fn listing_timeout_counts_as_failed_subtree() {
    let repository = tempfile::tempdir().unwrap();
    let mut config = test_config(repository.path());
    config.http_timeout = "5ms".to_string();

    let cancel = CancelToken::new();
    let mock = Arc::new(
        MockContainer::new()
            .with_file("/a/1.txt", "1", at(0))
            .with_list_delay(Duration::from_millis(50)),
    );
    let stats = stats();

    let scanner = Scanner::new(manager(&config, &mock, &cancel), 2, Arc::clone(&stats), cancel);
    let request = ScanRequest::new(&["/a"], &[], None).unwrap();
    let mut iterator = scanner.scan(&request).unwrap();

    assert!(drain_paths(&mut iterator).is_empty());
    assert_eq!(iterator.state(), IteratorState::Exhausted);
    assert_eq!(mock.list_calls("/a"), 3);
    assert_eq!(stats.snapshot().subtrees_failed, 1);
}

#[test]
fn invalid_exclude_is_config_error() {
    let error = ScanRequest::new(&["/"], &["("], None).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Config);
}

#[test]
fn empty_paths_are_config_error() {
    let paths: [&str; 0] = [];
    let error = ScanRequest::new(&paths, &paths, None).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Config);
}
