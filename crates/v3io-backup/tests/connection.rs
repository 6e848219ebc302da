//! Tests for the connection manager
//!

use core::time::Duration;
use std::{sync::Arc, thread, time::Instant};

use common::{at, manager, test_config};
use v3io_backup::{
    BackupError, CancelToken, ErrorKind,
    container::{Fault, MockContainer},
};

mod common;

fn container() -> MockContainer {
    MockContainer::new()
        .with_file("/a/1.txt", "one", at(0))
        .with_file("/a/2.txt", "two", at(0))
}

#[test]
fn connect_checks_the_first_path() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(container());

    let connection = manager(&config, &mock, &cancel);
    connection.connect("/a").unwrap();

    assert!(mock.is_connected());
    assert_eq!(mock.list_calls("/a"), 1);

    connection.disconnect();
    assert!(!mock.is_connected());
}

#[test]
fn missing_check_path_is_not_found() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(container());

    let error = manager(&config, &mock, &cancel).connect("/missing").unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert!(mock.is_connected());
}

#[test]
fn rejected_credentials_are_connection_errors() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();

    let mock = Arc::new(container().rejecting_credentials());
    let error = manager(&config, &mock, &cancel).connect("/").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Connection);

    let mock = Arc::new(container().unreachable());
    let error = manager(&config, &mock, &cancel).connect("/").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Connection);
}

#[test]
fn check_path_failing_every_attempt_stays_transient() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(container().with_list_fault("/a", Fault::AlwaysTransient));

    let error = manager(&config, &mock, &cancel).connect("/a").unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Transient);
    assert_eq!(mock.list_calls("/a"), 3);
    assert!(mock.is_connected());
}

#[test]
fn transient_failures_are_retried() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(container().with_get_fault("/a/1.txt", Fault::TransientTimes(2)));

    let content = manager(&config, &mock, &cancel).get("/a/1.txt").unwrap();

    assert_eq!(content, b"one");
    assert_eq!(mock.get_calls("/a/1.txt"), 3);
}

#[test]
fn persistent_transient_failure_reports_attempts() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(container().with_get_fault("/a/1.txt", Fault::AlwaysTransient));

    let error = manager(&config, &mock, &cancel).get("/a/1.txt").unwrap_err();

    match error {
        BackupError::Transient { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected a transient error, got {other}"),
    }
    assert_eq!(mock.get_calls("/a/1.txt"), 3);
}

#[test]
fn non_transient_failures_are_not_retried() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(
        container()
            .with_get_fault("/a/1.txt", Fault::Fatal)
            .with_get_fault("/a/2.txt", Fault::NotFound),
    );
    let connection = manager(&config, &mock, &cancel);

    assert_eq!(
        connection.get("/a/1.txt").unwrap_err().kind(),
        ErrorKind::FatalScan
    );
    assert_eq!(
        connection.get("/a/2.txt").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(mock.get_calls("/a/1.txt"), 1);
    assert_eq!(mock.get_calls("/a/2.txt"), 1);
}

#[test]
fn cancel_interrupts_backoff() {
    let repository = tempfile::tempdir().unwrap();
    let mut config = test_config(repository.path());
    config.retry.max_attempts = 10;
    config.retry.initial_backoff_ms = 10_000;
    config.retry.max_backoff_ms = 10_000;

    let cancel = CancelToken::new();
    let mock = Arc::new(container().with_get_fault("/a/1.txt", Fault::AlwaysTransient));
    let connection = manager(&config, &mock, &cancel);

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let error = connection.get("/a/1.txt").unwrap_err();
    canceller.join().unwrap();

    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(mock.get_calls("/a/1.txt"), 1);
}

#[test]
fn cancelled_session_makes_no_calls() {
    let repository = tempfile::tempdir().unwrap();
    let config = test_config(repository.path());
    let cancel = CancelToken::new();
    let mock = Arc::new(container());
    let connection = manager(&config, &mock, &cancel);

    cancel.cancel();

    assert_eq!(connection.list("/a").unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(mock.list_calls("/a"), 0);
}
