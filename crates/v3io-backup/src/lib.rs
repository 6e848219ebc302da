//! # v3io-backup
//! Backs up a remote data container into size-bounded pack and index files.
//!

pub mod backup;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod connection;
pub mod container;
pub mod entry;
pub mod error;
pub mod filter;
pub mod history;
pub mod index;
pub mod iterator;
pub mod pack;
pub mod repository;
pub mod scanner;
pub mod session;
pub mod version;

pub use cancel::CancelToken;
pub use error::{BackupError, ErrorKind};
