//! # Shared
//! Logging and failure helpers shared by the workspace binaries.
//!

#![warn(missing_docs)]

mod failure;
mod logger;

pub use failure::Failure;
pub use logger::{LoggerError, init_logger, parse_level};
