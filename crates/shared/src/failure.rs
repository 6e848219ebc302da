use core::fmt::Display;
use std::process;

use tracing::error;

/// Extension trait for results that end the process on failure.
pub trait Failure<T> {
    /// Log the error, print it to stderr and exit with `code`.
    fn or_exit(self, message: &str, code: i32) -> T;
}

impl<T, E: Display> Failure<T> for Result<T, E> {
    fn or_exit(self, message: &str, code: i32) -> T {
        match self {
            Ok(value) => value,
            Err(error) => {
                // The logger may not be initialized yet.
                error!("{message}: {error}");
                eprintln!("{message}: {error}");
                process::exit(code)
            }
        }
    }
}
