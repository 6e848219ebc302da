//! Build information.
//!

use core::fmt;
use std::env::consts;

/// What was built and for which platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    /// The package name.
    pub name: &'static str,

    /// The package version.
    pub version: &'static str,

    /// The target operating system.
    pub os: &'static str,

    /// The target architecture.
    pub arch: &'static str,
}

impl BuildInfo {
    /// Information about the running binary.
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            os: consts::OS,
            arch: consts::ARCH,
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}/{})", self.name, self.version, self.os, self.arch)
    }
}
