//! Command line interface.
//!

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::Config;

/// Backs up a data container into pack and index files.
#[derive(Debug, Parser)]
#[command(name = "v3io-backup", version, about)]
pub struct Cli {
    /// Configuration file, defaults to `v3io-backup-config.toml`.
    #[arg(short = 'g', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Web API endpoint of the data platform.
    #[arg(short = 's', long = "server", global = true)]
    pub server: Option<String>,

    /// Name of the data container.
    #[arg(short, long, global = true)]
    pub container: Option<String>,

    /// Username of a data platform user.
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// Password of the user.
    #[arg(short, long, global = true)]
    pub password: Option<String>,

    /// Access key, takes precedence over username and password.
    #[arg(short = 'k', long = "access-key", global = true)]
    pub access_key: Option<String>,

    /// Log level: debug, info, warn or error.
    #[arg(short = 'v', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[allow(missing_docs)]
    #[command(subcommand)]
    pub command: Command,
}

#[allow(missing_docs)]
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Back up the configured paths.
    #[command(visible_alias = "bk")]
    Backup(BackupArgs),

    /// Write a default configuration file.
    Init,

    /// Print build information.
    Version,
}

/// Arguments of the `backup` command.
#[derive(Debug, Default, Args)]
pub struct BackupArgs {
    /// Target repository, a directory or a file:// URL.
    #[arg(short = 'r', long = "repo")]
    pub repository: Option<String>,

    /// Paths within the container to back up.
    #[arg(short = 'd', long = "paths")]
    pub paths: Vec<String>,

    /// Regular expressions of paths to exclude.
    #[arg(short = 'e', long = "excludes")]
    pub excludes: Vec<String>,

    /// Only back up entries modified after this RFC 3339 time.
    #[arg(long)]
    pub modified_after: Option<DateTime<Utc>>,

    /// Only back up entries modified after the last successful backup.
    #[arg(long)]
    pub incremental: bool,

    /// Fail the backup if any subtree or entry failed.
    #[arg(long)]
    pub strict: bool,
}

impl Cli {
    /// Applies the connection flags on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.web_api_endpoint.clone_from(server);
        }

        if let Some(container) = &self.container {
            config.container.clone_from(container);
        }

        if self.username.is_some() {
            config.username.clone_from(&self.username);
        }

        if self.password.is_some() {
            config.password.clone_from(&self.password);
        }

        if self.access_key.is_some() {
            config.access_key.clone_from(&self.access_key);
        }

        if let Some(log_level) = &self.log_level {
            config.log_level.clone_from(log_level);
        }
    }
}

impl BackupArgs {
    /// Applies the backup flags on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        let backup = &mut config.backup;

        if let Some(repository) = &self.repository {
            backup.repository.clone_from(repository);
        }

        if !self.paths.is_empty() {
            backup.paths.clone_from(&self.paths);
        }

        if !self.excludes.is_empty() {
            backup.exclude_filters.clone_from(&self.excludes);
        }

        if self.modified_after.is_some() {
            backup.modified_after = self.modified_after;
        }

        backup.incremental |= self.incremental;
        backup.strict |= self.strict;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "v3io-backup",
            "-s",
            "file:///mnt/v3io",
            "-c",
            "bigdata",
            "bk",
            "-r",
            "/backups",
            "-d",
            "/a",
            "-d",
            "/b",
            "-e",
            r"\.tmp$",
            "--modified-after",
            "2024-05-01T10:00:00Z",
            "--strict",
        ]);

        let mut config = Config::default();
        cli.apply(&mut config);
        let Command::Backup(args) = &cli.command else {
            panic!("expected the backup command");
        };
        args.apply(&mut config);

        assert_eq!(config.web_api_endpoint, "file:///mnt/v3io");
        assert_eq!(config.container, "bigdata");
        assert_eq!(config.backup.repository, "/backups");
        assert_eq!(config.backup.paths, ["/a", "/b"]);
        assert_eq!(config.backup.exclude_filters, [r"\.tmp$"]);
        assert!(config.backup.modified_after.is_some());
        assert!(config.backup.strict);
        assert!(!config.backup.incremental);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::parse_from(["v3io-backup", "backup"]);

        let mut config = Config {
            container: "users".to_string(),
            ..Config::default()
        };
        config.backup.paths = vec!["/home".to_string()];
        cli.apply(&mut config);
        if let Command::Backup(args) = &cli.command {
            args.apply(&mut config);
        }

        assert_eq!(config.container, "users");
        assert_eq!(config.backup.paths, ["/home"]);
    }
}
