//! # v3io-backup
//!

use std::{fs, path::PathBuf, process};

use clap::Parser;
use mimalloc::MiMalloc;
use shared::{Failure, init_logger};
use tracing::{error, info};
use v3io_backup::{
    CancelToken,
    backup::{self, EXIT_CONFIG, EXIT_FAILURE},
    cli::{Cli, Command},
    config::{Config, DEFAULT_CONFIG_FILE},
    version::BuildInfo,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    let cli = Cli::parse();

    let args = match &cli.command {
        Command::Version => {
            println!("{}", BuildInfo::current());
            return;
        }

        Command::Init => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if path.exists() {
                eprintln!("{} already exists", path.display());
                process::exit(EXIT_CONFIG);
            }

            let contents = toml::to_string_pretty(&Config::default())
                .or_exit("Could not serialize config file", EXIT_FAILURE);
            fs::write(&path, contents).or_exit("Could not create config file", EXIT_FAILURE);
            println!("Wrote default configuration to {}", path.display());
            return;
        }

        Command::Backup(args) => args,
    };

    // Load config
    let mut config =
        Config::load(cli.config.as_deref()).or_exit("Could not load config", EXIT_CONFIG);
    cli.apply(&mut config);
    args.apply(&mut config);

    let logger = init_logger(&config.log_level, &config.log_directory)
        .or_exit("Could not initialize logger", EXIT_FAILURE);

    info!("Starting {}", BuildInfo::current());
    info!("Configuration: {config}");

    let cancel = CancelToken::new();
    cancel
        .cancel_on_signal()
        .or_exit("Could not install the signal handler", EXIT_FAILURE);

    let code = match backup::run(&config, cancel) {
        Ok(report) => {
            let counters = report.counters();
            println!(
                "Backup written to {}: scanned {}, packed {}, skipped {}, failed {}",
                report.layout.directory().display(),
                counters.entries_scanned,
                counters.entries_packed,
                counters.total_skipped(),
                counters.entries_failed + counters.subtrees_failed
            );
            report.exit_code()
        }
        Err(failure) => {
            error!("{failure}");
            eprintln!("{failure}");
            failure.exit_code()
        }
    };

    drop(logger);
    process::exit(code);
}
