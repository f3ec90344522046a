// src/options.rs

use std::path::PathBuf;

use clap::Parser;

/// Single-instance sysfs GPIO daemon with a Unix-socket control interface.
#[derive(Parser, Debug)]
#[command(name = "sysgpiod", version, about)]
pub struct CliOpts {
    /// Detach and run as a background service.
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Pin map configuration file.
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: PathBuf,

    /// Control socket path.
    #[arg(short = 's', long, value_name = "PATH")]
    pub socket: PathBuf,

    /// Instance lock file; at most one service per lock path.
    #[arg(long = "lock-file", value_name = "FILE")]
    pub lock_file: Option<PathBuf>,

    /// Service label; writes `<label>.pid` under the pid directory.
    #[arg(long, value_name = "NAME")]
    pub label: Option<String>,

    /// Drop privileges to this user after detaching (root only).
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also log to syslog.
    #[arg(long)]
    pub syslog: bool,

    /// Append logs to this file.
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}
