// crates/daemonize/src/pidfile.rs

//! Pid records for administrative inspection.
//!
//! A plain, unlocked text file holding the service's decimal pid; liveness is
//! proven by the instance lock, not by this record.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Conventional pid directory. `SYSGPIOD_PID_DIR` overrides it, which keeps
/// integration tests out of `/var/run`.
const DEFAULT_PID_DIR: &str = "/var/run";

/// Where the record for `label` lives.
pub fn pid_file_path(label: &str) -> PathBuf {
    env::var_os("SYSGPIOD_PID_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_DIR))
        .join(format!("{label}.pid"))
}

/// Record the calling process's pid for `label`, overwriting any previous
/// record.
pub fn record(label: &str) -> Result<PathBuf> {
    let path = pid_file_path(label);
    write_pid(&path).map_err(|source| Error::PidFile {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn write_pid(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    writeln!(file, "{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_holds_the_writers_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        write_pid(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim().parse::<u32>().unwrap(), std::process::id());
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn record_overwrites_a_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        std::fs::write(&path, "99999999\n").unwrap();
        write_pid(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim().parse::<u32>().unwrap(), std::process::id());
    }
}
