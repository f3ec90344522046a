// crates/daemonize/src/lock.rs

//! Crash-safe single-instance lock.
//!
//! The lock is the OS advisory record lock, taken non-blocking on the whole
//! file and held on a descriptor that stays open for the life of the service
//! process; process termination is the only release. Advisory locks follow
//! the descriptor, not the file name, so acquisition re-verifies that the
//! path still names the inode that was locked. A holder dying (and possibly a
//! third instance recreating the file) between our open and our lock would
//! otherwise leave us locking a dead inode.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tracing::debug;

use crate::{Error, Result};

/// An acquired instance lock.
///
/// Dropping the handle closes the descriptor and with it the lock, so the
/// service keeps the handle alive for its entire lifetime.
#[derive(Debug)]
pub struct LockHandle {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
    ino: u64,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the path still names the locked inode. A stale handle means
    /// some other process unlinked (and possibly recreated) the file; the
    /// lock we hold then proves nothing about the path.
    pub fn is_current(&self) -> io::Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.ino() == self.ino),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Acquire the exclusive instance lock on `path`.
///
/// Loops until the lock is held on a verified inode. [`Error::LockBusy`]
/// means another live process holds it; recreation races retry without bound,
/// since contention at startup is rare and transient.
pub fn acquire(path: &Path) -> Result<LockHandle> {
    loop {
        if let Some(handle) = acquire_once(path, || ())? {
            return Ok(handle);
        }
    }
}

/// One pass of the acquisition loop. `None` means the path stopped naming the
/// inode this pass locked and the caller must retry. `before_verify` runs
/// between taking the lock and re-checking the path, which is where the
/// delete/recreate race lives; outside of tests it does nothing.
fn acquire_once(path: &Path, before_verify: impl FnOnce()) -> Result<Option<LockHandle>> {
    let lock_io = |source: io::Error| Error::LockIo {
        path: path.to_path_buf(),
        source,
    };

    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // Already present: either a live holder or a crashed one.
            // Open it and let the record lock decide which.
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => file,
                // Unlinked between the two opens; create it ourselves.
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(lock_io(e)),
            }
        }
        Err(e) => return Err(lock_io(e)),
    };

    match try_lock(&file) {
        Ok(()) => {}
        Err(Errno::EACCES | Errno::EAGAIN) => {
            return Err(Error::LockBusy {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(lock_io(e.into())),
    }

    before_verify();

    let held = file.metadata().map_err(lock_io)?;
    match fs::metadata(path) {
        Ok(meta) if meta.ino() == held.ino() => {
            let mut file = file;
            file.set_len(0).map_err(lock_io)?;
            writeln!(file, "{}", std::process::id()).map_err(lock_io)?;
            Ok(Some(LockHandle {
                file,
                path: path.to_path_buf(),
                ino: held.ino(),
            }))
        }
        Ok(_) => {
            debug!(
                path = %path.display(),
                "lock file recreated during acquisition, retrying"
            );
            Ok(None)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(
                path = %path.display(),
                "lock file unlinked during acquisition, retrying"
            );
            Ok(None)
        }
        Err(e) => Err(lock_io(e)),
    }
}

/// Non-blocking whole-file write lock on the descriptor.
fn try_lock(file: &File) -> nix::Result<()> {
    let lock = libc::flock {
        l_type: libc::F_WRLCK as libc::c_short,
        l_whence: libc::SEEK_SET as libc::c_short,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    // SAFETY: the descriptor is owned by `file` and stays open across the
    // call; the flock struct is fully initialized.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &lock) };
    if rc == -1 { Err(Errno::last()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    #[test]
    fn recreation_between_lock_and_verify_forces_a_retry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.lock");

        let raced = Cell::new(false);
        let pass = acquire_once(&path, || {
            // A holder swap mid-acquisition: the lock now rides a dead inode.
            fs::remove_file(&path).unwrap();
            fs::write(&path, "another instance\n").unwrap();
            raced.set(true);
        })
        .unwrap();
        assert!(raced.get());
        assert!(pass.is_none(), "acquisition must not trust a swapped inode");

        // The retry loop converges on the recreated file.
        let handle = acquire(&path).unwrap();
        assert!(handle.is_current().unwrap());
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn unlink_between_lock_and_verify_forces_a_retry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.lock");

        let pass = acquire_once(&path, || {
            fs::remove_file(&path).unwrap();
        })
        .unwrap();
        assert!(pass.is_none(), "acquisition must not trust an unlinked inode");

        let handle = acquire(&path).unwrap();
        assert!(handle.is_current().unwrap());
    }
}
