// crates/daemonize/src/lib.rs

//! Detaching a process into a single-instance background service.
//!
//! [`daemonize`] runs the classic double-fork protocol across three process
//! generations: the caller, a relay that detaches the session, and the
//! service that ends up holding the instance lock. The caller's call returns
//! success only once the fully initialized service has signalled readiness
//! through the relay; any failure below the caller collapses into a bounded
//! timeout or an exit notification.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod detach;
mod handshake;
pub mod lock;
mod os;
pub mod pidfile;

pub use detach::{Options, Outcome, daemonize};
pub use handshake::HANDSHAKE_TIMEOUT_SECS;
pub use lock::LockHandle;

/// Error type for the detach protocol.
///
/// Only [`Error::HandshakeTimeout`] and [`Error::DescendantExited`] can reach
/// the original caller; every other variant is fatal inside the relay or
/// service process, which logs it and exits with a failure status.
#[derive(Debug, Error)]
pub enum Error {
    #[error("lock file {path} is held by another live instance")]
    LockBusy { path: PathBuf },
    #[error("lock file {path}: {source}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("failed to create a new session: {0}")]
    Session(#[source] nix::Error),
    #[error("cannot drop privileges to {user}: {reason}")]
    PrivilegeDrop { user: String, reason: String },
    #[error("pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("timed out waiting for the service to signal readiness")]
    HandshakeTimeout,
    #[error("a descendant process exited before signalling readiness")]
    DescendantExited,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type for the detach protocol.
pub type Result<T> = std::result::Result<T, Error>;
