// crates/daemonize/src/detach.rs

//! The double-fork detachment state machine.
//!
//! Readiness travels strictly Service -> Relay -> Caller, one `SIGUSR1` hop
//! at a time. The relay and service never report typed errors upward; they
//! exit, and the ancestor's bounded wait observes either the exit or its own
//! alarm. The unbroken three-hop relay is the only successful path through
//! the protocol.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, Pid, Uid, User, chdir, getpid, getppid, setgid, setsid, setuid};
use tracing::error;

use crate::handshake::{self, HandshakeOutcome};
use crate::lock::{self, LockHandle};
use crate::os::fork_process;
use crate::pidfile;
use crate::{Error, Result};

/// What to set up around the detached service.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Service label; when set, `<label>.pid` is written under the pid
    /// directory.
    pub label: Option<String>,
    /// Instance lock path; when set, the lock is acquired before readiness
    /// is signalled.
    pub lock_file: Option<PathBuf>,
    /// Drop privileges to this user when started as root.
    pub user: Option<String>,
}

/// Which side of the detachment this process came out on.
#[derive(Debug)]
pub enum Outcome {
    /// The original caller. The service is up; exit 0 now.
    Caller,
    /// The detached service; continue initializing the workload. The lock
    /// handle, when present, must stay alive for the life of the process.
    Service { lock: Option<LockHandle> },
}

/// Detach the current process into a background service.
///
/// Returns [`Outcome::Caller`] in the original process once the service has
/// signalled readiness, and [`Outcome::Service`] in the detached grandchild.
/// The intermediate relay never returns; it exits after forwarding the
/// readiness signal. Failures below the caller surface only as
/// [`Error::HandshakeTimeout`] or [`Error::DescendantExited`] - the caller
/// cannot tell which generation failed, or why.
pub fn daemonize(opts: &Options) -> Result<Outcome> {
    // Listen before forking so a fast descendant cannot signal into the void.
    handshake::install_handlers()?;
    handshake::clear_flags();

    match fork_process().map_err(Error::Fork)? {
        ForkResult::Parent { .. } => match handshake::wait() {
            HandshakeOutcome::Ready => Ok(Outcome::Caller),
            HandshakeOutcome::Timeout => Err(Error::HandshakeTimeout),
            HandshakeOutcome::DescendantExited => Err(Error::DescendantExited),
        },
        ForkResult::Child => relay(opts),
    }
}

/// First-generation child: detach the session, fork again, forward the
/// readiness signal. Exits on every path except the grandchild's.
fn relay(opts: &Options) -> Result<Outcome> {
    let caller = getppid();

    if let Err(e) = detach_session() {
        error!("session detach failed: {e}");
        process::exit(1);
    }

    // The service may signal readiness before this process re-arms its wait,
    // so the flags must be clean before the service can exist. The SIGUSR1
    // handler itself survives the fork; only SIGCHLD was reset above.
    handshake::clear_flags();

    // The notify target must be resolved before the fork: once this process
    // exits, getppid() in the service names the reaper, not the relay, and
    // the readiness signal would land on an unrelated process.
    let relay = getpid();

    match fork_process() {
        Err(e) => {
            error!("second fork failed: {e}");
            process::exit(1);
        }
        Ok(ForkResult::Parent { .. }) => {
            if handshake::install_handlers().is_err() {
                process::exit(1);
            }
            match handshake::wait() {
                HandshakeOutcome::Ready => {
                    let _ = handshake::notify_ready(caller);
                    process::exit(0);
                }
                // The caller observes our exit, or its own alarm, and fails.
                _ => process::exit(1),
            }
        }
        Ok(ForkResult::Child) => match service_init(opts, relay) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("service initialization failed: {e}");
                process::exit(1);
            }
        },
    }
}

/// Reset dispositions inherited from the caller's terminal and start a new
/// session.
fn detach_session() -> Result<()> {
    let resets = [
        (Signal::SIGCHLD, SigHandler::SigDfl),
        (Signal::SIGTSTP, SigHandler::SigIgn),
        (Signal::SIGTTOU, SigHandler::SigIgn),
        (Signal::SIGTTIN, SigHandler::SigIgn),
        (Signal::SIGHUP, SigHandler::SigIgn),
        (Signal::SIGTERM, SigHandler::SigDfl),
    ];
    for (sig, handler) in resets {
        // SAFETY: only default and ignore dispositions are installed here.
        unsafe { signal::signal(sig, handler) }.map_err(|e| Error::Io(e.into()))?;
    }
    setsid().map_err(Error::Session)?;
    Ok(())
}

/// Grandchild setup: lock, pid record, identity, working directory, stdio.
/// Readiness is signalled only after every step has succeeded.
fn service_init(opts: &Options, relay: Pid) -> Result<Outcome> {
    let lock = match &opts.lock_file {
        Some(path) => Some(lock::acquire(path)?),
        None => None,
    };

    umask(Mode::from_bits_truncate(0o022));
    if let Some(label) = &opts.label {
        pidfile::record(label)?;
    }

    if let Some(user) = &opts.user {
        drop_privileges(user)?;
    }

    umask(Mode::empty());

    // Staying in the launch directory would pin it for the life of the
    // service, e.g. keeping removable media busy.
    chdir("/").map_err(|e| Error::Io(e.into()))?;

    redirect_stdio()?;

    handshake::notify_ready(relay)?;
    Ok(Outcome::Service { lock })
}

/// Switch identity to `user` when running as root. The group identity must
/// change while we still hold the privilege to change it, so it goes first.
fn drop_privileges(name: &str) -> Result<()> {
    if !Uid::current().is_root() && !Uid::effective().is_root() {
        return Ok(());
    }
    let privilege_err = |reason: String| Error::PrivilegeDrop {
        user: name.to_string(),
        reason,
    };
    let user = User::from_name(name)
        .map_err(|e| privilege_err(e.to_string()))?
        .ok_or_else(|| privilege_err("unknown user".into()))?;
    setgid(user.gid).map_err(|e| privilege_err(format!("setgid: {e}")))?;
    setuid(user.uid).map_err(|e| privilege_err(format!("setuid: {e}")))?;
    Ok(())
}

/// Point the standard streams at the null device; the service has no
/// terminal.
fn redirect_stdio() -> Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } == -1 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}
