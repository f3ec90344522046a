// crates/daemonize/src/handshake.rs

//! Signal-based readiness handshake between process generations.
//!
//! The alphabet is fixed: `SIGUSR1` means "ready", a self-armed `SIGALRM`
//! bounds every wait, and `SIGCHLD` reports that a watched descendant
//! terminated. Handlers only set process-private flags; classification
//! happens after `pause(2)` returns, and "ready" takes priority over a
//! simultaneous exit notification. A wakeup on an unrelated signal re-enters
//! the wait instead of producing an outcome.

use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{Pid, alarm, pause};

use crate::{Error, Result};

/// Bound on every handshake wait, in seconds. Total daemonization latency is
/// therefore at most two of these back to back.
pub const HANDSHAKE_TIMEOUT_SECS: u32 = 2;

/// Result of one bounded wait, computed exactly once per wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeOutcome {
    Ready,
    Timeout,
    DescendantExited,
}

static READY: AtomicBool = AtomicBool::new(false);
static TIMED_OUT: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(signum: c_int) {
    // Nothing but atomic stores may happen here.
    match signum {
        libc::SIGUSR1 => READY.store(true, Ordering::SeqCst),
        libc::SIGALRM => TIMED_OUT.store(true, Ordering::SeqCst),
        libc::SIGCHLD => CHILD_EXITED.store(true, Ordering::SeqCst),
        _ => {}
    }
}

/// Install the three handshake handlers. Must run before forking so a fast
/// descendant cannot signal an ancestor that is not yet listening.
pub(crate) fn install_handlers() -> Result<()> {
    let handler = SigHandler::Handler(on_signal);
    for sig in [Signal::SIGUSR1, Signal::SIGALRM, Signal::SIGCHLD] {
        // SAFETY: the handler performs only atomic flag stores.
        unsafe { signal::signal(sig, handler) }.map_err(|e| Error::Io(e.into()))?;
    }
    Ok(())
}

/// Clear the flags ahead of a fork whose child may signal immediately.
pub(crate) fn clear_flags() {
    READY.store(false, Ordering::SeqCst);
    TIMED_OUT.store(false, Ordering::SeqCst);
    CHILD_EXITED.store(false, Ordering::SeqCst);
}

/// Block until a handshake signal arrives, for at most
/// [`HANDSHAKE_TIMEOUT_SECS`] seconds.
pub(crate) fn wait() -> HandshakeOutcome {
    let _ = alarm::set(HANDSHAKE_TIMEOUT_SECS);
    let outcome = loop {
        pause();
        if let Some(outcome) = classify(
            READY.load(Ordering::SeqCst),
            TIMED_OUT.load(Ordering::SeqCst),
            CHILD_EXITED.load(Ordering::SeqCst),
        ) {
            break outcome;
        }
    };
    let _ = alarm::cancel();
    outcome
}

/// Deliver "ready" to `pid`.
pub(crate) fn notify_ready(pid: Pid) -> Result<()> {
    signal::kill(pid, Signal::SIGUSR1).map_err(|e| Error::Io(e.into()))
}

fn classify(ready: bool, timed_out: bool, child_exited: bool) -> Option<HandshakeOutcome> {
    if ready {
        Some(HandshakeOutcome::Ready)
    } else if child_exited {
        Some(HandshakeOutcome::DescendantExited)
    } else if timed_out {
        Some(HandshakeOutcome::Timeout)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_wins_over_simultaneous_exit_notification() {
        assert_eq!(classify(true, false, true), Some(HandshakeOutcome::Ready));
        assert_eq!(classify(true, true, true), Some(HandshakeOutcome::Ready));
    }

    #[test]
    fn exit_notification_wins_over_timeout() {
        assert_eq!(
            classify(false, true, true),
            Some(HandshakeOutcome::DescendantExited)
        );
    }

    #[test]
    fn timeout_alone_classifies_as_timeout() {
        assert_eq!(classify(false, true, false), Some(HandshakeOutcome::Timeout));
    }

    #[test]
    fn unrelated_wakeup_produces_no_outcome() {
        assert_eq!(classify(false, false, false), None);
    }
}
