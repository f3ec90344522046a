// crates/daemonize/src/os.rs
#![allow(unsafe_code)]

use nix::unistd::{ForkResult, fork};

/// Fork the current process.
///
/// # Safety
/// This wrapper is safe because every process taking part in the detach
/// protocol is single-threaded, and the child performs only async-signal-safe
/// work (disposition changes, `setsid(2)`, another `fork(2)`) before it owns
/// its role in the state machine.
pub(crate) fn fork_process() -> nix::Result<ForkResult> {
    // SAFETY: see the `Safety` section above. No shared state is touched in
    // the child before it returns into the caller's state machine.
    unsafe { fork() }
}
