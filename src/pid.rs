//! Local-host process liveness probe.
//!
//! spec.md §4.1: "Liveness check is a signal-0 probe against `owner_pid`
//! on the local host; a probe error of 'no such process' means the
//! previous owner is dead and the row may be overwritten."

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// `true` if `pid` names a live process on this host, `false` if the
/// kernel reports "no such process". Any other probe error (e.g.
/// permission denied on a pid owned by another user) is treated as "still
/// alive" — we cannot prove it's dead, so we must not steal the slot.
pub fn is_process_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}
