//! Advisory cross-process file locking.
//!
//! Adapted from `wofferl-proxmox-backup/src/tools.rs::lock_file`: open (or
//! create) a sentinel file and take an exclusive `flock(2)` on it. That
//! function polls `LockExclusiveNonblock` in a sleep loop with a timeout;
//! here we block on a single `FlockArg::LockExclusive` call instead, since
//! catalog mutations and segment appends are brief enough that an
//! unbounded (but uncontended in the common case) block is preferable to
//! inventing a timeout policy spec.md never asks for.

use nix::fcntl::{flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Open `path` (creating it if absent) and block until an exclusive
    /// lock is acquired.
    pub fn acquire_exclusive(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(io::Error::from)?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}
