//! The syscall seam.
//!
//! Pipelines never call libc directly. Every process mutation goes through
//! [`Sys`], so the ordering of steps can be observed and so a family's
//! pipeline can be exercised on a host of another family.
//!
//! [`Host`] is the real implementation. Primitives that do not exist on the
//! build target answer `ENOSYS`; pipelines reject the matching attribute
//! before the first mutation, so those stubs are never reached in practice.

mod errno;
#[cfg(unix)]
mod host;
#[cfg(test)]
pub(crate) mod sim;

pub use errno::Errno;
#[cfg(unix)]
pub use host::Host;

use std::ffi::{CStr, CString};
use std::os::fd::RawFd;

use crate::attr::Namespaces;

/// Capability sets as read by `capget` / written by `capset`.
///
/// Two 32-bit words per set (`_LINUX_CAPABILITY_VERSION_3`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapSets {
    pub effective: [u32; 2],
    pub permitted: [u32; 2],
    pub inheritable: [u32; 2],
}

/// OS primitives used by the setup pipelines.
///
/// All methods act on the calling process.
pub trait Sys {
    /// Current process ID.
    fn getpid(&mut self) -> i32;

    /// Start a new session.
    fn setsid(&mut self) -> Result<(), Errno>;

    /// Move `pid` (0 = self) into process group `pgid` (0 = own pid).
    fn setpgid(&mut self, pid: i32, pgid: i32) -> Result<(), Errno>;

    /// Make `pgrp` the foreground process group of the terminal on `fd`.
    fn tcsetpgrp(&mut self, fd: RawFd, pgrp: i32) -> Result<(), Errno>;

    /// Detach the given namespaces from the parent's.
    fn unshare(&mut self, namespaces: Namespaces) -> Result<(), Errno>;

    /// Overwrite a control file such as `/proc/self/uid_map`.
    fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), Errno>;

    /// Remount `/` recursively private so mounts stop propagating to the host.
    fn make_root_private(&mut self) -> Result<(), Errno>;

    fn chroot(&mut self, path: &CStr) -> Result<(), Errno>;

    fn setgroups(&mut self, groups: &[u32]) -> Result<(), Errno>;

    fn setgid(&mut self, gid: u32) -> Result<(), Errno>;

    fn setuid(&mut self, uid: u32) -> Result<(), Errno>;

    /// Keep permitted capabilities across the next uid change.
    fn set_keepcaps(&mut self) -> Result<(), Errno>;

    fn capget(&mut self) -> Result<CapSets, Errno>;

    fn capset(&mut self, sets: &CapSets) -> Result<(), Errno>;

    /// Raise one capability into the ambient set.
    fn ambient_raise(&mut self, cap: u32) -> Result<(), Errno>;

    fn chdir(&mut self, path: &CStr) -> Result<(), Errno>;

    /// Deliver `signal` to this process when its parent exits.
    fn set_pdeathsig(&mut self, signal: i32) -> Result<(), Errno>;

    /// Attach the process to an existing jail.
    fn jail_attach(&mut self, jid: i32) -> Result<(), Errno>;

    /// Duplicate `old` onto `new`, closing whatever `new` held. The result is inheritable.
    fn dup2(&mut self, old: RawFd, new: RawFd) -> Result<(), Errno>;

    /// Like [`Sys::dup2`], optionally marking `new` close-on-exec atomically.
    fn dup3(&mut self, old: RawFd, new: RawFd, cloexec: bool) -> Result<(), Errno>;

    /// `fcntl(old, F_DUP2FD_CLOEXEC, new)`.
    fn dup2fd_cloexec(&mut self, old: RawFd, new: RawFd) -> Result<(), Errno>;

    /// Set or clear `FD_CLOEXEC`.
    fn set_cloexec(&mut self, fd: RawFd, on: bool) -> Result<(), Errno>;

    fn close(&mut self, fd: RawFd) -> Result<(), Errno>;

    /// Give up the controlling terminal reachable through `fd` (`TIOCNOTTY`).
    fn release_ctty(&mut self, fd: RawFd) -> Result<(), Errno>;

    /// Make the terminal on `fd` the controlling terminal (`TIOCSCTTY`).
    fn acquire_ctty(&mut self, fd: RawFd, steal: bool) -> Result<(), Errno>;

    /// `PTRACE_TRACEME`.
    fn trace_me(&mut self) -> Result<(), Errno>;

    /// Replace the process image. Only returns on failure.
    fn execve(&mut self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno;

    /// Open the per-process descriptor directory (`#d` on Plan 9).
    fn open_dup_dir(&mut self) -> Result<RawFd, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Read directory records from `fd` at `offset`.
    fn pread(&mut self, _fd: RawFd, _buf: &mut [u8], _offset: u64) -> Result<usize, Errno> {
        Err(Errno::ENOSYS)
    }
}
