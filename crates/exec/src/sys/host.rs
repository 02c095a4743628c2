//! libc-backed [`Sys`] for the build target.
//!
//! Thin wrappers: one libc call each, `-1` mapped onto [`Errno::last`].
//! Primitives that the target lacks return `ENOSYS`.

use std::ffi::{CStr, CString};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::RawFd;
use std::ptr;

use libc::c_char;

use super::{CapSets, Errno, Sys};
use crate::attr::Namespaces;

/// The calling process, as seen through libc.
#[derive(Debug, Default)]
pub struct Host {
    _priv: (),
}

impl Host {
    pub(crate) const fn new() -> Self {
        Self { _priv: () }
    }
}

fn io_errno(err: &std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Null-terminated pointer vector over borrowed C strings.
fn ptr_vec(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(core::iter::once(ptr::null()))
        .collect()
}

impl Sys for Host {
    #[inline]
    fn getpid(&mut self) -> i32 {
        // SAFETY: getpid has no preconditions and cannot fail.
        unsafe { libc::getpid() }
    }

    #[inline]
    fn setsid(&mut self) -> Result<(), Errno> {
        // SAFETY: no pointer arguments.
        Errno::result(unsafe { libc::setsid() }).map(drop)
    }

    #[inline]
    fn setpgid(&mut self, pid: i32, pgid: i32) -> Result<(), Errno> {
        // SAFETY: no pointer arguments.
        Errno::result(unsafe { libc::setpgid(pid, pgid) }).map(drop)
    }

    #[inline]
    fn tcsetpgrp(&mut self, fd: RawFd, pgrp: i32) -> Result<(), Errno> {
        // SAFETY: no pointer arguments; a bad fd is reported through errno.
        Errno::result(unsafe { libc::tcsetpgrp(fd, pgrp) }).map(drop)
    }

    fn unshare(&mut self, namespaces: Namespaces) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: no pointer arguments; unknown bits are rejected with EINVAL.
            Errno::result(unsafe { libc::unshare(namespaces.bits() as libc::c_int) }).map(drop)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = namespaces;
            Err(Errno::ENOSYS)
        }
    }

    fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), Errno> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| io_errno(&e))?;
        file.write_all(contents).map_err(|e| io_errno(&e))
    }

    fn make_root_private(&mut self) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: all strings are static and NUL-terminated; data may be null.
            let ret = unsafe {
                libc::mount(
                    c"none".as_ptr(),
                    c"/".as_ptr(),
                    ptr::null(),
                    libc::MS_REC | libc::MS_PRIVATE,
                    ptr::null(),
                )
            };
            Errno::result(ret).map(drop)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Err(Errno::ENOSYS)
        }
    }

    #[inline]
    fn chroot(&mut self, path: &CStr) -> Result<(), Errno> {
        // SAFETY: `path` is a valid NUL-terminated string for the call's duration.
        Errno::result(unsafe { libc::chroot(path.as_ptr()) }).map(drop)
    }

    #[inline]
    fn setgroups(&mut self, groups: &[u32]) -> Result<(), Errno> {
        // SAFETY: pointer and length describe the same live slice; gid_t is u32.
        Errno::result(unsafe { libc::setgroups(groups.len() as _, groups.as_ptr().cast()) })
            .map(drop)
    }

    #[inline]
    fn setgid(&mut self, gid: u32) -> Result<(), Errno> {
        // SAFETY: no pointer arguments.
        Errno::result(unsafe { libc::setgid(gid) }).map(drop)
    }

    #[inline]
    fn setuid(&mut self, uid: u32) -> Result<(), Errno> {
        // SAFETY: no pointer arguments.
        Errno::result(unsafe { libc::setuid(uid) }).map(drop)
    }

    fn set_keepcaps(&mut self) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: PR_SET_KEEPCAPS takes integer arguments only.
            let ret = unsafe {
                libc::prctl(
                    libc::PR_SET_KEEPCAPS,
                    1 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                )
            };
            Errno::result(ret).map(drop)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Err(Errno::ENOSYS)
        }
    }

    fn capget(&mut self) -> Result<CapSets, Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let mut header = linux_caps::header();
            let mut data = linux_caps::empty();
            // SAFETY: header and a two-element data array, as VERSION_3 requires.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_capget,
                    core::ptr::addr_of_mut!(header),
                    data.as_mut_ptr(),
                )
            };
            if ret == -1 {
                return Err(Errno::last());
            }
            Ok(linux_caps::to_sets(&data))
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Err(Errno::ENOSYS)
        }
    }

    fn capset(&mut self, sets: &CapSets) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let mut header = linux_caps::header();
            let data = linux_caps::from_sets(sets);
            // SAFETY: header and a two-element data array, as VERSION_3 requires.
            let ret = unsafe {
                libc::syscall(libc::SYS_capset, core::ptr::addr_of_mut!(header), data.as_ptr())
            };
            if ret == -1 {
                return Err(Errno::last());
            }
            Ok(())
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = sets;
            Err(Errno::ENOSYS)
        }
    }

    fn ambient_raise(&mut self, cap: u32) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: PR_CAP_AMBIENT takes integer arguments only.
            let ret = unsafe {
                libc::prctl(
                    libc::PR_CAP_AMBIENT,
                    libc::PR_CAP_AMBIENT_RAISE as libc::c_ulong,
                    libc::c_ulong::from(cap),
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                )
            };
            Errno::result(ret).map(drop)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = cap;
            Err(Errno::ENOSYS)
        }
    }

    #[inline]
    fn chdir(&mut self, path: &CStr) -> Result<(), Errno> {
        // SAFETY: `path` is a valid NUL-terminated string for the call's duration.
        Errno::result(unsafe { libc::chdir(path.as_ptr()) }).map(drop)
    }

    fn set_pdeathsig(&mut self, signal: i32) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: PR_SET_PDEATHSIG takes integer arguments only.
            let ret = unsafe {
                libc::prctl(
                    libc::PR_SET_PDEATHSIG,
                    signal as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                )
            };
            Errno::result(ret).map(drop)
        }
        #[cfg(target_os = "freebsd")]
        {
            let mut signal = signal;
            // SAFETY: PROC_PDEATHSIG_CTL reads one c_int through the data pointer.
            let ret = unsafe {
                libc::procctl(
                    libc::P_PID,
                    0,
                    libc::PROC_PDEATHSIG_CTL,
                    core::ptr::addr_of_mut!(signal).cast(),
                )
            };
            Errno::result(ret).map(drop)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
        {
            let _ = signal;
            Err(Errno::ENOSYS)
        }
    }

    fn jail_attach(&mut self, jid: i32) -> Result<(), Errno> {
        #[cfg(target_os = "freebsd")]
        {
            // SAFETY: no pointer arguments.
            Errno::result(unsafe { libc::jail_attach(jid) }).map(drop)
        }
        #[cfg(not(target_os = "freebsd"))]
        {
            let _ = jid;
            Err(Errno::ENOSYS)
        }
    }

    #[inline]
    fn dup2(&mut self, old: RawFd, new: RawFd) -> Result<(), Errno> {
        // SAFETY: no pointer arguments; bad descriptors are reported through errno.
        Errno::result(unsafe { libc::dup2(old, new) }).map(drop)
    }

    fn dup3(&mut self, old: RawFd, new: RawFd, cloexec: bool) -> Result<(), Errno> {
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        {
            let flags = if cloexec { libc::O_CLOEXEC } else { 0 };
            // SAFETY: no pointer arguments; bad descriptors are reported through errno.
            Errno::result(unsafe { libc::dup3(old, new, flags) }).map(drop)
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "netbsd",
            target_os = "openbsd"
        )))]
        {
            if cloexec {
                return Err(Errno::ENOSYS);
            }
            self.dup2(old, new)
        }
    }

    fn dup2fd_cloexec(&mut self, old: RawFd, new: RawFd) -> Result<(), Errno> {
        #[cfg(any(
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "illumos",
            target_os = "solaris"
        ))]
        {
            // SAFETY: integer-only fcntl command.
            Errno::result(unsafe { libc::fcntl(old, libc::F_DUP2FD_CLOEXEC, new) }).map(drop)
        }
        #[cfg(not(any(
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "illumos",
            target_os = "solaris"
        )))]
        {
            let _ = (old, new);
            Err(Errno::ENOSYS)
        }
    }

    #[inline]
    fn set_cloexec(&mut self, fd: RawFd, on: bool) -> Result<(), Errno> {
        let flags = if on { libc::FD_CLOEXEC } else { 0 };
        // SAFETY: integer-only fcntl command.
        Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFD, flags) }).map(drop)
    }

    #[inline]
    fn close(&mut self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: the descriptor is owned by the pipeline from here on.
        Errno::result(unsafe { libc::close(fd) }).map(drop)
    }

    fn release_ctty(&mut self, fd: RawFd) -> Result<(), Errno> {
        #[cfg(not(target_os = "aix"))]
        {
            // SAFETY: TIOCNOTTY takes no argument.
            Errno::result(unsafe { libc::ioctl(fd, libc::TIOCNOTTY) }).map(drop)
        }
        #[cfg(target_os = "aix")]
        {
            let _ = fd;
            Err(Errno::ENOSYS)
        }
    }

    fn acquire_ctty(&mut self, fd: RawFd, steal: bool) -> Result<(), Errno> {
        #[cfg(not(target_os = "aix"))]
        {
            let arg = libc::c_int::from(steal);
            // SAFETY: TIOCSCTTY takes an integer argument.
            Errno::result(unsafe { libc::ioctl(fd, libc::TIOCSCTTY, arg) }).map(drop)
        }
        #[cfg(target_os = "aix")]
        {
            let _ = (fd, steal);
            Err(Errno::ENOSYS)
        }
    }

    fn trace_me(&mut self) -> Result<(), Errno> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: PTRACE_TRACEME ignores pid, addr and data.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_ptrace,
                    libc::PTRACE_TRACEME,
                    0 as libc::c_long,
                    0 as libc::c_long,
                    0 as libc::c_long,
                )
            };
            if ret == -1 {
                return Err(Errno::last());
            }
            Ok(())
        }
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "tvos",
            target_os = "watchos",
            target_os = "openbsd"
        ))]
        {
            // SAFETY: PT_TRACE_ME ignores pid, addr and data.
            Errno::result(unsafe { libc::ptrace(libc::PT_TRACE_ME, 0, ptr::null_mut(), 0) })
                .map(drop)
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "tvos",
            target_os = "watchos",
            target_os = "openbsd"
        )))]
        {
            Err(Errno::ENOSYS)
        }
    }

    fn execve(&mut self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno {
        let argv = ptr_vec(argv);
        let envp = ptr_vec(envp);
        // SAFETY: both vectors are null-terminated and borrow strings that
        // outlive the call; on success nothing of this process survives.
        unsafe {
            libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
        }
        Errno::last()
    }
}

/// Conversions between [`CapSets`] and the kernel's VERSION_3 layout.
#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux_caps {
    use linux_raw_sys::general::{
        __user_cap_data_struct, __user_cap_header_struct, _LINUX_CAPABILITY_VERSION_3,
    };

    use crate::sys::CapSets;

    pub(super) fn header() -> __user_cap_header_struct {
        __user_cap_header_struct {
            version: _LINUX_CAPABILITY_VERSION_3,
            pid: 0,
        }
    }

    pub(super) fn empty() -> [__user_cap_data_struct; 2] {
        [
            __user_cap_data_struct {
                effective: 0,
                permitted: 0,
                inheritable: 0,
            },
            __user_cap_data_struct {
                effective: 0,
                permitted: 0,
                inheritable: 0,
            },
        ]
    }

    pub(super) fn to_sets(data: &[__user_cap_data_struct; 2]) -> CapSets {
        CapSets {
            effective: [data[0].effective, data[1].effective],
            permitted: [data[0].permitted, data[1].permitted],
            inheritable: [data[0].inheritable, data[1].inheritable],
        }
    }

    pub(super) fn from_sets(sets: &CapSets) -> [__user_cap_data_struct; 2] {
        let mut data = empty();
        for (word, slot) in data.iter_mut().enumerate() {
            slot.effective = sets.effective[word];
            slot.permitted = sets.permitted[word];
            slot.inheritable = sets.inheritable[word];
        }
        data
    }
}
