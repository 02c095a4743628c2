//! OS error numbers.
//!
//! Every primitive behind [`Sys`](super::Sys) reports failure as an [`Errno`].
//! The value is carried verbatim up to the caller inside
//! [`ExecError::Os`](crate::ExecError::Os).
//!
//! ## Most Commonly Seen Here
//!
//! | Constant | Raised by |
//! |----------|-----------|
//! | `EPERM` | setsid as group leader, setuid/setgid/setgroups without privilege, chroot |
//! | `ENOENT` | chdir, chroot, execve on a missing path |
//! | `EACCES` | execve on a non-executable file |
//! | `EBADF` | dup/dup2/dup3 on a descriptor that is not open |
//! | `EINVAL` | unshare with bad flags, capset with unknown bits |
//! | `ENOTTY` | TIOCSCTTY / TIOCNOTTY / tcsetpgrp on a non-terminal |
//! | `ENOSYS` | primitive missing on the build target |

use core::fmt;

/// A raw OS error number.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Self = Self(libc::EPERM);
    pub const ENOENT: Self = Self(libc::ENOENT);
    pub const EBADF: Self = Self(libc::EBADF);
    pub const EACCES: Self = Self(libc::EACCES);
    pub const EINVAL: Self = Self(libc::EINVAL);
    pub const ENOTTY: Self = Self(libc::ENOTTY);
    pub const ENOSYS: Self = Self(libc::ENOSYS);

    /// Wrap a raw error number.
    pub const fn from_raw(code: i32) -> Self {
        Self(code)
    }

    /// The raw error number.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Read the calling thread's errno after a failed libc call.
    pub fn last() -> Self {
        Self(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// Map a libc-style `-1` return onto `Err(Errno::last())`.
    #[inline]
    pub(crate) fn result(ret: libc::c_int) -> Result<libc::c_int, Self> {
        if ret == -1 {
            Err(Self::last())
        } else {
            Ok(ret)
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({})", self.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&std::io::Error::from_raw_os_error(self.0), f)
    }
}

impl From<Errno> for std::io::Error {
    fn from(errno: Errno) -> Self {
        std::io::Error::from_raw_os_error(errno.0)
    }
}
