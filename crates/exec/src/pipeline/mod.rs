//! Platform setup pipelines.
//!
//! Each OS family applies the requested attributes as a fixed sequence of
//! steps, then calls `execve`. The order is shared by every family; a family
//! simply omits the steps it cannot perform and refuses, up front, any
//! request that needs them.
//!
//! | step | attribute |
//! |------|-----------|
//! | 1 | reject unsupported attributes (no mutation yet) |
//! | 2 | keep capabilities across the uid change |
//! | 3 | `setsid` |
//! | 4 | `setpgid`, foreground group |
//! | 5 | namespaces, id maps, private root mount |
//! | 6 | `chroot` |
//! | 7 | groups, gid, uid |
//! | 8 | ambient capabilities |
//! | 9 | `chdir` |
//! | 10 | parent-death signal |
//! | 11 | descriptor remap |
//! | 12 | release / acquire controlling terminal |
//! | 13 | `PTRACE_TRACEME` |
//! | 14 | `execve` |
//!
//! All families are compiled on every target so their step order can be
//! checked against the simulated process; [`NATIVE`] picks the one that
//! drives the real [`Host`](crate::sys::Host).

// Only the native family is reachable outside tests.
#![cfg_attr(not(test), allow(dead_code))]

pub(crate) mod bsd;
pub(crate) mod darwin;
pub(crate) mod linux;
pub(crate) mod plan9;
pub(crate) mod solarish;

use std::os::fd::RawFd;

use crate::attr::{Attribute, Credential, ProcAttrs};
use crate::error::ExecError;
use crate::remap::{Evacuate, RemapPlan};
use crate::request::Prepared;
use crate::sys::{Errno, Sys};

/// One OS family's setup sequence.
pub(crate) trait Pipeline {
    /// Family name, for logs.
    fn name(&self) -> &'static str;

    /// Whether this family can honour `attr`.
    fn supports(&self, attr: Attribute) -> bool;

    /// Family-specific usage checks, run after the support check.
    fn validate(&self, _prep: &Prepared<'_>) -> Result<(), ExecError> {
        Ok(())
    }

    /// Step 1. Never touches the process.
    fn check(&self, prep: &Prepared<'_>) -> Result<(), ExecError> {
        if let Some(attr) = prep
            .attrs
            .requested()
            .into_iter()
            .find(|&attr| !self.supports(attr))
        {
            return Err(ExecError::Unsupported(attr));
        }
        self.validate(prep)
    }

    /// Rewrite the lowered request before the first step, e.g. argv[0].
    fn adjust(&self, _prep: &mut Prepared<'_>) {}

    /// Steps 2 to 13.
    fn setup<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> Result<(), ExecError>;

    /// Steps 2 to 14. Only returns on failure.
    fn run<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> ExecError {
        if let Err(err) = self.setup(sys, prep) {
            return err;
        }
        log::trace!("[EXEC] execve({:?}, argc={})", prep.path, prep.argv.len());
        ExecError::Os(sys.execve(&prep.path, &prep.argv, &prep.envp))
    }
}

/// Steps 3 and 4.
pub(crate) fn session<S: Sys>(sys: &mut S, attrs: &ProcAttrs) -> Result<(), Errno> {
    if attrs.setsid {
        log::trace!("[EXEC] setsid()");
        sys.setsid()?;
    }
    if attrs.wants_pgid() {
        log::trace!("[EXEC] setpgid(0, {})", attrs.pgid);
        sys.setpgid(0, attrs.pgid)?;
    }
    if attrs.foreground {
        let pgrp = if attrs.pgid == 0 {
            sys.getpid()
        } else {
            attrs.pgid
        };
        log::trace!("[EXEC] tcsetpgrp({}, {})", attrs.ctty, pgrp);
        sys.tcsetpgrp(attrs.ctty, pgrp)?;
    }
    Ok(())
}

/// Step 6.
pub(crate) fn chroot<S: Sys>(sys: &mut S, prep: &Prepared<'_>) -> Result<(), Errno> {
    if let Some(root) = &prep.chroot {
        log::trace!("[EXEC] chroot({:?})", root);
        sys.chroot(root)?;
    }
    Ok(())
}

/// Step 7. Groups before gid before uid: once the uid changes the
/// privilege for the other two is gone.
pub(crate) fn credential<S: Sys>(
    sys: &mut S,
    cred: &Credential,
    set_groups: bool,
) -> Result<(), Errno> {
    if set_groups {
        log::trace!("[EXEC] setgroups({:?})", cred.groups);
        sys.setgroups(&cred.groups)?;
    }
    log::trace!("[EXEC] setgid({})", cred.gid);
    sys.setgid(cred.gid)?;
    log::trace!("[EXEC] setuid({})", cred.uid);
    sys.setuid(cred.uid)
}

/// Step 9, resolved inside any new root.
pub(crate) fn chdir<S: Sys>(sys: &mut S, prep: &Prepared<'_>) -> Result<(), Errno> {
    if let Some(dir) = &prep.dir {
        log::trace!("[EXEC] chdir({:?})", dir);
        sys.chdir(dir)?;
    }
    Ok(())
}

/// Step 10.
pub(crate) fn pdeathsig<S: Sys>(sys: &mut S, attrs: &ProcAttrs) -> Result<(), Errno> {
    if let Some(signal) = attrs.pdeathsig.filter(|&s| s != 0) {
        log::trace!("[EXEC] pdeathsig({})", signal);
        sys.set_pdeathsig(signal)?;
    }
    Ok(())
}

/// Step 11.
pub(crate) fn remap<S: Sys>(sys: &mut S, fds: &[RawFd], evacuate: Evacuate) -> Result<(), Errno> {
    log::trace!("[EXEC] remap({:?}, {:?})", fds, evacuate);
    RemapPlan::new(fds).apply(sys, evacuate)
}

/// Step 12. `ctty` names a slot of the new image by now.
pub(crate) fn terminal<S: Sys>(sys: &mut S, attrs: &ProcAttrs, steal: bool) -> Result<(), Errno> {
    if attrs.noctty {
        log::trace!("[EXEC] ioctl(0, TIOCNOTTY)");
        sys.release_ctty(0)?;
    }
    if attrs.setctty {
        log::trace!("[EXEC] ioctl({}, TIOCSCTTY, {})", attrs.ctty, u8::from(steal));
        sys.acquire_ctty(attrs.ctty, steal)?;
    }
    Ok(())
}

/// Step 13.
pub(crate) fn trace_me<S: Sys>(sys: &mut S, attrs: &ProcAttrs) -> Result<(), Errno> {
    if attrs.ptrace {
        log::trace!("[EXEC] ptrace(TRACEME)");
        sys.trace_me()?;
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const NATIVE: linux::Linux = linux::Linux;

#[cfg(target_os = "freebsd")]
pub(crate) const NATIVE: bsd::Bsd = bsd::Bsd(bsd::BsdVariant::FreeBsd);

#[cfg(target_os = "dragonfly")]
pub(crate) const NATIVE: bsd::Bsd = bsd::Bsd(bsd::BsdVariant::DragonFly);

#[cfg(target_os = "netbsd")]
pub(crate) const NATIVE: bsd::Bsd = bsd::Bsd(bsd::BsdVariant::NetBsd);

#[cfg(all(target_os = "openbsd", target_arch = "mips64"))]
pub(crate) const NATIVE: bsd::Bsd = bsd::Bsd(bsd::BsdVariant::OpenBsdMips64);

#[cfg(all(target_os = "openbsd", not(target_arch = "mips64")))]
pub(crate) const NATIVE: darwin::Darwin = darwin::Darwin(darwin::DarwinVariant::OpenBsd);

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "tvos",
    target_os = "watchos"
))]
pub(crate) const NATIVE: darwin::Darwin = darwin::Darwin(darwin::DarwinVariant::Apple);

#[cfg(target_os = "solaris")]
pub(crate) const NATIVE: solarish::Solarish = solarish::Solarish(solarish::SolarishVariant::Solaris);

#[cfg(target_os = "illumos")]
pub(crate) const NATIVE: solarish::Solarish = solarish::Solarish(solarish::SolarishVariant::Illumos);

#[cfg(target_os = "aix")]
pub(crate) const NATIVE: solarish::Solarish = solarish::Solarish(solarish::SolarishVariant::Aix);

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios",
    target_os = "tvos",
    target_os = "watchos",
    target_os = "solaris",
    target_os = "illumos",
    target_os = "aix"
)))]
compile_error!("los_exec has no setup pipeline for this target OS");
