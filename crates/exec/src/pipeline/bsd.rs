//! FreeBSD, DragonFly, NetBSD and OpenBSD on mips64.

use super::Pipeline;
use crate::attr::Attribute;
use crate::error::ExecError;
use crate::remap::Evacuate;
use crate::request::Prepared;
use crate::sys::Sys;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BsdVariant {
    FreeBsd,
    DragonFly,
    NetBsd,
    OpenBsdMips64,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Bsd(pub BsdVariant);

impl Bsd {
    fn evacuate(self) -> Evacuate {
        match self.0 {
            BsdVariant::FreeBsd | BsdVariant::DragonFly => Evacuate::Dup2FdCloexec,
            BsdVariant::NetBsd | BsdVariant::OpenBsdMips64 => Evacuate::Dup3,
        }
    }
}

impl Pipeline for Bsd {
    fn name(&self) -> &'static str {
        match self.0 {
            BsdVariant::FreeBsd => "freebsd",
            BsdVariant::DragonFly => "dragonfly",
            BsdVariant::NetBsd => "netbsd",
            BsdVariant::OpenBsdMips64 => "openbsd-mips64",
        }
    }

    fn supports(&self, attr: Attribute) -> bool {
        match attr {
            Attribute::Setsid
            | Attribute::Setpgid
            | Attribute::Foreground
            | Attribute::Chroot
            | Attribute::Credential
            | Attribute::Noctty
            | Attribute::Setctty => true,
            Attribute::Jail | Attribute::Pdeathsig => self.0 == BsdVariant::FreeBsd,
            Attribute::Unshare
            | Attribute::UidMappings
            | Attribute::GidMappings
            | Attribute::AmbientCaps
            | Attribute::Ptrace => false,
        }
    }

    /// The kernel records argv[0] as the process name; keep it no longer than the path.
    fn adjust(&self, prep: &mut Prepared<'_>) {
        if matches!(self.0, BsdVariant::FreeBsd | BsdVariant::DragonFly) {
            prep.shorten_argv0();
        }
    }

    fn setup<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> Result<(), ExecError> {
        let attrs = prep.attrs;

        if let Some(jid) = attrs.jail.filter(|&j| j > 0) {
            log::trace!("[EXEC] jail_attach({})", jid);
            sys.jail_attach(jid)?;
        }
        super::session(sys, attrs)?;
        super::chroot(sys, prep)?;
        if let Some(cred) = &attrs.credential {
            super::credential(sys, cred, !cred.no_setgroups)?;
        }
        super::chdir(sys, prep)?;
        super::pdeathsig(sys, attrs)?;
        super::remap(sys, &prep.fds, self.evacuate())?;
        super::terminal(sys, attrs, false)?;
        Ok(())
    }
}
