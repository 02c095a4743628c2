//! Solaris, illumos and AIX.

use super::Pipeline;
use crate::attr::Attribute;
use crate::error::ExecError;
use crate::remap::Evacuate;
use crate::request::Prepared;
use crate::sys::Sys;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SolarishVariant {
    Solaris,
    Illumos,
    Aix,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Solarish(pub SolarishVariant);

impl Pipeline for Solarish {
    fn name(&self) -> &'static str {
        match self.0 {
            SolarishVariant::Solaris => "solaris",
            SolarishVariant::Illumos => "illumos",
            SolarishVariant::Aix => "aix",
        }
    }

    fn supports(&self, attr: Attribute) -> bool {
        match attr {
            Attribute::Setsid
            | Attribute::Setpgid
            | Attribute::Foreground
            | Attribute::Chroot
            | Attribute::Credential => true,
            // AIX has no TIOCNOTTY / TIOCSCTTY.
            Attribute::Noctty | Attribute::Setctty => self.0 != SolarishVariant::Aix,
            _ => false,
        }
    }

    fn setup<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> Result<(), ExecError> {
        let attrs = prep.attrs;
        let evacuate = match self.0 {
            SolarishVariant::Solaris | SolarishVariant::Illumos => Evacuate::Dup2FdCloexec,
            SolarishVariant::Aix => Evacuate::Dup2ThenCloexec,
        };

        super::session(sys, attrs)?;
        super::chroot(sys, prep)?;
        if let Some(cred) = &attrs.credential {
            super::credential(sys, cred, !cred.no_setgroups)?;
        }
        super::chdir(sys, prep)?;
        super::remap(sys, &prep.fds, evacuate)?;
        super::terminal(sys, attrs, false)?;
        Ok(())
    }
}
