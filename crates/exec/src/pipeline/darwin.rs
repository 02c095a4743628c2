//! Apple platforms and OpenBSD (except mips64).

use super::Pipeline;
use crate::attr::Attribute;
use crate::error::ExecError;
use crate::remap::Evacuate;
use crate::request::Prepared;
use crate::sys::Sys;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DarwinVariant {
    Apple,
    OpenBsd,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Darwin(pub DarwinVariant);

impl Pipeline for Darwin {
    fn name(&self) -> &'static str {
        match self.0 {
            DarwinVariant::Apple => "darwin",
            DarwinVariant::OpenBsd => "openbsd",
        }
    }

    fn supports(&self, attr: Attribute) -> bool {
        matches!(
            attr,
            Attribute::Setsid
                | Attribute::Setpgid
                | Attribute::Foreground
                | Attribute::Chroot
                | Attribute::Credential
                | Attribute::Noctty
                | Attribute::Setctty
                | Attribute::Ptrace
        )
    }

    fn setup<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> Result<(), ExecError> {
        let attrs = prep.attrs;
        // No dup3 on Apple: the evacuated copy is briefly inheritable.
        let evacuate = match self.0 {
            DarwinVariant::Apple => Evacuate::Dup2ThenCloexec,
            DarwinVariant::OpenBsd => Evacuate::Dup3,
        };

        super::session(sys, attrs)?;
        super::chroot(sys, prep)?;
        if let Some(cred) = &attrs.credential {
            super::credential(sys, cred, !cred.no_setgroups)?;
        }
        super::chdir(sys, prep)?;
        super::remap(sys, &prep.fds, evacuate)?;
        super::terminal(sys, attrs, false)?;
        super::trace_me(sys, attrs)?;
        Ok(())
    }
}
