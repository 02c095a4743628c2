//! Linux pipeline: every attribute except jails.

use std::fmt::Write as _;

use super::Pipeline;
use crate::attr::{Attribute, IdMap, Namespaces, ProcAttrs};
use crate::error::ExecError;
use crate::remap::Evacuate;
use crate::request::Prepared;
use crate::sys::{Errno, Sys};

/// Highest capability number the two capability words can hold, plus one.
const CAP_LIMIT: u32 = 64;

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Linux;

/// `/proc/self/{uid,gid}_map` contents: one `inside outside count` line per entry.
pub(crate) fn format_id_mappings(maps: &[IdMap]) -> String {
    let mut out = String::new();
    for map in maps {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{} {} {}", map.container_id, map.host_id, map.size);
    }
    out
}

/// Step 5.
fn namespaces<S: Sys>(sys: &mut S, attrs: &ProcAttrs) -> Result<(), Errno> {
    if attrs.unshare.is_empty() {
        return Ok(());
    }
    log::trace!("[EXEC] unshare({:?})", attrs.unshare);
    sys.unshare(attrs.unshare)?;

    if attrs.unshare.contains(Namespaces::NEWUSER) {
        // The setgroups policy must be fixed before the gid map is accepted.
        if let Some(maps) = &attrs.gid_mappings {
            let policy: &[u8] = if attrs.gid_mappings_enable_setgroups {
                b"allow\n"
            } else {
                b"deny\n"
            };
            sys.write_file("/proc/self/setgroups", policy)?;
            sys.write_file("/proc/self/gid_map", format_id_mappings(maps).as_bytes())?;
        }
        if let Some(maps) = &attrs.uid_mappings {
            sys.write_file("/proc/self/uid_map", format_id_mappings(maps).as_bytes())?;
        }
    }

    if attrs.unshare.contains(Namespaces::NEWNS) {
        log::trace!("[EXEC] mount(/, MS_REC|MS_PRIVATE)");
        sys.make_root_private()?;
    }
    Ok(())
}

/// Step 8.
fn ambient_caps<S: Sys>(sys: &mut S, caps: &[u32]) -> Result<(), Errno> {
    if caps.is_empty() {
        return Ok(());
    }
    let mut sets = sys.capget()?;
    for &cap in caps {
        let word = (cap >> 5) as usize;
        let bit = 1u32 << (cap & 31);
        if let Some(permitted) = sets.permitted.get_mut(word) {
            *permitted |= bit;
        }
        if let Some(inheritable) = sets.inheritable.get_mut(word) {
            *inheritable |= bit;
        }
    }
    log::trace!("[EXEC] capset({:?})", sets);
    sys.capset(&sets)?;
    for &cap in caps {
        log::trace!("[EXEC] prctl(PR_CAP_AMBIENT_RAISE, {})", cap);
        sys.ambient_raise(cap)?;
    }
    Ok(())
}

impl Pipeline for Linux {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn supports(&self, attr: Attribute) -> bool {
        attr != Attribute::Jail
    }

    fn validate(&self, prep: &Prepared<'_>) -> Result<(), ExecError> {
        let attrs = prep.attrs;
        if attrs.ambient_caps.iter().any(|&cap| cap >= CAP_LIMIT) {
            return Err(ExecError::InvalidCapability);
        }
        let has_maps = attrs.uid_mappings.is_some() || attrs.gid_mappings.is_some();
        if has_maps && !attrs.unshare.contains(Namespaces::NEWUSER) {
            return Err(ExecError::MappingsWithoutUserNamespace);
        }
        Ok(())
    }

    fn setup<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> Result<(), ExecError> {
        let attrs = prep.attrs;

        if !attrs.ambient_caps.is_empty() {
            log::trace!("[EXEC] prctl(PR_SET_KEEPCAPS, 1)");
            sys.set_keepcaps()?;
        }
        super::session(sys, attrs)?;
        namespaces(sys, attrs)?;
        super::chroot(sys, prep)?;
        if let Some(cred) = &attrs.credential {
            // With setgroups allowed in the namespace and nothing to set,
            // the call would only clear the mapped groups.
            let rely_on_mapping = attrs.gid_mappings.is_some()
                && attrs.gid_mappings_enable_setgroups
                && cred.groups.is_empty();
            super::credential(sys, cred, !cred.no_setgroups && !rely_on_mapping)?;
        }
        ambient_caps(sys, &attrs.ambient_caps)?;
        super::chdir(sys, prep)?;
        super::pdeathsig(sys, attrs)?;
        super::remap(sys, &prep.fds, Evacuate::Dup3)?;
        super::terminal(sys, attrs, true)?;
        super::trace_me(sys, attrs)?;
        Ok(())
    }
}
