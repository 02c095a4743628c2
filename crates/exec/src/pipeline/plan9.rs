//! Plan 9: no close-on-exec and no attributes beyond dir, fds and env.
//!
//! Open descriptors are listed by reading the `#d` device, a directory
//! holding one file per descriptor (`N`) plus its control file (`Nctl`).
//! Everything not in the descriptor list is closed by name, then the list
//! is settled with plain `dup`.
//!
//! A `#d` read returns whole stat records:
//!
//! ```text
//! size[2] type[2] dev[4] qid[13] mode[4] atime[4] mtime[4] length[8]
//! name[s] uid[s] gid[s] muid[s]
//! ```
//!
//! `size` excludes itself; strings are a little-endian `u16` length then bytes.

use std::os::fd::RawFd;

use super::Pipeline;
use crate::attr::Attribute;
use crate::error::ExecError;
use crate::remap::Evacuate;
use crate::request::Prepared;
use crate::sys::{Errno, Sys};

/// Largest stat record, and the read buffer size.
const STAT_MAX: usize = 65535;

/// Offset of `name` after the size field.
const NAME_OFFSET: usize = 39;

/// A record with four empty strings, size field included.
const STAT_FIX_LEN: usize = NAME_OFFSET + 2 + 4 * 2;

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Plan9;

fn read_u16(buf: &[u8]) -> Option<usize> {
    let bytes = buf.get(..2)?;
    Some(usize::from(u16::from_le_bytes([bytes[0], bytes[1]])))
}

/// Split the first stat record off `buf`: its name, and the records after it.
pub(crate) fn next_dir_entry(buf: &[u8]) -> Result<(&[u8], &[u8]), Errno> {
    let size = read_u16(buf).ok_or(Errno::EINVAL)?;
    let body = &buf[2..];
    if size + 2 < STAT_FIX_LEN || size > body.len() {
        return Err(Errno::EINVAL);
    }
    let (record, rest) = body.split_at(size);
    let name_field = &record[NAME_OFFSET..];
    let len = read_u16(name_field).ok_or(Errno::EINVAL)?;
    let name = name_field.get(2..2 + len).ok_or(Errno::EINVAL)?;
    Ok((name, rest))
}

/// Descriptor named by a `#d` entry. Control files and junk yield `None`.
fn descriptor_number(name: &[u8]) -> Option<RawFd> {
    if name.last() == Some(&b'l') {
        return None;
    }
    std::str::from_utf8(name).ok()?.parse().ok()
}

/// One stat record named `name`, everything else zeroed.
#[cfg(test)]
pub(crate) fn encode_dir_entry(name: &str) -> Vec<u8> {
    fn push_str(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u16).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    let mut body = vec![0u8; NAME_OFFSET];
    push_str(&mut body, name);
    for owner in ["", "", ""] {
        push_str(&mut body, owner);
    }
    let mut record = (body.len() as u16).to_le_bytes().to_vec();
    record.extend_from_slice(&body);
    record
}

/// Close every open descriptor that is not in `keep`.
fn close_unlisted<S: Sys>(sys: &mut S, keep: &[RawFd]) -> Result<(), Errno> {
    let dir = sys.open_dup_dir()?;
    let mut buf = vec![0u8; STAT_MAX];
    let mut offset = 0u64;
    loop {
        let n = sys.pread(dir, &mut buf, offset)?;
        if n == 0 {
            break;
        }
        offset += n as u64;

        let mut records = &buf[..n];
        while !records.is_empty() {
            let (name, rest) = next_dir_entry(records)?;
            records = rest;
            let Some(fd) = descriptor_number(name) else {
                continue;
            };
            if fd != dir && !keep.contains(&fd) {
                log::trace!("[EXEC] close({}) unlisted", fd);
                let _ = sys.close(fd);
            }
        }
    }
    let _ = sys.close(dir);
    Ok(())
}

impl Pipeline for Plan9 {
    fn name(&self) -> &'static str {
        "plan9"
    }

    fn supports(&self, _attr: Attribute) -> bool {
        false
    }

    fn setup<S: Sys>(&self, sys: &mut S, prep: &Prepared<'_>) -> Result<(), ExecError> {
        close_unlisted(sys, &prep.fds)?;
        super::chdir(sys, prep)?;
        super::remap(sys, &prep.fds, Evacuate::Dup)?;
        Ok(())
    }
}
