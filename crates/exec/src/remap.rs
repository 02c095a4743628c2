//! Descriptor remap engine.
//!
//! Places an ordered list of inherited descriptors at slots `0..N` of the
//! next image. Sources and destinations overlap, so the work is split in
//! two passes:
//!
//! 1. **Evacuate**: every source that sits in a lower slot than its
//!    destination (`0 <= src < i`) would be overwritten before it is read.
//!    It is copied above every number the plan touches, close-on-exec, and
//!    the copy becomes the effective source.
//! 2. **Settle**: slot `i` is closed (`-1`), kept with close-on-exec
//!    cleared (`src == i`), or overwritten with a duplicate of its source.
//!
//! Slots `N..3` are then closed so stray standard descriptors never leak.
//!
//! Nothing is undone on failure: the low slots may already be overwritten.

use core::ops::Range;
use std::os::fd::RawFd;

use crate::sys::{Errno, Sys};

/// Slots that are always accounted for: closed unless targeted.
pub const RESERVED_FDS: RawFd = 3;

/// How pass 1 makes its close-on-exec copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evacuate {
    /// `dup3(src, dst, O_CLOEXEC)`.
    Dup3,
    /// `fcntl(src, F_DUP2FD_CLOEXEC, dst)`.
    Dup2FdCloexec,
    /// `dup2` followed by `FD_CLOEXEC`. The copy is inheritable in between.
    Dup2ThenCloexec,
    /// Plan 9 has no close-on-exec. Copies are closed explicitly after settling.
    Dup,
}

impl Evacuate {
    fn has_cloexec(self) -> bool {
        self != Self::Dup
    }
}

/// What ends up in one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Slot closed, nothing inherited.
    Close,
    /// Source already in place; only close-on-exec is cleared.
    Keep,
    /// Duplicate this descriptor onto the slot.
    Dup(RawFd),
}

/// A computed remap: evacuations, per-slot placements and the tail to close.
///
/// Built once per exec, applied immediately, then dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemapPlan {
    evacuations: Vec<(RawFd, RawFd)>,
    placements: Vec<Placement>,
    /// Effective source of each slot after evacuation (`-1` = closed).
    effective: Vec<RawFd>,
}

impl RemapPlan {
    /// Plan the remap of `sources`; `sources[i]` is the descriptor for slot `i`,
    /// `-1` closes the slot. Sources must be distinct.
    pub fn new(sources: &[RawFd]) -> Self {
        let len = sources.len() as RawFd;
        let mut next_fd = sources.iter().copied().fold(len, RawFd::max) + 1;

        let mut effective = sources.to_vec();
        let mut evacuations = Vec::new();
        for (slot, src) in effective.iter_mut().enumerate() {
            if *src >= 0 && *src < slot as RawFd {
                evacuations.push((*src, next_fd));
                *src = next_fd;
                next_fd += 1;
            }
        }

        let placements = effective
            .iter()
            .enumerate()
            .map(|(slot, &src)| match src {
                -1 => Placement::Close,
                src if src == slot as RawFd => Placement::Keep,
                src => Placement::Dup(src),
            })
            .collect();

        Self {
            evacuations,
            placements,
            effective,
        }
    }

    /// Pass 1 copies as `(source, destination)` pairs, in execution order.
    pub fn evacuations(&self) -> &[(RawFd, RawFd)] {
        &self.evacuations
    }

    /// Pass 2, one entry per slot.
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Slots past the list but below [`RESERVED_FDS`].
    pub fn tail(&self) -> Range<RawFd> {
        let len = self.placements.len() as RawFd;
        len.min(RESERVED_FDS)..RESERVED_FDS
    }

    /// Effective sources numbered at or above the slot count; closed after
    /// settling when the platform has no close-on-exec.
    fn leftovers(&self) -> impl Iterator<Item = RawFd> + '_ {
        let len = self.placements.len() as RawFd;
        self.effective.iter().copied().filter(move |&fd| fd >= len)
    }

    /// Execute the plan.
    pub fn apply<S: Sys>(&self, sys: &mut S, evacuate: Evacuate) -> Result<(), Errno> {
        for &(src, dst) in &self.evacuations {
            log::trace!("[EXEC] remap: evacuate {} -> {}", src, dst);
            match evacuate {
                Evacuate::Dup3 => sys.dup3(src, dst, true)?,
                Evacuate::Dup2FdCloexec => sys.dup2fd_cloexec(src, dst)?,
                Evacuate::Dup2ThenCloexec => {
                    sys.dup2(src, dst)?;
                    sys.set_cloexec(dst, true)?;
                }
                Evacuate::Dup => sys.dup2(src, dst)?,
            }
        }

        for (slot, placement) in self.placements.iter().enumerate() {
            let slot = slot as RawFd;
            match *placement {
                Placement::Close => {
                    // Already closed is fine.
                    let _ = sys.close(slot);
                }
                Placement::Keep => {
                    if evacuate.has_cloexec() {
                        sys.set_cloexec(slot, false)?;
                    }
                }
                Placement::Dup(src) => {
                    log::trace!("[EXEC] remap: {} -> slot {}", src, slot);
                    if evacuate == Evacuate::Dup3 {
                        sys.dup3(src, slot, false)?;
                    } else {
                        sys.dup2(src, slot)?;
                    }
                }
            }
        }

        for slot in self.tail() {
            let _ = sys.close(slot);
        }

        if !evacuate.has_cloexec() {
            for fd in self.leftovers() {
                let _ = sys.close(fd);
            }
        }
        Ok(())
    }
}
