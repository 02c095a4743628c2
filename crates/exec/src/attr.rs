//! Platform attribute block.
//!
//! One struct carries every attribute any family understands. Each
//! pipeline rejects, before touching the process, whatever its family
//! cannot honour (see [`ProcAttrs::requested`]).

use core::fmt;
use std::path::PathBuf;

bitflags::bitflags! {
    /// Linux `unshare(2)` flags. Values follow the kernel ABI.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Namespaces: u32 {
        const NEWTIME = 0x0000_0080;
        const FS = 0x0000_0200;
        const FILES = 0x0000_0400;
        const NEWNS = 0x0002_0000;
        const SYSVSEM = 0x0004_0000;
        const NEWCGROUP = 0x0200_0000;
        const NEWUTS = 0x0400_0000;
        const NEWIPC = 0x0800_0000;
        const NEWUSER = 0x1000_0000;
        const NEWPID = 0x2000_0000;
        const NEWNET = 0x4000_0000;
    }
}

/// Target identity applied after chroot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups. Empty clears the list.
    pub groups: Vec<u32>,
    /// Leave the supplementary group list untouched.
    pub no_setgroups: bool,
}

impl Credential {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            ..Self::default()
        }
    }
}

/// One line of `/proc/self/{uid,gid}_map`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

/// Security and session attributes applied before the image is replaced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcAttrs {
    /// Directory to chroot into.
    pub chroot: Option<PathBuf>,
    pub credential: Option<Credential>,
    /// FreeBSD jail to attach to.
    pub jail: Option<i32>,
    /// Start a new session.
    pub setsid: bool,
    /// Join or create process group `pgid`.
    pub setpgid: bool,
    /// Target group for `setpgid` / `foreground`; 0 means the process's own pid.
    pub pgid: i32,
    /// Put the process group in the terminal's foreground. Implies `setpgid`.
    pub foreground: bool,
    /// Give up the controlling terminal.
    pub noctty: bool,
    /// Acquire `ctty` as controlling terminal.
    pub setctty: bool,
    /// With `setctty`: index into the descriptor list (a slot of the new image).
    /// With `foreground`: a descriptor of the current process.
    pub ctty: i32,
    /// Signal delivered when the parent exits.
    pub pdeathsig: Option<i32>,
    pub uid_mappings: Option<Vec<IdMap>>,
    pub gid_mappings: Option<Vec<IdMap>>,
    /// Write `allow` rather than `deny` to `/proc/self/setgroups`.
    pub gid_mappings_enable_setgroups: bool,
    pub unshare: Namespaces,
    /// Capability numbers to raise into the ambient set.
    pub ambient_caps: Vec<u32>,
    /// Arm `PTRACE_TRACEME` just before exec.
    pub ptrace: bool,
}

/// A single requestable attribute, used to report what a platform refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Setsid,
    Setpgid,
    Foreground,
    Unshare,
    UidMappings,
    GidMappings,
    Chroot,
    Credential,
    AmbientCaps,
    Pdeathsig,
    Jail,
    Noctty,
    Setctty,
    Ptrace,
}

impl Attribute {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Setsid => "setsid",
            Self::Setpgid => "setpgid",
            Self::Foreground => "foreground",
            Self::Unshare => "unshare",
            Self::UidMappings => "uid mappings",
            Self::GidMappings => "gid mappings",
            Self::Chroot => "chroot",
            Self::Credential => "credential",
            Self::AmbientCaps => "ambient capabilities",
            Self::Pdeathsig => "pdeathsig",
            Self::Jail => "jail",
            Self::Noctty => "noctty",
            Self::Setctty => "setctty",
            Self::Ptrace => "ptrace",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ProcAttrs {
    /// Every attribute this block asks for, in pipeline order.
    pub fn requested(&self) -> Vec<Attribute> {
        let wanted = [
            (self.setsid, Attribute::Setsid),
            (self.setpgid, Attribute::Setpgid),
            (self.foreground, Attribute::Foreground),
            (!self.unshare.is_empty(), Attribute::Unshare),
            (self.uid_mappings.is_some(), Attribute::UidMappings),
            (self.gid_mappings.is_some(), Attribute::GidMappings),
            (self.chroot.is_some(), Attribute::Chroot),
            (self.credential.is_some(), Attribute::Credential),
            (!self.ambient_caps.is_empty(), Attribute::AmbientCaps),
            (self.pdeathsig.is_some_and(|s| s != 0), Attribute::Pdeathsig),
            (self.jail.is_some_and(|j| j > 0), Attribute::Jail),
            (self.noctty, Attribute::Noctty),
            (self.setctty, Attribute::Setctty),
            (self.ptrace, Attribute::Ptrace),
        ];
        wanted
            .into_iter()
            .filter_map(|(on, attr)| on.then_some(attr))
            .collect()
    }

    /// Whether the pipeline calls `setpgid`.
    pub(crate) fn wants_pgid(&self) -> bool {
        self.setpgid || self.foreground
    }
}
