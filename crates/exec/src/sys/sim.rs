//! Simulated process for pipeline tests.
//!
//! Records every [`Sys`] call in order, keeps a descriptor table with
//! close-on-exec flags, and can be told to fail a named primitive.
//! A successful `execve` records the image, drops close-on-exec
//! descriptors and returns `Errno(0)`: the image was "replaced".

use std::ffi::{CStr, CString};
use std::os::fd::RawFd;

use super::{CapSets, Errno, Sys};
use crate::attr::Namespaces;
use crate::pipeline::plan9;

/// Upper bound on descriptor numbers, like `RLIMIT_NOFILE`.
pub const MAX_FDS: usize = 256;

/// File id the simulated `#d` directory is opened as.
pub const DUP_DIR_FILE: u32 = 0xd1d;

/// One open descriptor: the open file it refers to plus its flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdEntry {
    pub file: u32,
    pub cloexec: bool,
}

/// Sparse descriptor table.
#[derive(Clone, Debug)]
pub struct FdTable {
    entries: Vec<Option<FdEntry>>,
}

impl FdTable {
    /// Table with 0/1/2 open on files 0/1/2, inheritable.
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_FDS);
        for file in 0..3 {
            entries.push(Some(FdEntry {
                file,
                cloexec: false,
            }));
        }
        Self { entries }
    }

    pub fn get(&self, fd: RawFd) -> Option<FdEntry> {
        let idx = usize::try_from(fd).ok()?;
        self.entries.get(idx).copied().flatten()
    }

    fn get_mut(&mut self, fd: RawFd) -> Option<&mut FdEntry> {
        let idx = usize::try_from(fd).ok()?;
        self.entries.get_mut(idx).and_then(|e| e.as_mut())
    }

    /// Install `file` at exactly `fd`, replacing whatever was there.
    pub fn open_at(&mut self, fd: RawFd, file: u32, cloexec: bool) {
        let idx = usize::try_from(fd).unwrap_or(MAX_FDS);
        assert!(idx < MAX_FDS, "fd {fd} out of range");
        if self.entries.len() <= idx {
            self.entries.resize(idx + 1, None);
        }
        self.entries[idx] = Some(FdEntry { file, cloexec });
    }

    /// Install `file` at the lowest free number.
    pub fn alloc(&mut self, file: u32) -> Option<RawFd> {
        let idx = match self.entries.iter().position(Option::is_none) {
            Some(idx) => idx,
            None if self.entries.len() < MAX_FDS => self.entries.len(),
            None => return None,
        };
        let fd = RawFd::try_from(idx).ok()?;
        self.open_at(fd, file, false);
        Some(fd)
    }

    /// Returns true if `fd` was open.
    pub fn close(&mut self, fd: RawFd) -> bool {
        usize::try_from(fd)
            .ok()
            .and_then(|idx| self.entries.get_mut(idx))
            .and_then(Option::take)
            .is_some()
    }

    /// Duplicate `old` onto `new`, closing whatever `new` held.
    pub fn dup_to(&mut self, old: RawFd, new: RawFd, cloexec: bool) -> Result<(), Errno> {
        let entry = self.get(old).ok_or(Errno::EBADF)?;
        if usize::try_from(new).map_or(true, |idx| idx >= MAX_FDS) {
            return Err(Errno::EBADF);
        }
        self.open_at(new, entry.file, cloexec);
        Ok(())
    }

    /// Open descriptor numbers, ascending.
    pub fn open_fds(&self) -> Vec<RawFd> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .filter_map(|(idx, _)| RawFd::try_from(idx).ok())
            .collect()
    }

    /// Drop every close-on-exec descriptor, as a successful exec does.
    pub fn exec(&mut self) {
        for slot in &mut self.entries {
            if slot.is_some_and(|e| e.cloexec) {
                *slot = None;
            }
        }
    }
}

/// One recorded primitive call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Getpid,
    Setsid,
    Setpgid(i32, i32),
    Tcsetpgrp(RawFd, i32),
    Unshare(Namespaces),
    WriteFile(String, String),
    MakeRootPrivate,
    Chroot(String),
    Setgroups(Vec<u32>),
    Setgid(u32),
    Setuid(u32),
    SetKeepcaps,
    Capget,
    Capset(CapSets),
    AmbientRaise(u32),
    Chdir(String),
    SetPdeathsig(i32),
    JailAttach(i32),
    Dup2(RawFd, RawFd),
    Dup3(RawFd, RawFd, bool),
    Dup2FdCloexec(RawFd, RawFd),
    SetCloexec(RawFd, bool),
    Close(RawFd),
    ReleaseCtty(RawFd),
    AcquireCtty(RawFd, bool),
    TraceMe,
    Execve(String),
    OpenDupDir,
    Pread(RawFd, u64),
}

impl Call {
    /// The primitive's name, as used by [`SimProcess::fail_on`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Getpid => "getpid",
            Self::Setsid => "setsid",
            Self::Setpgid(..) => "setpgid",
            Self::Tcsetpgrp(..) => "tcsetpgrp",
            Self::Unshare(_) => "unshare",
            Self::WriteFile(..) => "write_file",
            Self::MakeRootPrivate => "make_root_private",
            Self::Chroot(_) => "chroot",
            Self::Setgroups(_) => "setgroups",
            Self::Setgid(_) => "setgid",
            Self::Setuid(_) => "setuid",
            Self::SetKeepcaps => "set_keepcaps",
            Self::Capget => "capget",
            Self::Capset(_) => "capset",
            Self::AmbientRaise(_) => "ambient_raise",
            Self::Chdir(_) => "chdir",
            Self::SetPdeathsig(_) => "set_pdeathsig",
            Self::JailAttach(_) => "jail_attach",
            Self::Dup2(..) => "dup2",
            Self::Dup3(..) => "dup3",
            Self::Dup2FdCloexec(..) => "dup2fd_cloexec",
            Self::SetCloexec(..) => "set_cloexec",
            Self::Close(_) => "close",
            Self::ReleaseCtty(_) => "release_ctty",
            Self::AcquireCtty(..) => "acquire_ctty",
            Self::TraceMe => "trace_me",
            Self::Execve(_) => "execve",
            Self::OpenDupDir => "open_dup_dir",
            Self::Pread(..) => "pread",
        }
    }
}

/// The image an `execve` would have started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub path: String,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
}

/// A process whose mutations only touch memory.
pub struct SimProcess {
    pub pid: i32,
    pub fds: FdTable,
    pub caps: CapSets,
    pub calls: Vec<Call>,
    pub image: Option<Image>,
    /// Largest record batch one `pread` of the dup dir returns.
    pub dir_batch: usize,
    /// Directory records as of `open_dup_dir`.
    dir_snapshot: Vec<Vec<u8>>,
    fail: Option<(&'static str, Errno)>,
}

fn lossy(s: &CStr) -> String {
    s.to_string_lossy().into_owned()
}

impl SimProcess {
    pub fn new() -> Self {
        Self {
            pid: 4242,
            fds: FdTable::new(),
            caps: CapSets::default(),
            calls: Vec::new(),
            image: None,
            dir_batch: usize::MAX,
            dir_snapshot: Vec::new(),
            fail: None,
        }
    }

    /// Make every call to the named primitive fail with `errno`.
    pub fn fail_on(&mut self, name: &'static str, errno: Errno) {
        self.fail = Some((name, errno));
    }

    /// Names of the recorded calls, in order.
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.iter().map(Call::name).collect()
    }

    fn record(&mut self, call: Call) -> Result<(), Errno> {
        let name = call.name();
        self.calls.push(call);
        match self.fail {
            Some((failing, errno)) if failing == name => Err(errno),
            _ => Ok(()),
        }
    }

    fn require_open(&self, fd: RawFd) -> Result<(), Errno> {
        self.fds.get(fd).map(|_| ()).ok_or(Errno::EBADF)
    }

    /// Directory stream of the simulated `#d`: `N` and `Nctl` per open fd.
    fn dup_dir_stream(&self) -> Vec<Vec<u8>> {
        self.fds
            .open_fds()
            .into_iter()
            .flat_map(|fd| {
                [
                    plan9::encode_dir_entry(&fd.to_string()),
                    plan9::encode_dir_entry(&format!("{fd}ctl")),
                ]
            })
            .collect()
    }
}

impl Sys for SimProcess {
    fn getpid(&mut self) -> i32 {
        self.calls.push(Call::Getpid);
        self.pid
    }

    fn setsid(&mut self) -> Result<(), Errno> {
        self.record(Call::Setsid)
    }

    fn setpgid(&mut self, pid: i32, pgid: i32) -> Result<(), Errno> {
        self.record(Call::Setpgid(pid, pgid))
    }

    fn tcsetpgrp(&mut self, fd: RawFd, pgrp: i32) -> Result<(), Errno> {
        self.record(Call::Tcsetpgrp(fd, pgrp))?;
        self.require_open(fd)
    }

    fn unshare(&mut self, namespaces: Namespaces) -> Result<(), Errno> {
        self.record(Call::Unshare(namespaces))
    }

    fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), Errno> {
        let contents = String::from_utf8_lossy(contents).into_owned();
        self.record(Call::WriteFile(path.to_owned(), contents))
    }

    fn make_root_private(&mut self) -> Result<(), Errno> {
        self.record(Call::MakeRootPrivate)
    }

    fn chroot(&mut self, path: &CStr) -> Result<(), Errno> {
        self.record(Call::Chroot(lossy(path)))
    }

    fn setgroups(&mut self, groups: &[u32]) -> Result<(), Errno> {
        self.record(Call::Setgroups(groups.to_vec()))
    }

    fn setgid(&mut self, gid: u32) -> Result<(), Errno> {
        self.record(Call::Setgid(gid))
    }

    fn setuid(&mut self, uid: u32) -> Result<(), Errno> {
        self.record(Call::Setuid(uid))
    }

    fn set_keepcaps(&mut self) -> Result<(), Errno> {
        self.record(Call::SetKeepcaps)
    }

    fn capget(&mut self) -> Result<CapSets, Errno> {
        self.record(Call::Capget)?;
        Ok(self.caps)
    }

    fn capset(&mut self, sets: &CapSets) -> Result<(), Errno> {
        self.record(Call::Capset(*sets))?;
        self.caps = *sets;
        Ok(())
    }

    fn ambient_raise(&mut self, cap: u32) -> Result<(), Errno> {
        self.record(Call::AmbientRaise(cap))
    }

    fn chdir(&mut self, path: &CStr) -> Result<(), Errno> {
        self.record(Call::Chdir(lossy(path)))
    }

    fn set_pdeathsig(&mut self, signal: i32) -> Result<(), Errno> {
        self.record(Call::SetPdeathsig(signal))
    }

    fn jail_attach(&mut self, jid: i32) -> Result<(), Errno> {
        self.record(Call::JailAttach(jid))
    }

    fn dup2(&mut self, old: RawFd, new: RawFd) -> Result<(), Errno> {
        self.record(Call::Dup2(old, new))?;
        if old == new {
            return self.require_open(old);
        }
        self.fds.dup_to(old, new, false)
    }

    fn dup3(&mut self, old: RawFd, new: RawFd, cloexec: bool) -> Result<(), Errno> {
        self.record(Call::Dup3(old, new, cloexec))?;
        if old == new {
            return Err(Errno::EINVAL);
        }
        self.fds.dup_to(old, new, cloexec)
    }

    fn dup2fd_cloexec(&mut self, old: RawFd, new: RawFd) -> Result<(), Errno> {
        self.record(Call::Dup2FdCloexec(old, new))?;
        if old == new {
            return self.require_open(old);
        }
        self.fds.dup_to(old, new, true)
    }

    fn set_cloexec(&mut self, fd: RawFd, on: bool) -> Result<(), Errno> {
        self.record(Call::SetCloexec(fd, on))?;
        let entry = self.fds.get_mut(fd).ok_or(Errno::EBADF)?;
        entry.cloexec = on;
        Ok(())
    }

    fn close(&mut self, fd: RawFd) -> Result<(), Errno> {
        self.record(Call::Close(fd))?;
        if self.fds.close(fd) {
            Ok(())
        } else {
            Err(Errno::EBADF)
        }
    }

    fn release_ctty(&mut self, fd: RawFd) -> Result<(), Errno> {
        self.record(Call::ReleaseCtty(fd))?;
        self.require_open(fd)
    }

    fn acquire_ctty(&mut self, fd: RawFd, steal: bool) -> Result<(), Errno> {
        self.record(Call::AcquireCtty(fd, steal))?;
        self.require_open(fd)
    }

    fn trace_me(&mut self) -> Result<(), Errno> {
        self.record(Call::TraceMe)
    }

    fn execve(&mut self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno {
        if let Err(errno) = self.record(Call::Execve(lossy(path))) {
            return errno;
        }
        self.image = Some(Image {
            path: lossy(path),
            argv: argv.iter().map(|a| lossy(a)).collect(),
            envp: envp.iter().map(|e| lossy(e)).collect(),
        });
        self.fds.exec();
        Errno::from_raw(0)
    }

    fn open_dup_dir(&mut self) -> Result<RawFd, Errno> {
        self.record(Call::OpenDupDir)?;
        let fd = self.fds.alloc(DUP_DIR_FILE).ok_or(Errno::EBADF)?;
        self.dir_snapshot = self.dup_dir_stream();
        Ok(fd)
    }

    /// Whole records only, at most `dir_batch` of them, like a 9P dirread.
    fn pread(&mut self, fd: RawFd, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        self.record(Call::Pread(fd, offset))?;
        self.require_open(fd)?;

        let mut pos = 0u64;
        let mut written = 0usize;
        let mut batch = 0usize;
        for record in &self.dir_snapshot {
            let len = record.len() as u64;
            if pos < offset {
                pos += len;
                continue;
            }
            if batch == self.dir_batch || written + record.len() > buf.len() {
                break;
            }
            buf[written..written + record.len()].copy_from_slice(record);
            written += record.len();
            batch += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_has_std_fds() {
        let table = FdTable::new();
        assert_eq!(table.open_fds(), vec![0, 1, 2]);
        assert!(!table.get(0).unwrap().cloexec);
    }

    #[test]
    fn test_alloc_takes_lowest_free() {
        let mut table = FdTable::new();
        table.close(1);
        assert_eq!(table.alloc(77), Some(1));
        assert_eq!(table.alloc(78), Some(3));
    }

    #[test]
    fn test_exec_drops_cloexec_only() {
        let mut table = FdTable::new();
        table.open_at(5, 50, true);
        table.open_at(6, 60, false);
        table.exec();
        assert_eq!(table.open_fds(), vec![0, 1, 2, 6]);
    }

    #[test]
    fn test_fail_on_records_then_fails() {
        let mut sim = SimProcess::new();
        sim.fail_on("setsid", Errno::EPERM);
        assert_eq!(sim.setsid(), Err(Errno::EPERM));
        assert_eq!(sim.call_names(), vec!["setsid"]);
    }

    #[test]
    fn test_dup3_same_fd_is_einval() {
        let mut sim = SimProcess::new();
        assert_eq!(sim.dup3(1, 1, false), Err(Errno::EINVAL));
        assert_eq!(sim.dup2(1, 1), Ok(()));
    }
}
