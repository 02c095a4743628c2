//! The exec request.
//!
//! [`ExecRequest`] is a single-use description of the program to become.
//! Before anything touches the process it is lowered into a [`Prepared`]
//! request: every string converted to a C string, the environment resolved
//! and deduplicated, and the descriptor list flattened to raw numbers.

use std::ffi::{CString, OsStr, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::attr::ProcAttrs;
use crate::error::ExecError;
use crate::sys::Errno;

/// What slot `i` of the new image receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// The open file behind this descriptor of the current process.
    Inherit(RawFd),
    /// Nothing; the slot is closed.
    Closed,
}

impl Slot {
    /// Raw form used by the remap engine; `-1` closes the slot.
    pub(crate) fn raw(self) -> RawFd {
        match self {
            Self::Inherit(fd) if fd >= 0 => fd,
            Self::Inherit(_) | Self::Closed => -1,
        }
    }
}

impl From<RawFd> for Slot {
    fn from(fd: RawFd) -> Self {
        if fd < 0 {
            Self::Closed
        } else {
            Self::Inherit(fd)
        }
    }
}

/// Shared cancellation flag. Checked once, before the first mutation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything needed to replace the current process image.
///
/// Built with chained setters, then consumed once by [`ExecRequest::exec`].
///
/// ```no_run
/// use los_exec::{ExecRequest, Slot};
///
/// let err = ExecRequest::new("/bin/echo")
///     .arg("hello")
///     .env_clear()
///     .env("LANG", "C")
///     .fds([Slot::Inherit(0), Slot::Inherit(2), Slot::Inherit(1)])
///     .exec();
/// eprintln!("exec failed: {err}");
/// ```
#[derive(Debug)]
pub struct ExecRequest {
    pub(crate) path: PathBuf,
    pub(crate) argv: Vec<OsString>,
    /// `None` inherits the calling process's environment.
    pub(crate) env: Option<Vec<OsString>>,
    pub(crate) dir: Option<PathBuf>,
    pub(crate) fds: Vec<Slot>,
    pub(crate) attrs: ProcAttrs,
    pub(crate) cancel: Option<CancelToken>,
    pub(crate) lookup_err: Option<Errno>,
    pub(crate) started: bool,
}

/// Key of a `KEY=VALUE` entry. Entries without `=` are all key.
fn env_key(entry: &OsStr) -> &[u8] {
    let bytes = entry.as_bytes();
    match bytes.iter().position(|&b| b == b'=') {
        Some(eq) => &bytes[..eq],
        None => bytes,
    }
}

fn env_value(entry: &OsStr) -> Option<&OsStr> {
    let bytes = entry.as_bytes();
    let eq = bytes.iter().position(|&b| b == b'=')?;
    Some(OsStr::from_bytes(&bytes[eq + 1..]))
}

fn env_join(key: &OsStr, value: &OsStr) -> OsString {
    let mut entry = key.to_owned();
    entry.push("=");
    entry.push(value);
    entry
}

fn inherited_env() -> Vec<OsString> {
    std::env::vars_os()
        .map(|(k, v)| env_join(&k, &v))
        .collect()
}

impl ExecRequest {
    /// Request to run `path` with `argv == [path]`, the inherited
    /// environment and descriptors 0, 1 and 2.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            argv: vec![path.clone().into_os_string()],
            path,
            env: None,
            dir: None,
            fds: vec![Slot::Inherit(0), Slot::Inherit(1), Slot::Inherit(2)],
            attrs: ProcAttrs::default(),
            cancel: None,
            lookup_err: None,
            started: false,
        }
    }

    /// Append one argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.argv.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Replace the whole argument vector, `argv[0]` included.
    pub fn argv<I, S>(&mut self, argv: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv = argv.into_iter().map(|a| a.as_ref().to_owned()).collect();
        self
    }

    fn env_mut(&mut self) -> &mut Vec<OsString> {
        self.env.get_or_insert_with(inherited_env)
    }

    /// Set `key`, replacing any existing entry for it.
    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        let key = key.as_ref();
        let entries = self.env_mut();
        entries.retain(|e| env_key(e) != key.as_bytes());
        entries.push(env_join(key, value.as_ref()));
        self
    }

    pub fn env_remove(&mut self, key: impl AsRef<OsStr>) -> &mut Self {
        let key = key.as_ref().as_bytes().to_vec();
        self.env_mut().retain(|e| env_key(e) != key.as_slice());
        self
    }

    /// Start from an empty environment.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env = Some(Vec::new());
        self
    }

    /// Use these raw `KEY=VALUE` entries as the environment.
    /// Duplicate keys are resolved at exec time, last one wins.
    pub fn environ<I, S>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.env = Some(entries.into_iter().map(|e| e.as_ref().to_owned()).collect());
        self
    }

    /// Value the new image will see for `key`.
    pub fn get_env(&self, key: impl AsRef<OsStr>) -> Option<OsString> {
        let key = key.as_ref();
        match &self.env {
            None => std::env::var_os(key),
            Some(entries) => entries
                .iter()
                .rev()
                .find(|e| env_key(e) == key.as_bytes())
                .and_then(|e| env_value(e))
                .map(OsStr::to_owned),
        }
    }

    /// Working directory, resolved after any chroot.
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Descriptors for slots `0..N` of the new image.
    pub fn fds<I>(&mut self, fds: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Slot>,
    {
        self.fds = fds.into_iter().map(Into::into).collect();
        self
    }

    pub fn attrs(&mut self, attrs: ProcAttrs) -> &mut Self {
        self.attrs = attrs;
        self
    }

    pub fn attrs_mut(&mut self) -> &mut ProcAttrs {
        &mut self.attrs
    }

    pub fn cancel_token(&mut self, token: CancelToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Record that resolving the program path failed. `exec` then reports
    /// [`ExecError::Lookup`] without touching the process.
    pub fn lookup_error(&mut self, errno: Errno) -> &mut Self {
        self.lookup_err = Some(errno);
        self
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn get_argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn get_fds(&self) -> &[Slot] {
        &self.fds
    }

    pub fn get_attrs(&self) -> &ProcAttrs {
        &self.attrs
    }

    /// Replace the calling process with the requested program.
    ///
    /// Only returns on failure. Read the crate documentation on partial
    /// mutation before calling this.
    pub fn exec(&mut self) -> ExecError {
        crate::guard::exec_with(self, &crate::pipeline::NATIVE, &mut crate::sys::Host::new())
    }
}

fn cstring(s: &OsStr) -> Result<CString, ExecError> {
    CString::new(s.as_bytes()).map_err(|_| ExecError::InvalidArgument)
}

/// Keep the last entry for each key, in first-seen order of the survivors.
fn dedup_env(entries: Vec<OsString>) -> Vec<OsString> {
    let mut seen: Vec<Vec<u8>> = Vec::with_capacity(entries.len());
    let mut out: Vec<OsString> = entries
        .into_iter()
        .rev()
        .filter(|e| {
            let key = env_key(e).to_vec();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        })
        .collect();
    out.reverse();
    out
}

/// A request lowered to what the system calls take.
#[derive(Debug)]
pub(crate) struct Prepared<'a> {
    pub path: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
    pub dir: Option<CString>,
    pub chroot: Option<CString>,
    /// `fds[i]` for slot `i`; `-1` closes it.
    pub fds: Vec<RawFd>,
    pub attrs: &'a ProcAttrs,
}

impl<'a> Prepared<'a> {
    pub fn lower(req: &'a ExecRequest) -> Result<Self, ExecError> {
        let env = match &req.env {
            Some(entries) => entries.clone(),
            None => {
                let mut entries = inherited_env();
                // An inherited PWD would name the old directory.
                if let Some(pwd) = req.dir.as_deref().and_then(|d| std::path::absolute(d).ok()) {
                    entries.push(env_join(OsStr::new("PWD"), pwd.as_os_str()));
                }
                entries
            }
        };
        let envp = dedup_env(env)
            .iter()
            .map(|e| cstring(e))
            .collect::<Result<_, _>>()?;

        let mut argv: Vec<CString> = req
            .argv
            .iter()
            .map(|a| cstring(a))
            .collect::<Result<_, _>>()?;
        let path = cstring(req.path.as_os_str())?;
        if argv.is_empty() {
            argv.push(path.clone());
        }

        Ok(Self {
            path,
            argv,
            envp,
            dir: req.dir.as_deref().map(|d| cstring(d.as_os_str())).transpose()?,
            chroot: req
                .attrs
                .chroot
                .as_deref()
                .map(|d| cstring(d.as_os_str()))
                .transpose()?,
            fds: req.fds.iter().map(|s| s.raw()).collect(),
            attrs: &req.attrs,
        })
    }

    /// Replace `argv[0]` with the path when it is the longer of the two.
    pub fn shorten_argv0(&mut self) {
        let Some(argv0) = self.argv.first_mut() else {
            return;
        };
        if argv0.as_bytes().len() > self.path.as_bytes().len() {
            *argv0 = self.path.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(s: &str) -> OsString {
        OsString::from(s)
    }

    #[test]
    fn test_defaults() {
        let req = ExecRequest::new("/bin/true");
        assert_eq!(req.get_argv(), &[os("/bin/true")]);
        assert_eq!(
            req.get_fds(),
            &[Slot::Inherit(0), Slot::Inherit(1), Slot::Inherit(2)]
        );
        assert!(req.env.is_none());
        assert!(!req.started);
    }

    #[test]
    fn test_args_and_argv() {
        let mut req = ExecRequest::new("/bin/ls");
        req.arg("-l").args(["-a", "/tmp"]);
        assert_eq!(req.get_argv(), &[os("/bin/ls"), os("-l"), os("-a"), os("/tmp")]);

        req.argv(["ls", "-1"]);
        assert_eq!(req.get_argv(), &[os("ls"), os("-1")]);
    }

    #[test]
    fn test_env_replaces_existing_key() {
        let mut req = ExecRequest::new("/bin/env");
        req.env_clear().env("A", "1").env("B", "2").env("A", "3");
        assert_eq!(req.env, Some(vec![os("B=2"), os("A=3")]));
        assert_eq!(req.get_env("A"), Some(os("3")));
        assert_eq!(req.get_env("C"), None);
    }

    #[test]
    fn test_env_remove_and_clear() {
        let mut req = ExecRequest::new("/bin/env");
        req.environ(["A=1", "AB=2"]).env_remove("A");
        assert_eq!(req.env, Some(vec![os("AB=2")]));
        req.env_clear();
        assert_eq!(req.get_env("AB"), None);
    }

    #[test]
    fn test_get_env_last_entry_wins() {
        let mut req = ExecRequest::new("/bin/env");
        req.environ(["X=first", "X=second", "EMPTY="]);
        assert_eq!(req.get_env("X"), Some(os("second")));
        assert_eq!(req.get_env("EMPTY"), Some(os("")));
    }

    #[test]
    fn test_env_edit_starts_from_inherited() {
        let mut req = ExecRequest::new("/bin/env");
        req.env("LOS_EXEC_TEST_KEY", "v");
        let entries = req.env.as_ref().unwrap();
        assert_eq!(entries.len(), std::env::vars_os().count() + 1);
    }

    #[test]
    fn test_lowering_dedups_env_last_wins() {
        let mut req = ExecRequest::new("/bin/env");
        req.environ(["A=1", "B=2", "A=3"]);
        let prep = Prepared::lower(&req).unwrap();
        let envp: Vec<_> = prep.envp.iter().map(|e| e.to_str().unwrap()).collect();
        assert_eq!(envp, vec!["B=2", "A=3"]);
    }

    #[test]
    fn test_lowering_rejects_nul() {
        let mut req = ExecRequest::new("/bin/echo");
        req.arg("a\0b");
        assert_eq!(Prepared::lower(&req).unwrap_err(), ExecError::InvalidArgument);

        let mut req = ExecRequest::new("/bin/echo");
        req.current_dir("/tmp\0x");
        assert_eq!(Prepared::lower(&req).unwrap_err(), ExecError::InvalidArgument);

        let mut req = ExecRequest::new("/bin/echo");
        req.env_clear().env("K", "v\0");
        assert_eq!(Prepared::lower(&req).unwrap_err(), ExecError::InvalidArgument);
    }

    #[test]
    fn test_lowering_empty_argv_uses_path() {
        let mut req = ExecRequest::new("/bin/true");
        req.argv(Vec::<OsString>::new()).env_clear();
        let prep = Prepared::lower(&req).unwrap();
        assert_eq!(prep.argv, vec![c"/bin/true".to_owned()]);
    }

    #[test]
    fn test_lowering_sets_pwd_only_for_inherited_env() {
        let mut req = ExecRequest::new("/bin/pwd");
        req.current_dir("/");
        let prep = Prepared::lower(&req).unwrap();
        let pwd: Vec<_> = prep
            .envp
            .iter()
            .filter(|e| e.to_bytes().starts_with(b"PWD="))
            .collect();
        assert_eq!(pwd, vec![&c"PWD=/".to_owned()]);

        req.environ(["PWD=/elsewhere"]);
        let prep = Prepared::lower(&req).unwrap();
        assert_eq!(prep.envp, vec![c"PWD=/elsewhere".to_owned()]);
    }

    #[test]
    fn test_lowering_fds_and_paths() {
        let mut req = ExecRequest::new("/bin/cat");
        req.fds([Slot::Inherit(5), Slot::Closed, Slot::Inherit(-3)])
            .current_dir("/srv")
            .attrs_mut()
            .chroot = Some("/jail".into());
        let prep = Prepared::lower(&req).unwrap();
        assert_eq!(prep.fds, vec![5, -1, -1]);
        assert_eq!(prep.dir.as_deref(), Some(c"/srv"));
        assert_eq!(prep.chroot.as_deref(), Some(c"/jail"));
    }

    #[test]
    fn test_fds_from_raw() {
        let mut req = ExecRequest::new("/bin/cat");
        req.fds([2, -1, 0]);
        assert_eq!(
            req.get_fds(),
            &[Slot::Inherit(2), Slot::Closed, Slot::Inherit(0)]
        );
    }

    #[test]
    fn test_shorten_argv0() {
        let mut req = ExecRequest::new("/bin/sh");
        req.argv(["/a/very/long/argv0/name", "-c"]);
        let mut prep = Prepared::lower(&req).unwrap();
        prep.shorten_argv0();
        assert_eq!(prep.argv[0].as_c_str(), c"/bin/sh");

        req.argv(["sh"]);
        let mut prep = Prepared::lower(&req).unwrap();
        prep.shorten_argv0();
        assert_eq!(prep.argv[0].as_c_str(), c"sh");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
