//! exec-wrap - run a program in place of this one
//!
//! Builds an exec request from the command line and replaces the wrapper
//! process with the target. Nothing is forked: the target keeps the
//! wrapper's pid, parent and (unless told otherwise) descriptors.
//!
//! Usage: exec-wrap [OPTIONS] PROGRAM [ARGS]...
//!
//! Exit status, when the exec does not happen:
//! - 127: program not found
//! - 126: program found but not executable
//! - 125: anything else (bad request, unsupported attribute, failed step)

mod logger;

use std::ffi::{OsStr, OsString};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use los_exec::{Credential, Errno, ExecError, ExecRequest, IdMap, Namespaces, ProcAttrs, Slot};

const EXIT_NOT_FOUND: u8 = 127;
const EXIT_NOT_EXECUTABLE: u8 = 126;
const EXIT_FAILURE: u8 = 125;

#[derive(Parser, Debug)]
#[command(name = "exec-wrap")]
#[command(about = "Replace this process with PROGRAM after applying process attributes")]
struct Args {
    /// Change to DIR before exec (inside the new root, if any)
    #[arg(short = 'C', long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Set an environment variable
    #[arg(short, long, value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(OsString, OsString)>,

    /// Remove an environment variable
    #[arg(short, long, value_name = "KEY")]
    unset: Vec<OsString>,

    /// Start from an empty environment
    #[arg(short = 'i', long)]
    env_clear: bool,

    /// Descriptors for slots 0, 1, 2, ... ('-' closes a slot)
    #[arg(long, value_name = "LIST", value_delimiter = ',', value_parser = parse_slot)]
    fds: Option<Vec<Slot>>,

    /// argv[0] for the program (default: PROGRAM as given)
    #[arg(long, value_name = "NAME", allow_hyphen_values = true)]
    argv0: Option<OsString>,

    /// Start a new session
    #[arg(long)]
    setsid: bool,

    /// Move into process group PGID (0: a new group)
    #[arg(long)]
    setpgid: bool,

    /// Process group for --setpgid / --foreground
    #[arg(long, default_value_t = 0)]
    pgid: i32,

    /// Make the process group the terminal's foreground group
    #[arg(long)]
    foreground: bool,

    /// Detach from the controlling terminal
    #[arg(long)]
    noctty: bool,

    /// Acquire the terminal in slot --ctty as controlling terminal
    #[arg(long)]
    setctty: bool,

    /// Terminal descriptor for --setctty (a slot) or --foreground
    #[arg(long, default_value_t = 0)]
    ctty: i32,

    /// Change root before exec
    #[arg(long, value_name = "DIR")]
    chroot: Option<PathBuf>,

    /// Run as this user id
    #[arg(long)]
    uid: Option<u32>,

    /// Run as this group id
    #[arg(long)]
    gid: Option<u32>,

    /// Supplementary groups with --uid/--gid (default: none)
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    groups: Vec<u32>,

    /// Keep the current supplementary groups
    #[arg(long, conflicts_with = "groups")]
    no_setgroups: bool,

    /// Signal to receive when the parent exits
    #[arg(long, value_name = "SIGNUM")]
    pdeathsig: Option<i32>,

    /// Namespaces to unshare (user,mount,pid,net,uts,ipc,cgroup,time)
    #[arg(long, value_name = "LIST", value_parser = parse_namespaces)]
    unshare: Option<Namespaces>,

    /// uid mapping CONTAINER:HOST:SIZE (needs --unshare user)
    #[arg(long, value_name = "C:H:S", value_parser = parse_id_map)]
    uid_map: Vec<IdMap>,

    /// gid mapping CONTAINER:HOST:SIZE (needs --unshare user)
    #[arg(long, value_name = "C:H:S", value_parser = parse_id_map)]
    gid_map: Vec<IdMap>,

    /// Write "allow" to /proc/self/setgroups when mapping gids
    #[arg(long)]
    allow_setgroups: bool,

    /// Capability number to raise into the ambient set
    #[arg(long, value_name = "CAP")]
    ambient_cap: Vec<u32>,

    /// FreeBSD jail to attach to
    #[arg(long, value_name = "JID")]
    jail: Option<i32>,

    /// Stop at the first instruction of the new image for a tracer
    #[arg(long)]
    ptrace: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Program to run and its arguments. The program is searched in PATH
    /// unless it contains a '/'.
    #[arg(
        value_name = "PROGRAM",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<OsString>,
}

fn parse_env(s: &str) -> Result<(OsString, OsString)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        bail!("empty variable name in {s:?}");
    }
    Ok((key.into(), value.into()))
}

fn parse_slot(s: &str) -> Result<Slot> {
    if s == "-" {
        return Ok(Slot::Closed);
    }
    let fd = s
        .parse::<i32>()
        .with_context(|| format!("bad descriptor {s:?}"))?;
    if fd < 0 {
        bail!("bad descriptor {s:?} (use '-' to close a slot)");
    }
    Ok(Slot::Inherit(fd))
}

fn parse_namespaces(s: &str) -> Result<Namespaces> {
    s.split(',')
        .filter(|name| !name.is_empty())
        .try_fold(Namespaces::empty(), |acc, name| {
            let flag = match name {
                "user" => Namespaces::NEWUSER,
                "mount" | "mnt" => Namespaces::NEWNS,
                "pid" => Namespaces::NEWPID,
                "net" => Namespaces::NEWNET,
                "uts" => Namespaces::NEWUTS,
                "ipc" => Namespaces::NEWIPC,
                "cgroup" => Namespaces::NEWCGROUP,
                "time" => Namespaces::NEWTIME,
                other => bail!("unknown namespace {other:?}"),
            };
            Ok(acc | flag)
        })
}

fn parse_id_map(s: &str) -> Result<IdMap> {
    let mut fields = s.split(':').map(str::parse::<u32>);
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(Ok(container_id)), Some(Ok(host_id)), Some(Ok(size)), None) => Ok(IdMap {
            container_id,
            host_id,
            size,
        }),
        _ => bail!("expected CONTAINER:HOST:SIZE, got {s:?}"),
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Resolve `program` the way a shell would. A name with a slash is used as-is.
fn lookup(program: &OsStr, path_var: Option<&OsStr>) -> Result<PathBuf, Errno> {
    let program = Path::new(program);
    if program.as_os_str().as_encoded_bytes().contains(&b'/') {
        return Ok(program.to_path_buf());
    }
    let mut found_unexecutable = false;
    for dir in std::env::split_paths(path_var.unwrap_or_default()) {
        // An empty PATH entry means the current directory.
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
        found_unexecutable |= candidate.is_file();
    }
    Err(if found_unexecutable {
        Errno::EACCES
    } else {
        Errno::ENOENT
    })
}

impl Args {
    fn program(&self) -> &OsStr {
        &self.command[0]
    }

    fn program_args(&self) -> &[OsString] {
        &self.command[1..]
    }

    fn attrs(&self) -> ProcAttrs {
        let credential = (self.uid.is_some() || self.gid.is_some()).then(|| {
            // SAFETY: getuid/getgid cannot fail and touch no memory.
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            Credential {
                uid: self.uid.unwrap_or(uid),
                gid: self.gid.unwrap_or(gid),
                groups: self.groups.clone(),
                no_setgroups: self.no_setgroups,
            }
        });
        ProcAttrs {
            chroot: self.chroot.clone(),
            credential,
            jail: self.jail,
            setsid: self.setsid,
            setpgid: self.setpgid,
            pgid: self.pgid,
            foreground: self.foreground,
            noctty: self.noctty,
            setctty: self.setctty,
            ctty: self.ctty,
            pdeathsig: self.pdeathsig,
            uid_mappings: (!self.uid_map.is_empty()).then(|| self.uid_map.clone()),
            gid_mappings: (!self.gid_map.is_empty()).then(|| self.gid_map.clone()),
            gid_mappings_enable_setgroups: self.allow_setgroups,
            unshare: self.unshare.unwrap_or_default(),
            ambient_caps: self.ambient_cap.clone(),
            ptrace: self.ptrace,
        }
    }

    fn request(&self) -> ExecRequest {
        let program = self.program();
        let path = lookup(program, std::env::var_os("PATH").as_deref());
        let mut req = ExecRequest::new(path.as_ref().map_or(Path::new(program), PathBuf::as_path));
        if let Err(errno) = path {
            req.lookup_error(errno);
        }

        let argv0 = self.argv0.as_deref().unwrap_or(program);
        req.argv(std::iter::once(argv0).chain(self.program_args().iter().map(OsString::as_os_str)));

        if self.env_clear {
            req.env_clear();
        }
        for key in &self.unset {
            req.env_remove(key);
        }
        for (key, value) in &self.env {
            req.env(key, value);
        }
        if let Some(dir) = &self.dir {
            req.current_dir(dir);
        }
        if let Some(fds) = &self.fds {
            req.fds(fds.iter().copied());
        }
        req.attrs(self.attrs());
        req
    }
}

fn exit_code(err: &ExecError) -> u8 {
    match err.errno() {
        Some(Errno::ENOENT) => EXIT_NOT_FOUND,
        Some(Errno::EACCES) => EXIT_NOT_EXECUTABLE,
        Some(errno) if errno.raw() == libc::ENOEXEC => EXIT_NOT_EXECUTABLE,
        _ => EXIT_FAILURE,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(logger::level(
        args.verbose,
        std::env::var(logger::ENV_LEVEL).ok().as_deref(),
    ));

    let mut req = args.request();
    log::info!("exec {:?} {:?}", req.get_path(), req.get_argv());
    let err = req.exec();

    let code = exit_code(&err);
    let report = anyhow::Error::new(err).context(format!(
        "cannot run {}",
        Path::new(args.program()).display()
    ));
    eprintln!("exec-wrap: {report:#}");
    if !err.is_pure() {
        eprintln!("exec-wrap: process attributes were partially applied");
    }
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use los_exec::Attribute;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("exec-wrap").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_program_args_keep_hyphens() {
        let args = parse(&["-i", "ls", "-l", "--all", "-v"]);
        assert!(args.env_clear);
        assert_eq!(args.verbose, 0);
        assert_eq!(args.program(), "ls");
        assert_eq!(args.program_args(), ["-l", "--all", "-v"]);
        assert!(Args::try_parse_from(["exec-wrap", "-i"]).is_err());
    }

    #[test]
    fn test_fds_list() {
        let args = parse(&["--fds", "0,-,5", "cat"]);
        assert_eq!(
            args.fds,
            Some(vec![Slot::Inherit(0), Slot::Closed, Slot::Inherit(5)])
        );
        assert!(Args::try_parse_from(["exec-wrap", "--fds", "0,x", "cat"]).is_err());
        assert!(Args::try_parse_from(["exec-wrap", "--fds", "-3", "cat"]).is_err());
    }

    #[test]
    fn test_env_pairs() {
        assert_eq!(parse_env("A=b=c").unwrap(), ("A".into(), "b=c".into()));
        assert_eq!(parse_env("A=").unwrap(), ("A".into(), "".into()));
        assert!(parse_env("A").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(
            parse_namespaces("user,mnt,net").unwrap(),
            Namespaces::NEWUSER | Namespaces::NEWNS | Namespaces::NEWNET
        );
        assert!(parse_namespaces("bogus").is_err());
    }

    #[test]
    fn test_id_map() {
        assert_eq!(
            parse_id_map("0:1000:1").unwrap(),
            IdMap {
                container_id: 0,
                host_id: 1000,
                size: 1
            }
        );
        assert!(parse_id_map("0:1000").is_err());
        assert!(parse_id_map("0:1000:1:2").is_err());
        assert!(parse_id_map("a:b:c").is_err());
    }

    #[test]
    fn test_credential_fills_missing_ids() {
        let attrs = parse(&["--uid", "65534", "--groups", "1,2", "id"]).attrs();
        let cred = attrs.credential.as_ref().unwrap();
        assert_eq!(cred.uid, 65534);
        // SAFETY: getgid cannot fail.
        assert_eq!(cred.gid, unsafe { libc::getgid() });
        assert_eq!(cred.groups, vec![1, 2]);
        assert!(attrs.requested().contains(&Attribute::Credential));
    }

    #[test]
    fn test_no_credential_by_default() {
        let attrs = parse(&["id"]).attrs();
        assert_eq!(attrs, ProcAttrs::default());
    }

    #[test]
    fn test_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        let path_var = dir.path().as_os_str();

        assert_eq!(lookup(OsStr::new("tool"), Some(path_var)), Err(Errno::EACCES));
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(lookup(OsStr::new("tool"), Some(path_var)), Ok(tool));
        assert_eq!(lookup(OsStr::new("nope"), Some(path_var)), Err(Errno::ENOENT));
        assert_eq!(
            lookup(OsStr::new("./rel/tool"), None),
            Ok(PathBuf::from("./rel/tool"))
        );
    }

    #[test]
    fn test_lookup_failure_is_carried_in_request() {
        let mut req = parse(&["no-such-program-on-path"]).request();
        let err = req.exec();
        assert_eq!(err, ExecError::Lookup(Errno::ENOENT));
        assert_eq!(exit_code(&err), EXIT_NOT_FOUND);
    }

    #[test]
    fn test_argv0_override() {
        let req = parse(&["--argv0", "-sh", "/bin/sh", "-c", "true"]).request();
        assert_eq!(req.get_argv(), ["-sh", "-c", "true"]);
        assert_eq!(req.get_path(), Path::new("/bin/sh"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&ExecError::Os(Errno::EACCES)), EXIT_NOT_EXECUTABLE);
        assert_eq!(exit_code(&ExecError::Os(Errno::EPERM)), EXIT_FAILURE);
        assert_eq!(exit_code(&ExecError::Unsupported(Attribute::Jail)), EXIT_FAILURE);
    }
}
