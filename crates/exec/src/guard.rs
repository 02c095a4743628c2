//! Invocation guard.
//!
//! Every usage check runs before the first system call. Only then is the
//! process-wide exec lock taken and the request handed to the pipeline.

use std::os::fd::RawFd;

use spin::Mutex;

use crate::error::ExecError;
use crate::pipeline::Pipeline;
use crate::request::{ExecRequest, Prepared};
use crate::sys::Sys;

/// Serializes exec attempts. Working directory, root, credentials and
/// session membership belong to the whole process.
static EXEC_LOCK: Mutex<()> = Mutex::new(());

/// Usage checks on the request itself, independent of the platform.
fn validate(req: &ExecRequest) -> Result<(), ExecError> {
    if let Some(errno) = req.lookup_err {
        return Err(ExecError::Lookup(errno));
    }
    if req.path.as_os_str().is_empty() {
        return Err(ExecError::NoCommand);
    }
    if req.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
        return Err(ExecError::Cancelled);
    }

    let attrs = &req.attrs;
    if attrs.setctty && attrs.foreground {
        return Err(ExecError::CttyWithForeground);
    }
    if attrs.setctty && usize::try_from(attrs.ctty).map_or(true, |i| i >= req.fds.len()) {
        return Err(ExecError::CttyOutOfRange);
    }

    let mut seen: Vec<RawFd> = Vec::with_capacity(req.fds.len());
    for fd in req.fds.iter().map(|s| s.raw()).filter(|&fd| fd >= 0) {
        if seen.contains(&fd) {
            return Err(ExecError::DuplicateDescriptor);
        }
        seen.push(fd);
    }
    Ok(())
}

/// Run `req` through `pipeline` on `sys`. Returns only on failure.
pub(crate) fn exec_with<P: Pipeline, S: Sys>(
    req: &mut ExecRequest,
    pipeline: &P,
    sys: &mut S,
) -> ExecError {
    if req.started {
        return ExecError::AlreadyStarted;
    }
    req.started = true;

    if let Err(err) = validate(req) {
        log::debug!("[EXEC] rejected {:?}: {}", req.path, err);
        return err;
    }

    let mut prep = match Prepared::lower(req) {
        Ok(prep) => prep,
        Err(err) => return err,
    };
    if let Err(err) = pipeline.check(&prep) {
        log::debug!("[EXEC] {} rejected {:?}: {}", pipeline.name(), req.path, err);
        return err;
    }
    pipeline.adjust(&mut prep);

    log::debug!(
        "[EXEC] {} exec {:?} argv={:?} fds={:?} attrs={:?}",
        pipeline.name(),
        prep.path,
        prep.argv,
        prep.fds,
        prep.attrs.requested()
    );

    let _lock = EXEC_LOCK.lock();
    let err = pipeline.run(sys, &prep);
    if !err.is_pure() {
        log::warn!(
            "[EXEC] {:?} failed after setup began; process may be partially mutated: {}",
            prep.path,
            err
        );
    }
    err
}
