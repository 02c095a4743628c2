//! Exec in place.
//!
//! Replaces the calling process image with a new program after applying a
//! set of process attributes: session and process group, namespaces,
//! chroot, credentials, capabilities, working directory, parent-death
//! signal, descriptor layout and controlling terminal. Each OS family runs
//! the subset it supports, in a fixed order, then calls `execve`.
//!
//! # Partial mutation
//!
//! **There is no rollback.** Setup runs in the calling process. If step
//! *k* fails, everything steps 1 to *k*-1 did stays in effect: the process
//! may already be in a new session, inside a new root, running as another
//! user, in another directory, with its descriptors closed or moved.
//!
//! Errors of class [`Usage`](los_error::ErrorClass::Usage) or
//! [`Unsupported`](los_error::ErrorClass::Unsupported) are raised before
//! the first mutation ([`ExecError::is_pure`]). An [`ExecError::Os`] may
//! not be. After one, treat the process as altered: report and exit.
//!
//! Other threads keep running until the image is replaced and see every
//! process-wide change as it happens. The internal lock only serializes
//! concurrent calls to [`ExecRequest::exec`].
//!
//! # Example
//!
//! ```no_run
//! use los_exec::{Credential, ExecRequest, ProcAttrs};
//!
//! let mut req = ExecRequest::new("/usr/bin/id");
//! req.current_dir("/").attrs(ProcAttrs {
//!     setsid: true,
//!     credential: Some(Credential::new(65534, 65534)),
//!     ..ProcAttrs::default()
//! });
//! let err = req.exec();
//! eprintln!("{err}");
//! std::process::exit(if err.is_pure() { 2 } else { 127 });
//! ```

mod attr;
mod error;
mod guard;
mod pipeline;
mod remap;
mod request;
mod sys;

pub use attr::{Attribute, Credential, IdMap, Namespaces, ProcAttrs};
pub use error::ExecError;
pub use los_error::ErrorClass;
pub use request::{CancelToken, ExecRequest, Slot};
pub use sys::Errno;
