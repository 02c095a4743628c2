//! Exec error taxonomy.
//!
//! Usage and unsupported errors are raised before the first mutation and
//! leave the process exactly as it was. [`ExecError::Os`] may be raised
//! after earlier steps already took effect; nothing is rolled back.

use los_error::{define_error, ErrorClass};

use crate::attr::Attribute;
use crate::sys::Errno;

define_error! {
    /// Why the process image was not replaced.
    pub enum ExecError(0x01) {
        /// The request was already handed to `exec` once.
        AlreadyStarted = 0x01, Usage => "exec: already started",
        /// Empty program path.
        NoCommand = 0x02, Usage => "exec: no command",
        /// The caller's path lookup failed; carried through unchanged.
        Lookup(Errno) = 0x03, Usage => "exec: executable lookup failed",
        /// The cancellation token fired before exec began.
        Cancelled = 0x04, Usage => "exec: cancelled before start",
        CttyWithForeground = 0x05, Usage => "exec: both setctty and foreground set",
        CttyOutOfRange = 0x06, Usage => "exec: setctty set but ctty not valid in child",
        /// The same source descriptor appears twice in the descriptor list.
        DuplicateDescriptor = 0x07, Usage => "exec: descriptor listed more than once",
        /// Path, argument, environment entry or directory holds a NUL byte.
        InvalidArgument = 0x08, Usage => "exec: argument contains a NUL byte",
        /// Capability number does not fit the two capability words.
        InvalidCapability = 0x09, Usage => "exec: capability number out of range",
        MappingsWithoutUserNamespace = 0x0A, Usage => "exec: id mappings require a new user namespace",
        /// The platform cannot honour this attribute.
        Unsupported(Attribute) = 0x10, Unsupported => "exec: attribute not supported on this platform",
        /// A system call failed; the message is the OS's own.
        Os(Errno) = 0x20, Os => "exec",
    }
}

impl ExecError {
    /// True if the process was not touched.
    pub const fn is_pure(&self) -> bool {
        self.class().is_pure()
    }

    /// The OS error number, for [`ExecError::Os`] and [`ExecError::Lookup`].
    pub const fn errno(&self) -> Option<Errno> {
        match self {
            Self::Os(errno) | Self::Lookup(errno) => Some(*errno),
            _ => None,
        }
    }
}

impl From<Errno> for ExecError {
    fn from(errno: Errno) -> Self {
        Self::Os(errno)
    }
}

impl From<ExecError> for std::io::Error {
    fn from(err: ExecError) -> Self {
        use std::io::{Error, ErrorKind};

        if let Some(errno) = err.errno() {
            return Error::from(errno);
        }
        match err.class() {
            ErrorClass::Unsupported => Error::new(ErrorKind::Unsupported, err),
            ErrorClass::Usage | ErrorClass::Os => Error::new(ErrorKind::InvalidInput, err),
        }
    }
}
