//! Error handling infrastructure.
//!
//! Provides the `define_error!` macro for consistent error type definitions.
//! Every variant carries a numeric code, a description and an [`ErrorClass`]
//! telling the caller whether the failure happened before or after the
//! process was touched.
//!
//! ## Usage
//!
//! ### Simple errors (no inner data)
//! ```ignore
//! define_error! {
//!     pub enum GuardError(0x07) {
//!         NoCommand = 0x01, Usage => "no command",
//!         Busy = 0x02, Usage => "another exec is in flight",
//!     }
//! }
//! ```
//!
//! ### Nested errors (with inner error type)
//! ```ignore
//! define_error! {
//!     pub enum ExecError(0x01) {
//!         Unsupported(Attribute) = 0x10, Unsupported => "attribute not supported on this platform",
//!         Os(Errno) = 0x20, Os => "system call failed",
//!     }
//! }
//! ```

#![no_std]

/// How far a failed operation got before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected during validation. Nothing was mutated; a corrected request may be retried.
    Usage,
    /// The platform cannot honour a requested attribute. Nothing was mutated.
    Unsupported,
    /// An underlying system call failed. Earlier steps may have taken effect.
    Os,
}

impl ErrorClass {
    /// True if the error was raised before any process-wide mutation.
    pub const fn is_pure(self) -> bool {
        matches!(self, Self::Usage | Self::Unsupported)
    }
}

/// Macro to define an error type with consistent handling.
///
/// Supports both simple variants and nested variants containing inner errors.
/// Inner types must be `Copy + Display`.
#[macro_export]
macro_rules! define_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(($inner:ty))? = $code:literal, $class:ident => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant $(($inner))?,
            )*
        }

        impl $name {
            /// Subsystem identifier for this error type.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Get numeric error code for debugging.
            pub const fn code(&self) -> u16 {
                match self {
                    $(
                        $crate::define_error!(@pattern $variant $(($inner))? _unused) => {
                            (($subsystem as u16) << 8) | $code
                        }
                    )*
                }
            }

            /// Get error name for logging.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(
                        $crate::define_error!(@pattern $variant $(($inner))? _unused) => {
                            $desc
                        }
                    )*
                }
            }

            /// Get the recovery class of this error.
            pub const fn class(&self) -> $crate::ErrorClass {
                match self {
                    $(
                        $crate::define_error!(@pattern $variant $(($inner))? _unused) => {
                            $crate::ErrorClass::$class
                        }
                    )*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        $crate::define_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_error!(@display_body self f $desc $(($inner))? inner)
                        }
                    )*
                }
            }
        }

        impl core::error::Error for $name {}
    };

    // Helper to generate patterns
    (@pattern $variant:ident ($inner:ty) $bind:ident) => { Self::$variant($bind) };
    (@pattern $variant:ident $bind:ident) => { Self::$variant };

    // Helper to generate display bodies
    (@display_body $self:ident $f:ident $desc:literal ($inner:ty) $bind:ident) => {
        write!($f, "E{:04X}: {}: {}", $self.code(), $desc, $bind)
    };
    (@display_body $self:ident $f:ident $desc:literal $bind:ident) => {
        write!($f, "E{:04X}: {}", $self.code(), $desc)
    };
}
