//! Hypervisor error handling infrastructure.
//!
//! Provides the `define_kernel_error!` macro for consistent error type definitions.
//! Every variant carries a 16-bit code: the subsystem in the high byte and the
//! variant in the low byte. The code is what the trap layer hands back to a guest
//! and what shows up in diagnostic records, so it must stay stable.
//!
//! ## Usage
//!
//! ```ignore
//! define_kernel_error! {
//!     pub enum MmError(0x02) {
//!         OutOfRange = 0x01 => "Frame number out of range",
//!         TypeConflict = 0x03 => "Frame already in use with another type",
//!     }
//! }
//!
//! assert_eq!(MmError::TypeConflict.code(), 0x0203);
//! assert_eq!(MmError::from_code(0x0201), Some(MmError::OutOfRange));
//! ```

#![no_std]

/// Macro to define a hypervisor error type with consistent handling.
///
/// Generates a fieldless `#[repr(u16)]` enum whose discriminants are the
/// combined subsystem/variant codes, plus `code`, `name`, `from_code`,
/// `Display` and `core::error::Error`.
#[macro_export]
macro_rules! define_kernel_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $code:literal => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant = (($subsystem as u16) << 8) | $code,
            )*
        }

        impl $name {
            /// Subsystem identifier for this error type.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),*];

            /// Get numeric error code for debugging and for the guest-visible result.
            pub const fn code(&self) -> u16 {
                *self as u16
            }

            /// Get error description for logging.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $desc,)*
                }
            }

            /// Recover a variant from its numeric code.
            pub const fn from_code(code: u16) -> Option<Self> {
                let mut i = 0;
                while i < Self::ALL.len() {
                    if Self::ALL[i] as u16 == code {
                        return Some(Self::ALL[i]);
                    }
                    i += 1;
                }
                None
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "E{:04X}: {}", self.code(), self.name())
            }
        }

        impl core::error::Error for $name {}
    };
}
