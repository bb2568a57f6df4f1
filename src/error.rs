use alloc::borrow::Cow;
use core::fmt::{Debug, Display};

/// Error types used throughout the `so_loader` library.
///
/// Every variant is fatal for the load: the process runs exactly one foreign
/// module and has no degraded mode when that module cannot be brought up.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening or reading the module image.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// An error occurred during memory mapping operations.
    ///
    /// This error typically indicates issues such as:
    /// * Failed to reserve the module address range
    /// * Failed to change memory protection
    /// * Failed to unmap memory regions
    Mmap {
        /// A descriptive message about the memory mapping error.
        msg: Cow<'static, str>,
    },

    /// The image is not an ELF32 ARM shared object, or one of its headers
    /// points outside the file or the mapped image.
    MalformedImage {
        /// The check that failed.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the dynamic section.
    ParseDynamic {
        /// A descriptive message about the dynamic section parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while applying a relocation record.
    ///
    /// This covers targets outside the mapped image and unsupported
    /// relocation kinds.
    Relocation {
        /// A descriptive message about the relocation error.
        msg: Cow<'static, str>,
    },

    /// An import of the module has no entry in the binding table.
    MissingSymbol {
        /// The exact name of the unresolved import.
        name: Cow<'static, str>,
    },

    /// The binding table already holds an entry with this name.
    DuplicateBinding {
        /// The name that was registered twice.
        name: Cow<'static, str>,
    },

    /// A binding exists but cannot be written into the module.
    Binding {
        /// A descriptive message naming the binding.
        msg: Cow<'static, str>,
    },

    /// A patch write does not fall entirely inside the module mapping.
    PatchOutOfBounds {
        /// Guest address of the write.
        addr: u32,
        /// Length of the write in bytes.
        len: usize,
    },

    /// A trampoline description cannot be turned into a stub.
    Trampoline {
        /// A descriptive message about the rejected description.
        msg: Cow<'static, str>,
    },

    /// An error occurred in a user-defined callback or handler.
    Custom {
        /// A descriptive message about the custom error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Mmap { msg } => write!(f, "Memory mapping error: {msg}"),
            Error::MalformedImage { msg } => write!(f, "Malformed image: {msg}"),
            Error::ParseDynamic { msg } => write!(f, "Dynamic section parsing error: {msg}"),
            Error::Relocation { msg } => write!(f, "Relocation error: {msg}"),
            Error::MissingSymbol { name } => write!(f, "Missing symbol: {name}"),
            Error::DuplicateBinding { name } => write!(f, "Duplicate binding: {name}"),
            Error::Binding { msg } => write!(f, "Binding error: {msg}"),
            Error::PatchOutOfBounds { addr, len } => write!(
                f,
                "Patch out of bounds: {len} bytes at 0x{addr:x} are outside the module"
            ),
            Error::Trampoline { msg } => write!(f, "Trampoline error: {msg}"),
            Error::Custom { msg } => write!(f, "Custom error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

/// Creates an I/O error with the specified message.
#[cold]
#[inline(never)]
#[allow(unused)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

/// Creates a memory mapping error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn mmap_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Mmap { msg: msg.into() }
}

/// Creates a malformed image error with the specified message.
///
/// # Arguments
/// * `msg` - The check that failed.
///
/// # Returns
/// An `Error::MalformedImage` variant with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn malformed_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::MalformedImage { msg: msg.into() }
}

/// Creates a dynamic section parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_dynamic_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseDynamic { msg: msg.into() }
}

/// Creates a relocation error with the specified message.
///
/// # Arguments
/// * `msg` - The error message.
///
/// # Returns
/// An `Error::Relocation` variant with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn relocate_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Relocation { msg: msg.into() }
}

/// Creates a missing symbol error for the named import.
#[cold]
#[inline(never)]
pub(crate) fn missing_symbol(name: impl Into<Cow<'static, str>>) -> Error {
    Error::MissingSymbol { name: name.into() }
}

/// Creates a binding error for a rejected binding table entry.
#[cold]
#[inline(never)]
pub(crate) fn binding_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Binding { msg: msg.into() }
}

/// Creates an error for a trampoline that cannot be built.
#[cold]
#[inline(never)]
pub(crate) fn trampoline_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Trampoline { msg: msg.into() }
}

/// Creates a custom error with the specified message.
///
/// Binding providers and catalog gates use this to report their own failures
/// through the loader's error type.
#[cold]
#[inline(never)]
pub fn custom_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Custom { msg: msg.into() }
}
