use crate::Result;
use bitflags::bitflags;
use core::{
    ffi::{c_int, c_void},
    ptr::NonNull,
};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Memory protection flags for controlling access permissions.
    ///
    /// These flags determine what operations can be performed on a mapped memory region.
    /// They can be combined using bitwise OR operations.
    pub struct ProtFlags: c_int {
        /// No access allowed.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

impl ProtFlags {
    /// The protection used while the module is being loaded and patched.
    ///
    /// Relocation and the patch catalog write into code pages that may already
    /// be executing initializers, so every page stays writable and executable
    /// until [`crate::segment::ElfSegments::seal`].
    pub const UNRESTRICTED: ProtFlags = ProtFlags::PROT_READ
        .union(ProtFlags::PROT_WRITE)
        .union(ProtFlags::PROT_EXEC);
}

/// A trait for the low-level memory operations the loader needs.
///
/// The module is always copied into one anonymous reservation, so unlike a
/// general dynamic linker there is no file-backed mapping here.
///
/// # Example
/// ```rust,ignore
/// struct MyMmap;
///
/// impl Mmap for MyMmap {
///     unsafe fn mmap_reserve(
///         addr: Option<usize>,
///         len: usize,
///         prot: ProtFlags,
///     ) -> Result<NonNull<c_void>> {
///         // Platform-specific implementation
///         todo!()
///     }
///
///     // Implement other required methods...
/// }
/// ```
pub trait Mmap {
    /// Reserves and commits `len` zeroed bytes.
    ///
    /// # Arguments
    /// * `addr` - Preferred starting address. It is a hint: the implementation
    ///   may place the region elsewhere.
    /// * `len` - Size of the region in bytes, a multiple of the page size.
    /// * `prot` - Initial memory protection flags.
    ///
    /// # Safety
    /// Manipulates the address space of the process.
    unsafe fn mmap_reserve(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
    ) -> Result<NonNull<c_void>>;

    /// Releases a region returned by [`Mmap::mmap_reserve`].
    ///
    /// # Safety
    /// `addr` and `len` must match the original reservation and the region
    /// must not be accessed afterwards.
    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()>;

    /// Changes the protection of a page-aligned part of a reservation.
    ///
    /// # Safety
    /// Removing execute permission from code that is running crashes the process.
    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()>;
}
