use crate::{
    Result, mmap_error,
    os::{Mmap, ProtFlags},
    segment::PAGE_SIZE,
};
use alloc::alloc::{alloc_zeroed, dealloc};
use core::{alloc::Layout, ffi::c_void, ptr::NonNull};

/// A mapping backend on top of the global allocator.
///
/// The address hint is ignored and protections are not enforced, so the
/// memory can be written at any time. Hosts without `mmap` use it as their
/// default, and it is handy for inspecting a module that will never run.
pub struct HeapMmap;

impl Mmap for HeapMmap {
    unsafe fn mmap_reserve(
        _addr: Option<usize>,
        len: usize,
        _prot: ProtFlags,
    ) -> Result<NonNull<c_void>> {
        let layout = Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|_| mmap_error("reservation size overflows"))?;
        if layout.size() == 0 {
            return Err(mmap_error("empty reservation"));
        }
        let memory = unsafe { alloc_zeroed(layout) };
        NonNull::new(memory.cast()).ok_or_else(|| mmap_error("out of memory"))
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        let layout = Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|_| mmap_error("reservation size overflows"))?;
        unsafe { dealloc(addr.as_ptr().cast(), layout) };
        Ok(())
    }

    unsafe fn mprotect(_addr: NonNull<c_void>, _len: usize, _prot: ProtFlags) -> Result<()> {
        Ok(())
    }
}
