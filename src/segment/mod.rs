//! The memory mapping of the module
pub(crate) mod program;

use crate::{
    Error, Result,
    arch::flush_icache,
    mmap_error,
    os::ProtFlags,
    trampoline_error,
};
use alloc::vec::Vec;
use core::{ffi::c_void, fmt::Debug, ops::Range, ptr::NonNull};

pub const PAGE_SIZE: usize = 0x1000;
pub const MASK: usize = !(PAGE_SIZE - 1);

/// One PT_LOAD segment as mapped.
#[derive(Clone, Debug)]
pub struct SegmentInfo {
    /// `p_vaddr` of the segment.
    pub vaddr: u32,
    /// `p_memsz` of the segment.
    pub memsz: u32,
    /// Protection declared by `p_flags`, applied by [`ElfSegments::seal`].
    pub prot: ProtFlags,
}

impl SegmentInfo {
    fn page_range(&self) -> Range<usize> {
        rounddown(self.vaddr as usize, PAGE_SIZE)
            ..roundup(self.vaddr as usize + self.memsz as usize, PAGE_SIZE)
    }
}

/// The memory of the module: every loadable segment plus the patch area.
///
/// Offsets are relative to the start of the reservation, which is also the
/// image base (vaddr 0). The guest base is the address the module itself
/// sees for offset 0; it equals the host address whenever that fits in 32 bits.
pub struct ElfSegments {
    pub(crate) memory: NonNull<c_void>,
    pub(crate) len: usize,
    pub(crate) image_len: usize,
    pub(crate) guest_base: u32,
    pub(crate) segments: Vec<SegmentInfo>,
    patch_cursor: usize,
    dirty: Option<Range<usize>>,
    sealed: bool,
    pub(crate) munmap: unsafe fn(NonNull<c_void>, usize) -> Result<()>,
    pub(crate) mprotect: unsafe fn(NonNull<c_void>, usize, ProtFlags) -> Result<()>,
}

impl Debug for ElfSegments {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElfSegments")
            .field("memory", &self.memory)
            .field("guest_base", &format_args!("0x{:x}", self.guest_base))
            .field("len", &self.len)
            .field("image_len", &self.image_len)
            .finish()
    }
}

impl Drop for ElfSegments {
    fn drop(&mut self) {
        // Nothing useful can be done about a failed unmap at this point.
        let _ = unsafe { (self.munmap)(self.memory, self.len) };
    }
}

impl ElfSegments {
    pub(crate) fn new(
        memory: NonNull<c_void>,
        len: usize,
        image_len: usize,
        guest_base: u32,
        segments: Vec<SegmentInfo>,
        munmap: unsafe fn(NonNull<c_void>, usize) -> Result<()>,
        mprotect: unsafe fn(NonNull<c_void>, usize, ProtFlags) -> Result<()>,
    ) -> Self {
        ElfSegments {
            memory,
            len,
            image_len,
            guest_base,
            segments,
            patch_cursor: image_len,
            dirty: None,
            sealed: false,
            munmap,
            mprotect,
        }
    }

    /// Total length of the reservation, patch area included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Length of the part covered by PT_LOAD segments.
    #[inline]
    pub fn image_len(&self) -> usize {
        self.image_len
    }

    /// Host address of the image base.
    #[inline]
    pub fn base(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    /// Address of the image base as seen by the module.
    #[inline]
    pub fn guest_base(&self) -> u32 {
        self.guest_base
    }

    /// The guest address range of the patch area.
    pub fn patch_area(&self) -> Range<u32> {
        self.guest_addr(self.image_len)..self.guest_addr(self.len)
    }

    /// Bytes still free in the patch area.
    pub fn patch_area_free(&self) -> usize {
        self.len - self.patch_cursor
    }

    /// The mapped segments in program header order.
    #[inline]
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    /// Whether [`ElfSegments::seal`] has run.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Converts an offset from the image base into a guest address.
    #[inline]
    pub fn guest_addr(&self, offset: usize) -> u32 {
        self.guest_base.wrapping_add(offset as u32)
    }

    /// Converts a guest address range into an offset from the image base.
    ///
    /// Returns `None` unless all of `[addr, addr + len)` lies inside the mapping.
    #[inline]
    pub fn offset_of(&self, addr: u32, len: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.guest_base)? as usize;
        let end = offset.checked_add(len)?;
        (end <= self.len).then_some(offset)
    }

    /// Whether `addr` lies inside the mapping.
    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        self.offset_of(addr, 1).is_some()
    }

    /// The whole mapping as bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the reservation is committed for `len` bytes and lives as long as `self`.
        unsafe { core::slice::from_raw_parts(self.memory.as_ptr().cast::<u8>(), self.len) }
    }

    /// The bytes at `[addr, addr + len)`.
    pub fn read(&self, addr: u32, len: usize) -> Result<&[u8]> {
        let offset = self.offset_of(addr, len).ok_or(Error::PatchOutOfBounds { addr, len })?;
        Ok(&self.as_bytes()[offset..offset + len])
    }

    /// Reads the little-endian word at `addr`.
    pub fn read_u32(&self, addr: u32) -> Result<u32> {
        let bytes = self.read(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Host pointer for a guest address inside the mapping.
    #[inline]
    pub fn host_ptr(&self, addr: u32) -> Option<*mut u8> {
        let offset = self.offset_of(addr, 0)?;
        Some(unsafe { self.memory.as_ptr().cast::<u8>().add(offset) })
    }

    /// Copies `bytes` to `addr`.
    ///
    /// The write must fall entirely inside the mapping. The range is
    /// remembered so the next [`ElfSegments::flush`] covers it.
    pub fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        let offset = self.offset_of(addr, len).ok_or(Error::PatchOutOfBounds { addr, len })?;
        if self.sealed {
            return Err(mmap_error("module memory is sealed"));
        }
        // SAFETY: bounds checked above and the pages are writable until sealed.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.memory.as_ptr().cast::<u8>().add(offset),
                len,
            );
        }
        self.dirty = Some(match self.dirty.take() {
            Some(range) => range.start.min(offset)..range.end.max(offset + len),
            None => offset..offset + len,
        });
        #[cfg(feature = "log")]
        log::trace!("[Write] address: 0x{:x}, bytes: {:02x?}", addr, bytes);
        Ok(())
    }

    /// Writes a little-endian word to `addr`.
    #[inline]
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Takes `len` bytes aligned to `align` from the patch area.
    pub fn alloc_patch(&mut self, len: usize, align: usize) -> Result<u32> {
        let start = roundup(self.patch_cursor, align.max(1));
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.len)
            .ok_or_else(|| trampoline_error("patch area exhausted"))?;
        self.patch_cursor = end;
        Ok(self.guest_addr(start))
    }

    /// Synchronizes instruction fetch with every write since the last flush.
    pub fn flush(&mut self) {
        if let Some(range) = self.dirty.take() {
            #[cfg(feature = "log")]
            log::trace!(
                "[Flush] address: 0x{:x}, length: {}",
                self.guest_addr(range.start),
                range.len()
            );
            unsafe {
                flush_icache(
                    self.memory.as_ptr().cast::<u8>().add(range.start),
                    range.len(),
                )
            };
        }
    }

    /// Restores the protections the segments declare and makes the patch area read-execute.
    ///
    /// After sealing, writes through [`ElfSegments::write`] fail.
    pub fn seal(&mut self) -> Result<()> {
        self.flush();
        for segment in self.segments.iter() {
            let range = segment.page_range();
            self.protect(range, segment.prot)?;
        }
        if self.len > self.image_len {
            self.protect(
                self.image_len..self.len,
                ProtFlags::PROT_READ | ProtFlags::PROT_EXEC,
            )?;
        }
        self.sealed = true;
        Ok(())
    }

    fn protect(&self, range: Range<usize>, prot: ProtFlags) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[Mprotect] address: 0x{:x}, length: {}, prot: {:?}",
            self.guest_addr(range.start),
            range.len(),
            prot,
        );
        let ptr = unsafe { self.memory.byte_add(range.start) };
        unsafe { (self.mprotect)(ptr, range.len(), prot) }
    }
}

#[inline]
pub(crate) fn roundup(x: usize, align: usize) -> usize {
    if align == 0 {
        return x;
    }
    (x + align - 1) & !(align - 1)
}

#[inline]
pub(crate) fn rounddown(x: usize, align: usize) -> usize {
    x & !(align - 1)
}
