use crate::{
    Result,
    elf::ElfPhdr,
    input::ElfReader,
    malformed_error, mmap_error,
    os::{Mmap, ProtFlags},
    segment::{ElfSegments, PAGE_SIZE, SegmentInfo, roundup},
};
use alloc::vec::Vec;
use elf::abi::{PF_R, PF_W, PF_X, PT_LOAD};

/// Convert ELF program header flags to memory protection flags
#[inline]
fn segment_prot(p_flag: u32) -> ProtFlags {
    // PF_X (execute) -> PROT_EXEC (bit 2)
    // PF_W (write)   -> PROT_WRITE (bit 1)
    // PF_R (read)    -> PROT_READ (bit 0)
    ProtFlags::from_bits_retain(((p_flag & PF_X) << 2 | p_flag & PF_W | (p_flag & PF_R) >> 2) as _)
}

/// Manages segments parsed from ELF program headers
pub(crate) struct ProgramSegments<'phdr> {
    phdrs: &'phdr [ElfPhdr],
}

impl<'phdr> ProgramSegments<'phdr> {
    pub(crate) fn new(phdrs: &'phdr [ElfPhdr]) -> Self {
        Self { phdrs }
    }

    /// Checks every PT_LOAD and returns the page-aligned end of the image.
    fn image_len(&self) -> Result<usize> {
        let mut max_vaddr = 0usize;
        let mut loads = 0;
        for phdr in self.phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
            loads += 1;
            if phdr.p_filesz > phdr.p_memsz {
                return Err(malformed_error("PT_LOAD file size exceeds its memory size"));
            }
            let end = phdr
                .p_vaddr
                .checked_add(phdr.p_memsz)
                .ok_or_else(|| malformed_error("PT_LOAD overflows the address space"))?;
            if phdr.p_offset.checked_add(phdr.p_filesz).is_none() {
                return Err(malformed_error("PT_LOAD file range overflows"));
            }
            max_vaddr = max_vaddr.max(end as usize);
        }
        if loads == 0 {
            return Err(malformed_error("no PT_LOAD segment"));
        }
        Ok(roundup(max_vaddr, PAGE_SIZE))
    }

    /// Reserves the module memory and copies each segment's file contents.
    ///
    /// The reservation starts at vaddr 0 and is followed by `patch_area`
    /// bytes. All of it stays writable and executable until sealed; the
    /// zero-fill part of every segment is zero because the reservation is.
    pub(crate) fn load_segments<M: Mmap>(
        &self,
        reader: &mut impl ElfReader,
        requested_base: u32,
        patch_area: usize,
    ) -> Result<ElfSegments> {
        let image_len = self.image_len()?;
        let len = image_len + roundup(patch_area, PAGE_SIZE);
        let memory =
            unsafe { M::mmap_reserve(Some(requested_base as usize), len, ProtFlags::UNRESTRICTED) }?;
        let host = memory.as_ptr() as usize;
        let guest_base = if fits_u32(host, len) {
            host as u32
        } else if fits_u32(requested_base as usize, len) {
            requested_base
        } else {
            let _ = unsafe { M::munmap(memory, len) };
            return Err(mmap_error("the module does not fit in a 32-bit address space"));
        };
        #[cfg(feature = "log")]
        log::trace!(
            "[Mmap] host: 0x{:x}, guest: 0x{:x}, length: {}, patch area: {}",
            host,
            guest_base,
            len,
            len - image_len
        );

        // Owning the reservation first unmaps it again if a read fails.
        let mut space = ElfSegments::new(
            memory,
            len,
            image_len,
            guest_base,
            Vec::new(),
            M::munmap,
            M::mprotect,
        );
        for phdr in self.phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
            let start = phdr.p_vaddr as usize;
            let filesz = phdr.p_filesz as usize;
            // SAFETY: `image_len` covers every PT_LOAD, checked above.
            let dest = unsafe {
                core::slice::from_raw_parts_mut(memory.as_ptr().cast::<u8>().add(start), filesz)
            };
            reader
                .read(dest, phdr.p_offset as usize)
                .map_err(|_| malformed_error("PT_LOAD file contents lie past the end of the file"))?;
            let info = SegmentInfo {
                vaddr: phdr.p_vaddr,
                memsz: phdr.p_memsz,
                prot: segment_prot(phdr.p_flags),
            };
            #[cfg(feature = "log")]
            log::trace!(
                "[Segment] address: 0x{:x}, filesz: {}, memsz: {}, prot: {:?}",
                guest_base.wrapping_add(phdr.p_vaddr),
                phdr.p_filesz,
                phdr.p_memsz,
                info.prot
            );
            space.segments.push(info);
        }
        Ok(space)
    }
}

#[inline]
fn fits_u32(addr: usize, len: usize) -> bool {
    (addr as u64).saturating_add(len as u64) <= u32::MAX as u64 + 1
}
