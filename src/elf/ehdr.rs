//! ELF header parsing and validation
//!
//! The loader accepts exactly one kind of image: a little-endian ELF32 ARM
//! shared object. Everything else is rejected before any memory is reserved.

use crate::{
    Result,
    arch::EM_ARCH,
    elf::{EHDR_SIZE, Ehdr, PHDR_SIZE, read_pod},
    malformed_error,
};
use core::ops::Deref;
use elf::abi::{EI_CLASS, EI_DATA, EI_VERSION, ELFCLASS32, ELFDATA2LSB, ELFMAGIC, ET_DYN, EV_CURRENT};

/// A validated ELF header.
#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct ElfHeader {
    /// The underlying ELF header structure
    ehdr: Ehdr,
}

impl Deref for ElfHeader {
    type Target = Ehdr;

    fn deref(&self) -> &Self::Target {
        &self.ehdr
    }
}

impl ElfHeader {
    /// Parses and validates an ELF header from the start of `data`.
    ///
    /// # Returns
    /// * `Ok(ElfHeader)` - The header describes a module this loader can map.
    /// * `Err(Error::MalformedImage)` - Naming the first check that failed.
    pub(crate) fn new(data: &[u8]) -> Result<Self> {
        let ehdr: Ehdr =
            read_pod(data, 0).ok_or_else(|| malformed_error("truncated ELF header"))?;
        let header = ElfHeader { ehdr };
        header.validate()?;
        Ok(header)
    }

    /// Validates the ELF header
    ///
    /// This method performs several validation checks on the ELF header:
    /// 1. Checks the ELF magic bytes
    /// 2. Verifies the file is ELF32 little endian
    /// 3. Ensures the ELF version is current
    /// 4. Confirms the machine is ARM and the file is a shared object
    /// 5. Checks the program header entry size
    pub(crate) fn validate(&self) -> Result<()> {
        if self.e_ident[0..4] != ELFMAGIC {
            return Err(malformed_error("invalid ELF magic"));
        }

        if self.e_ident[EI_CLASS] != ELFCLASS32 {
            return Err(malformed_error("file class mismatch: expected ELF32"));
        }

        if self.e_ident[EI_DATA] != ELFDATA2LSB {
            return Err(malformed_error("byte order mismatch: expected little endian"));
        }

        if self.e_ident[EI_VERSION] != EV_CURRENT {
            return Err(malformed_error("invalid ELF version"));
        }

        if self.e_machine != EM_ARCH {
            return Err(malformed_error("file arch mismatch: expected ARM"));
        }

        if self.e_type != ET_DYN {
            return Err(malformed_error("not a shared object"));
        }

        if self.e_phnum != 0 && self.e_phentsize as usize != PHDR_SIZE {
            return Err(malformed_error("unexpected program header entry size"));
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn e_phnum(&self) -> usize {
        self.ehdr.e_phnum as usize
    }

    #[inline]
    pub(crate) fn e_phoff(&self) -> usize {
        self.ehdr.e_phoff as usize
    }

    /// Calculates the byte range of the program header table
    ///
    /// # Returns
    /// A tuple containing:
    /// 1. The start offset of the program header table
    /// 2. The end offset of the program header table
    #[inline]
    pub(crate) fn phdr_range(&self) -> (usize, usize) {
        let phdr_start = self.e_phoff();
        let phdr_end = phdr_start + PHDR_SIZE * self.e_phnum();
        (phdr_start, phdr_end)
    }

    /// Size of the header itself, as read from the file.
    #[inline]
    pub(crate) const fn size() -> usize {
        EHDR_SIZE
    }
}
