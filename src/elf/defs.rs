//! ELF32 format definitions.
//!
//! The foreign module is always a 32-bit little-endian ELF file, whatever the
//! pointer width of the host, so the records are spelled out here instead of
//! being selected by `target_pointer_width`.

use core::ops::Deref;
use elf::abi::{SHN_UNDEF, STB_GLOBAL, STB_GNU_UNIQUE, STB_LOCAL, STB_WEAK, STT_FUNC, STT_NOTYPE, STT_OBJECT};

use crate::arch::rel_type_to_str;

/// Valid symbol binding types bitmask for exported symbols.
const OK_BINDS: usize = 1 << STB_GLOBAL | 1 << STB_WEAK | 1 << STB_GNU_UNIQUE;

/// Valid symbol type bitmask for exported symbols.
const OK_TYPES: usize = 1 << STT_NOTYPE | 1 << STT_OBJECT | 1 << STT_FUNC;

pub(crate) const EHDR_SIZE: usize = core::mem::size_of::<Ehdr>();
pub(crate) const PHDR_SIZE: usize = core::mem::size_of::<Phdr>();
pub(crate) const DYN_SIZE: usize = core::mem::size_of::<Dyn>();
pub(crate) const REL_SIZE: usize = core::mem::size_of::<Rel>();
pub(crate) const SYM_SIZE: usize = core::mem::size_of::<Sym>();

/// Plain records that may be read from any correctly sized byte range.
///
/// # Safety
/// Implementors must be `repr(C)` and valid for every bit pattern.
pub(crate) unsafe trait Pod: Sized {}

/// Reads a record from `bytes` at `offset`, or `None` when it does not fit.
#[inline]
pub(crate) fn read_pod<T: Pod>(bytes: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(core::mem::size_of::<T>())?;
    let src = bytes.get(offset..end)?;
    // SAFETY: the range is in bounds and `T: Pod` accepts any bit pattern.
    Some(unsafe { core::ptr::read_unaligned(src.as_ptr().cast::<T>()) })
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Dyn {
    pub d_tag: i32,
    pub d_val: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Rel {
    pub r_offset: u32,
    pub r_info: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Sym {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

unsafe impl Pod for Ehdr {}
unsafe impl Pod for Phdr {}
unsafe impl Pod for Dyn {}
unsafe impl Pod for Rel {}
unsafe impl Pod for Sym {}
unsafe impl Pod for u32 {}

/// ELF REL relocation entry.
///
/// ARM shared objects carry implicit addends: the addend is the word already
/// stored at the relocation target.
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct ElfRel {
    rel: Rel,
}

impl ElfRel {
    pub(crate) fn new(rel: Rel) -> Self {
        Self { rel }
    }

    /// Returns the relocation type.
    #[inline]
    pub fn r_type(&self) -> u32 {
        self.rel.r_info & 0xff
    }

    /// Returns the symbol index.
    #[inline]
    pub fn r_symbol(&self) -> usize {
        (self.rel.r_info >> 8) as usize
    }

    /// Returns the relocation offset relative to the image base.
    #[inline]
    pub fn r_offset(&self) -> u32 {
        self.rel.r_offset
    }

    /// Return a human readable relocation type name
    #[inline]
    pub fn r_type_str(&self) -> &'static str {
        rel_type_to_str(self.r_type())
    }
}

/// ELF symbol table entry.
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct ElfSymbol {
    sym: Sym,
}

impl ElfSymbol {
    pub(crate) fn new(sym: Sym) -> Self {
        Self { sym }
    }

    /// Returns the symbol value.
    #[inline]
    pub fn st_value(&self) -> u32 {
        self.sym.st_value
    }

    /// Returns the symbol binding.
    #[inline]
    pub fn st_bind(&self) -> u8 {
        self.sym.st_info >> 4
    }

    /// Returns the symbol type.
    #[inline]
    pub fn st_type(&self) -> u8 {
        self.sym.st_info & 0xf
    }

    /// Returns the section index.
    #[inline]
    pub fn st_shndx(&self) -> usize {
        self.sym.st_shndx as usize
    }

    /// Returns the symbol name index.
    #[inline]
    pub fn st_name(&self) -> usize {
        self.sym.st_name as usize
    }

    /// Returns the symbol size.
    #[inline]
    pub fn st_size(&self) -> u32 {
        self.sym.st_size
    }

    /// Returns true if the symbol is undefined, i.e. an import of the module.
    #[inline]
    pub fn is_undef(&self) -> bool {
        self.st_shndx() == SHN_UNDEF as usize
    }

    /// Returns true if the symbol is visible to lookups by name.
    #[inline]
    pub fn is_exported(&self) -> bool {
        !self.is_undef()
            && (1 << self.st_bind()) & OK_BINDS != 0
            && (1 << self.st_type()) & OK_TYPES != 0
    }

    /// Returns true if the symbol has local binding.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.st_bind() == STB_LOCAL
    }

    /// Returns true if the symbol has weak binding.
    #[inline]
    pub fn is_weak(&self) -> bool {
        self.st_bind() == STB_WEAK
    }
}

/// ELF program header.
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct ElfPhdr {
    phdr: Phdr,
}

impl ElfPhdr {
    pub(crate) fn new(phdr: Phdr) -> Self {
        Self { phdr }
    }
}

impl Deref for ElfPhdr {
    type Target = Phdr;

    fn deref(&self) -> &Self::Target {
        &self.phdr
    }
}
