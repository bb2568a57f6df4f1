//! ARM (armeabi-v7a) definitions for the foreign module.
//!
//! The module is always 32-bit ARM with Thumb-2 code, independent of the host
//! the loader itself is compiled for.

use elf::abi::*;

/// The ELF machine type the module must declare.
pub const EM_ARCH: u16 = EM_ARM;

/// No-op relocation.
pub const REL_NONE: u32 = R_ARM_NONE;
/// Relative relocation type - add base address to the stored addend.
pub const REL_RELATIVE: u32 = R_ARM_RELATIVE;
/// GOT entry relocation type - set GOT entry to symbol address.
pub const REL_GOT: u32 = R_ARM_GLOB_DAT;
/// Symbolic relocation type - add the symbol address to the stored addend.
pub const REL_SYMBOLIC: u32 = R_ARM_ABS32;
/// PLT jump slot relocation type - set PLT entry to symbol address.
pub const REL_JUMP_SLOT: u32 = R_ARM_JUMP_SLOT;

/// Returns a readable name for an ARM relocation type.
pub fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_ARM_NONE => "R_ARM_NONE",
        R_ARM_ABS32 => "R_ARM_ABS32",
        R_ARM_COPY => "R_ARM_COPY",
        R_ARM_GLOB_DAT => "R_ARM_GLOB_DAT",
        R_ARM_JUMP_SLOT => "R_ARM_JUMP_SLOT",
        R_ARM_RELATIVE => "R_ARM_RELATIVE",
        R_ARM_IRELATIVE => "R_ARM_IRELATIVE",
        R_ARM_TLS_DTPMOD32 => "R_ARM_TLS_DTPMOD32",
        R_ARM_TLS_DTPOFF32 => "R_ARM_TLS_DTPOFF32",
        R_ARM_TLS_TPOFF32 => "R_ARM_TLS_TPOFF32",
        _ => "UNKNOWN",
    }
}
