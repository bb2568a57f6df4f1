//! ELF32 data structures used to parse the foreign module.

mod defs;
mod dynamic;
mod ehdr;
mod symbol;

pub(crate) use defs::*;
pub(crate) use ehdr::ElfHeader;
pub(crate) use symbol::{ElfStringTable, SymbolTable};

pub use defs::{ElfPhdr, ElfRel, ElfSymbol};
pub use dynamic::ElfDynamic;
pub use symbol::{ExportedSymbol, Import, ImportSlot, SymbolIndex};
/// ELF ABI constants and definitions from the elf crate.
pub use elf::abi::*;
