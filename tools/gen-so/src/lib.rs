//! `gen-so` writes small ELF32 ARM shared objects for exercising the loader:
//! Thumb and ARM functions, exported data, imports with GOT and PLT slots,
//! initializers, and SysV or GNU symbol hashes.

mod common;
mod hash;
mod writer;

pub use common::{HashStyle, InitEntry, RelocEntry, RelocPlace, SymbolDesc, SymbolScope, SymbolType};
pub use writer::{SoOutput, SoWriter, SoWriterConfig};
