//! # so_loader
//! Loads one foreign ELF32 ARM shared object into the current process, binds its
//! imports against a host-supplied table and rewrites parts of its code after load.
//! ## Usage
//! The crate implements the fixed bring-up sequence of a compatibility loader:
//! map the image, relocate it, bind every import, run its initializers, apply an
//! ordered patch catalog and hand control to the module. The process-specific
//! pieces (binding providers, catalog contents, configuration) live in the
//! `sa-launcher` workspace member.
//! ## Example
//! ```no_run
//! use so_loader::{Loader, binding::{BindingTable, StubSet}, input::ElfFile};
//!
//! let mut table = BindingTable::new(StubSet::new(0x1001, 0x1011));
//! table.native("malloc", 0x2001).unwrap();
//! let file = ElfFile::from_path("libGTASA.so").unwrap();
//! let mut module = Loader::new().with_base(0x9800_0000).load(file).unwrap();
//! so_loader::relocate(&mut module).unwrap();
//! so_loader::resolve(&mut module, &table).unwrap();
//! ```
#![no_std]
extern crate alloc;

pub mod arch;
pub mod binding;
pub mod catalog;
pub mod elf;
mod error;
pub mod input;
mod loader;
mod module;
pub mod os;
pub mod patch;
mod relocation;
mod resolve;
pub mod segment;

pub use error::*;
pub use loader::{DEFAULT_BASE, DEFAULT_PATCH_AREA, Loader};
pub use module::{Module, NativeAddressing};
pub use relocation::{RelocationReport, relocate};
pub use resolve::{ResolveReport, resolve};

/// The result type used throughout the loader.
pub type Result<T> = core::result::Result<T, Error>;
