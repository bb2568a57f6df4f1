//! Sources the module image can be read from.
//!
//! The loader only needs positioned reads: the header, the program header
//! table and the file contents of each loadable segment.

#[cfg(unix)]
pub use backend::ElfFile;
pub use backend::ElfBinary;
pub use traits::{ElfReader, IntoElfReader};

mod backend;
mod traits;
