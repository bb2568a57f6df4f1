//! Host memory and file primitives.
mod heap;
mod traits;

pub use heap::HeapMmap;
pub use traits::{Mmap, ProtFlags};

cfg_if::cfg_if! {
    if #[cfg(unix)]{
        pub(crate) mod unix;
        pub use unix::DefaultMmap;
        pub(crate) use unix::RawFile;
    } else {
        /// The mapping backend used when the host has no `mmap`.
        pub type DefaultMmap = HeapMmap;
    }
}
