use crate::Result;

/// A trait for reading the module image from various sources.
///
/// `ElfReader` abstracts the underlying storage (memory, file system, etc.)
/// so the loader can read headers and segment contents uniformly.
pub trait ElfReader {
    /// Returns the full name or path of the module.
    fn file_name(&self) -> &str;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Reading past the end of the source is an error, never a short read.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Returns the short name of the module (the filename without the path).
    fn shortname(&self) -> &str {
        let name = self.file_name();
        name.rsplit('/').next().unwrap_or(name)
    }
}

/// A trait for converting various input sources into an `ElfReader`.
///
/// This lets [`crate::Loader::load`] take a path, a byte slice or an already
/// constructed reader.
pub trait IntoElfReader<'a> {
    /// The type of reader produced by this conversion.
    type Reader: ElfReader + 'a;

    /// Converts the input into an `ElfReader`.
    fn into_reader(self) -> Result<Self::Reader>;
}
