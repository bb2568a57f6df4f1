use super::{ElfReader, IntoElfReader};
use crate::{Result, io_error};
use alloc::{
    string::{String, ToString},
    vec::Vec,
};

/// A module image backed by an in-memory byte slice.
///
/// Tests build synthetic modules in memory and load them through this type.
#[derive(Debug)]
pub struct ElfBinary<'bytes> {
    /// The name assigned to this image.
    name: String,
    /// The raw ELF data.
    bytes: &'bytes [u8],
}

impl<'bytes> ElfBinary<'bytes> {
    /// Creates a new memory-based image.
    ///
    /// # Examples
    /// ```rust
    /// use so_loader::input::ElfBinary;
    ///
    /// let data = &[]; // In practice, this would be the bytes of an ELF file
    /// let binary = ElfBinary::new("libGTASA.so", data);
    /// ```
    pub fn new(name: &str, bytes: &'bytes [u8]) -> Self {
        Self {
            name: name.to_string(),
            bytes,
        }
    }
}

impl<'bytes> ElfReader for ElfBinary<'bytes> {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| io_error("read offset out of bounds"))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// A module image backed by a file on the filesystem.
#[cfg(unix)]
pub struct ElfFile {
    /// The underlying OS-specific file handle.
    inner: crate::os::RawFile,
}

#[cfg(unix)]
impl ElfFile {
    /// Creates a new file-based image from an owned file descriptor.
    ///
    /// # Safety
    /// `raw_fd` must be a valid, open file descriptor owned by the returned
    /// value; it is closed on drop.
    pub unsafe fn from_owned_fd(path: &str, raw_fd: i32) -> Self {
        ElfFile {
            inner: crate::os::RawFile::from_owned_fd(path, raw_fd),
        }
    }

    /// Opens the file at `path`.
    ///
    /// The file is closed when the [`ElfFile`] is dropped, which the loader
    /// does as soon as every segment has been copied.
    pub fn from_path(path: impl AsRef<str>) -> Result<Self> {
        Ok(ElfFile {
            inner: crate::os::RawFile::from_path(path.as_ref())?,
        })
    }
}

#[cfg(unix)]
impl ElfReader for ElfFile {
    fn file_name(&self) -> &str {
        self.inner.file_name()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        self.inner.read(buf, offset)
    }
}

#[cfg(unix)]
impl<'a> IntoElfReader<'a> for &'a str {
    type Reader = ElfFile;

    fn into_reader(self) -> Result<Self::Reader> {
        ElfFile::from_path(self)
    }
}

#[cfg(unix)]
impl<'a> IntoElfReader<'a> for String {
    type Reader = ElfFile;

    fn into_reader(self) -> Result<Self::Reader> {
        ElfFile::from_path(&self)
    }
}

#[cfg(unix)]
impl<'a> IntoElfReader<'a> for ElfFile {
    type Reader = ElfFile;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}

impl<'a> IntoElfReader<'a> for &'a [u8] {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self))
    }
}

impl<'a> IntoElfReader<'a> for &'a Vec<u8> {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self.as_slice()))
    }
}

impl<'a, 'b> IntoElfReader<'a> for ElfBinary<'b>
where
    'b: 'a,
{
    type Reader = ElfBinary<'b>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}
