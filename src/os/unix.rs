use crate::{
    Error, Result, io_error,
    input::ElfReader,
    os::{Mmap, ProtFlags},
};
use alloc::{
    ffi::CString,
    string::{String, ToString},
};
use core::{ffi::c_void, ptr::NonNull};
use libc::{MAP_ANONYMOUS, MAP_PRIVATE, O_RDONLY, SEEK_SET, mmap, mprotect, munmap};

/// An implementation of Mmap trait
pub struct DefaultMmap;

pub(crate) struct RawFile {
    name: String,
    fd: i32,
}

impl Mmap for DefaultMmap {
    unsafe fn mmap_reserve(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
    ) -> Result<NonNull<c_void>> {
        let ptr = unsafe {
            mmap(
                addr.unwrap_or(0) as _,
                len,
                prot.bits(),
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if core::ptr::eq(ptr, libc::MAP_FAILED) {
            return Err(map_error("mmap failed"));
        }
        NonNull::new(ptr).ok_or_else(|| map_error("mmap returned null"))
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        let res = unsafe { munmap(addr.as_ptr(), len) };
        if res != 0 {
            return Err(map_error("munmap failed"));
        }
        Ok(())
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        let res = unsafe { mprotect(addr.as_ptr(), len, prot.bits()) };
        if res != 0 {
            return Err(map_error("mprotect failed"));
        }
        Ok(())
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl RawFile {
    pub(crate) fn from_path(path: &str) -> Result<Self> {
        let name = CString::new(path).map_err(|_| io_error("path contains a NUL byte"))?;
        let fd = unsafe { libc::open(name.as_ptr(), O_RDONLY) };
        if fd == -1 {
            return Err(io_error(alloc::format!("cannot open {path}")));
        }
        Ok(Self {
            name: path.to_string(),
            fd,
        })
    }

    pub(crate) fn from_owned_fd(path: &str, raw_fd: i32) -> Self {
        Self {
            name: path.to_string(),
            fd: raw_fd,
        }
    }
}

fn lseek(fd: i32, offset: usize) -> Result<()> {
    let off = unsafe { libc::lseek(fd, offset as _, SEEK_SET) };
    if off == -1 || off as usize != offset {
        return Err(io_error("lseek failed"));
    }
    Ok(())
}

fn read_exact(fd: i32, mut bytes: &mut [u8]) -> Result<()> {
    while !bytes.is_empty() {
        let result = unsafe { libc::read(fd, bytes.as_mut_ptr().cast(), bytes.len()) };
        if result < 0 {
            return Err(io_error("read error"));
        } else if result == 0 {
            return Err(io_error("unexpected end of file"));
        }
        bytes = &mut bytes[result as usize..];
    }
    Ok(())
}

impl ElfReader for RawFile {
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        lseek(self.fd, offset)?;
        read_exact(self.fd, buf)
    }

    fn file_name(&self) -> &str {
        &self.name
    }
}

#[cold]
#[inline(never)]
fn map_error(msg: &str) -> Error {
    Error::Mmap {
        msg: msg.to_string().into(),
    }
}
