//! File streams of the foreign C library.
//!
//! Streams the module opens are host `FILE`s. Only `stat` needs an adapter:
//! the module reads the modification time from its own `struct stat` layout.
use crate::state::{HOST, cell_address};
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};
use std::ffi::{c_char, c_int};
use std::sync::atomic::Ordering;

/// Offset of `st_mtime` in the foreign `struct stat`.
const FOREIGN_STAT_MTIME: usize = 0x50;

unsafe extern "C" fn stat(path: *const c_char, buf: *mut u8) -> c_int {
    let mut st = unsafe { std::mem::zeroed::<libc::stat>() };
    let res = unsafe { libc::stat(path, &mut st) };
    if res == 0 {
        unsafe {
            buf.add(FOREIGN_STAT_MTIME)
                .cast::<i32>()
                .write_unaligned(st.st_mtime as i32)
        };
    }
    res
}

/// Opens the host `FILE` the module's `stderr` points at.
pub fn open_stderr() -> anyhow::Result<()> {
    let file = unsafe { libc::fdopen(libc::STDERR_FILENO, c"w".as_ptr()) };
    anyhow::ensure!(!file.is_null(), "cannot open stderr as a stream");
    HOST.stderr.store(file as usize, Ordering::Relaxed);
    Ok(())
}

pub struct Streams;

impl BindingProvider for Streams {
    fn name(&self) -> &'static str {
        "streams"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        let natives = [
            ("fopen", libc::fopen as usize),
            ("fclose", libc::fclose as usize),
            ("fread", libc::fread as usize),
            ("fwrite", libc::fwrite as usize),
            ("fseek", libc::fseek as usize),
            ("ftell", libc::ftell as usize),
            ("feof", libc::feof as usize),
            ("ferror", libc::ferror as usize),
            ("fprintf", libc::fprintf as usize),
            ("fputc", libc::fputc as usize),
        ];
        for (name, addr) in natives {
            table.native(name, addr)?;
        }
        table.shim("stat", stat as usize)?;
        table.state_cell("__sF", HOST.streams.address())?;
        table.state_cell("stderr", cell_address(&HOST.stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use so_loader::binding::BindingKind;

    #[test]
    fn stat_writes_foreign_mtime() {
        let mut buf = [0u8; 0x68];
        let path = c"/";
        let mut st = unsafe { std::mem::zeroed::<libc::stat>() };
        assert_eq!(unsafe { libc::stat(path.as_ptr(), &mut st) }, 0);

        assert_eq!(unsafe { stat(path.as_ptr(), buf.as_mut_ptr()) }, 0);
        let mtime = i32::from_le_bytes(buf[FOREIGN_STAT_MTIME..FOREIGN_STAT_MTIME + 4].try_into().unwrap());
        assert_eq!(mtime, st.st_mtime as i32);
    }

    #[test]
    fn stat_leaves_buffer_alone_on_failure() {
        let mut buf = [0xAAu8; 0x68];
        let res = unsafe { stat(c"/definitely/not/here".as_ptr(), buf.as_mut_ptr()) };
        assert_eq!(res, -1);
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn stream_cells_point_at_host_state() {
        let mut table = BindingTable::new(crate::stubs::stub_set());
        table.register(&Streams).unwrap();
        let sf = table.get("__sF").unwrap();
        assert_eq!(sf.kind, BindingKind::StateCell);
        assert_eq!(sf.address, HOST.streams.address());
        assert_eq!(table.get("stderr").unwrap().address, cell_address(&HOST.stderr));
        assert_eq!(table.get("stat").unwrap().kind, BindingKind::Shim);
    }
}
