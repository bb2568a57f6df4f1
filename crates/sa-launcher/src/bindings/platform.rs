//! Platform services: screen queries, the Android log and neutralized imports.
use crate::state::HOST;
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};
use std::ffi::{CStr, c_char, c_int};

/// Chip id reported to the engine.
pub const SYSTEM_CHIP: c_int = 19;

/// Replaces the module's `OS_ScreenGetWidth`.
pub extern "C" fn screen_width() -> c_int {
    HOST.screen_size().0
}

/// Replaces the module's `OS_ScreenGetHeight`.
pub extern "C" fn screen_height() -> c_int {
    HOST.screen_size().1
}

extern "C" fn system_chip() -> c_int {
    SYSTEM_CHIP
}

fn lossy(s: *const c_char) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
}

/// The variadic arguments are ignored; the format string is logged as is.
unsafe extern "C" fn android_log_print(prio: c_int, tag: *const c_char, fmt: *const c_char) -> c_int {
    log::debug!("[{}:{prio}] {}", lossy(tag), lossy(fmt).trim_end());
    0
}

pub struct Platform;

impl BindingProvider for Platform {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        table.shim("__android_log_print", android_log_print as usize)?;
        table.native("OS_SystemChip", system_chip as usize)?;
        table.stub_all_safe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use so_loader::binding::{BindingKind, StubKind};

    #[test]
    fn screen_queries_follow_state() {
        let (width, height) = HOST.screen_size();
        assert_eq!(screen_width(), width);
        assert_eq!(screen_height(), height);
        assert_eq!(system_chip(), SYSTEM_CHIP);
    }

    #[test]
    fn log_shim_tolerates_null() {
        assert_eq!(unsafe { android_log_print(3, std::ptr::null(), c"hello %d\n".as_ptr()) }, 0);
    }

    #[test]
    fn neutralized_imports_get_their_stub() {
        let stubs = crate::stubs::stub_set();
        let mut table = BindingTable::new(stubs);
        table.register(&Platform).unwrap();
        let busy = table.get("IsProfileStatsBusy").unwrap();
        assert_eq!(busy.kind, BindingKind::Stub(StubKind::Ret1));
        assert_eq!(busy.address, stubs.ret1);
        assert_eq!(table.get("sigaction").unwrap().address, stubs.ret0);
    }
}
