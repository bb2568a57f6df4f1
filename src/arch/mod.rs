//! Foreign architecture definitions and host cache maintenance.
mod arm;

pub use arm::*;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", unix))]{
        unsafe extern "C" {
            fn __clear_cache(start: *mut core::ffi::c_char, end: *mut core::ffi::c_char);
        }

        /// Makes instruction fetches observe earlier data writes in `[start, start + len)`.
        ///
        /// # Safety
        /// The range must be mapped.
        #[inline]
        pub unsafe fn flush_icache(start: *mut u8, len: usize) {
            unsafe { __clear_cache(start.cast(), start.add(len).cast()) };
        }
    } else {
        /// Makes instruction fetches observe earlier data writes in `[start, start + len)`.
        ///
        /// Hosts that never execute the module only need the writes ordered.
        ///
        /// # Safety
        /// The range must be mapped.
        #[inline]
        pub unsafe fn flush_icache(_start: *mut u8, _len: usize) {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}
