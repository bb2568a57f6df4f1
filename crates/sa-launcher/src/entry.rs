//! Calls into the module.
//!
//! Only an ARM host can execute the module; everywhere else these steps are
//! reported and skipped.
use anyhow::{Context, Result};
use so_loader::Module;

/// Export called last, with the stand-in `JavaVM`.
pub const DEFAULT_ENTRY: &str = "JNI_OnLoad";

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        use crate::state::HOST;
        use std::ffi::c_void;

        type Initializer = extern "C" fn();
        type JniOnLoad = extern "C" fn(*mut c_void, *mut c_void) -> i32;

        /// Runs DT_INIT and DT_INIT_ARRAY in order.
        pub fn run_initializers(module: &Module) -> Result<usize> {
            let inits = module.initializers()?;
            for &init in &inits {
                log::debug!("initializer 0x{init:x}");
                // SAFETY: guest and host addresses coincide on arm and the module is relocated and bound.
                let func: Initializer = unsafe { std::mem::transmute(init as usize) };
                func();
            }
            Ok(inits.len())
        }

        /// Transfers control to `export`.
        pub fn call_entry(module: &Module, export: &str) -> Result<i32> {
            let addr = module
                .symbol_address(export)
                .with_context(|| format!("module does not export {export}"))?;
            log::info!("entering {export} at 0x{addr:x}");
            // SAFETY: same as for initializers; the export has the JNI_OnLoad signature.
            let func: JniOnLoad = unsafe { std::mem::transmute(addr as usize) };
            Ok(func(HOST.java_vm.as_ptr().cast(), std::ptr::null_mut()))
        }
    } else {
        pub fn run_initializers(module: &Module) -> Result<usize> {
            let inits = module.initializers()?;
            log::warn!("not an ARM host, skipping {} initializers", inits.len());
            Ok(0)
        }

        pub fn call_entry(module: &Module, export: &str) -> Result<i32> {
            let addr = module
                .symbol_address(export)
                .with_context(|| format!("module does not export {export}"))?;
            anyhow::bail!("cannot execute {export} at 0x{addr:x} on this host")
        }
    }
}
