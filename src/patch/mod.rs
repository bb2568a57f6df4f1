//! Rewriting the code of a loaded module.
//!
//! Every primitive resolves its site against the module (an exported symbol,
//! or an offset from the text base), checks that the write falls inside the
//! mapping and records the range for the next [`PatchEngine::flush`].
//! Addresses with bit 0 set are Thumb code, as in the module's own symbols.
pub mod thumb;
pub mod trampoline;

use crate::{Module, Result, binding_error, missing_symbol};
use alloc::{format, vec::Vec};
use trampoline::{Resolved, Source, TrampolineSpec};

/// A location inside the module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Site {
    /// An exported symbol, Thumb bit as the symbol table has it.
    Symbol(&'static str),
    /// An offset from the text base. Set bit 0 for a Thumb site.
    Text(u32),
}

/// Where a hook or trampoline sends control, or a value to embed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Somewhere in the module itself.
    Site(Site),
    /// A host function or variable, translated with the module's
    /// [`crate::NativeAddressing`].
    Native { name: &'static str, addr: usize },
}

impl Target {
    /// A host function or variable.
    pub fn native(name: &'static str, addr: usize) -> Self {
        Target::Native { name, addr }
    }
}

/// Applies hooks, byte patches and trampolines to one module.
///
/// # Examples
/// ```no_run
/// use so_loader::{Loader, patch::{PatchEngine, Site, Target}};
///
/// # fn run() -> so_loader::Result<()> {
/// # let bytes = Vec::<u8>::new();
/// let mut module = Loader::new().load(bytes.as_slice())?;
/// let mut engine = PatchEngine::new(&mut module);
/// // Make the function at text + 0x3A152A (Thumb) jump to text + 0x3A1602.
/// engine.hook_address(&Site::Text(0x3A152A + 1), &Target::Site(Site::Text(0x3A1602 + 1)))?;
/// engine.nop_thumb(&Site::Text(0x4DDCCA), 10)?;
/// engine.flush();
/// # Ok(())
/// # }
/// ```
pub struct PatchEngine<'m> {
    module: &'m mut Module,
    trampolines: Vec<(&'static str, u32)>,
}

impl<'m> PatchEngine<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            trampolines: Vec::new(),
        }
    }

    #[inline]
    pub fn module(&self) -> &Module {
        self.module
    }

    /// Stubs built so far, by name and address.
    pub fn trampolines(&self) -> &[(&'static str, u32)] {
        &self.trampolines
    }

    /// Address of `site`, Thumb bit included.
    pub fn resolve_site(&self, site: &Site) -> Result<u32> {
        match *site {
            Site::Symbol(name) => self
                .module
                .symbol_address(name)
                .ok_or_else(|| missing_symbol(name)),
            Site::Text(offset) => Ok(self.module.text_base().wrapping_add(offset)),
        }
    }

    /// Address the bytes of `site` start at.
    ///
    /// Function symbols lose their Thumb bit; data symbols and text offsets
    /// are taken as they are.
    fn patch_address(&self, site: &Site) -> Result<u32> {
        let addr = self.resolve_site(site)?;
        Ok(match *site {
            Site::Symbol(name) if self.module.symbol(name).is_some_and(|sym| sym.is_func) => {
                addr & !1
            }
            _ => addr,
        })
    }

    /// Address the module should use for `target`.
    pub fn resolve_target(&mut self, target: &Target) -> Result<u32> {
        match *target {
            Target::Site(ref site) => self.resolve_site(site),
            Target::Native { name, addr } => {
                if addr == 0 && self.module.addressing().is_executable() {
                    return Err(binding_error(format!("{name} has a null address")));
                }
                self.module.native_address(name, addr)
            }
        }
    }

    /// Redirects `site` to `target`, picking the encoding from the site's Thumb bit.
    ///
    /// Returns the address that was hooked.
    pub fn hook_address(&mut self, site: &Site, target: &Target) -> Result<u32> {
        let addr = self.resolve_site(site)?;
        let dest = self.resolve_target(target)?;
        if addr & 1 != 0 {
            self.write_thumb_hook(addr, dest)
        } else {
            self.write_arm_hook(addr, dest)
        }
    }

    /// Redirects `site` with the Thumb encoding whatever its Thumb bit says.
    pub fn hook_thumb(&mut self, site: &Site, target: &Target) -> Result<u32> {
        let addr = self.resolve_site(site)?;
        let dest = self.resolve_target(target)?;
        self.write_thumb_hook(addr, dest)
    }

    /// Redirects `site` with the ARM encoding.
    pub fn hook_arm(&mut self, site: &Site, target: &Target) -> Result<u32> {
        let addr = self.resolve_site(site)?;
        let dest = self.resolve_target(target)?;
        self.write_arm_hook(addr, dest)
    }

    fn write_thumb_hook(&mut self, addr: u32, dest: u32) -> Result<u32> {
        let addr = addr & !1;
        let (bytes, len) = thumb::thumb_hook(addr, dest);
        self.module.memory_mut().write(addr, &bytes[..len])?;
        #[cfg(feature = "log")]
        log::trace!("[Hook] thumb 0x{:x} -> 0x{:x}", addr, dest);
        Ok(addr)
    }

    fn write_arm_hook(&mut self, addr: u32, dest: u32) -> Result<u32> {
        self.module.memory_mut().write(addr, &thumb::arm_hook(dest))?;
        #[cfg(feature = "log")]
        log::trace!("[Hook] arm 0x{:x} -> 0x{:x}", addr, dest);
        Ok(addr)
    }

    /// Overwrites the bytes at `site` with `bytes`, nothing more.
    pub fn patch_bytes(&mut self, site: &Site, bytes: &[u8]) -> Result<u32> {
        let addr = self.patch_address(site)?;
        self.module.memory_mut().write(addr, bytes)?;
        Ok(addr)
    }

    /// Writes `count` Thumb `nop`s at `site`.
    pub fn nop_thumb(&mut self, site: &Site, count: usize) -> Result<u32> {
        let bytes: Vec<u8> = core::iter::repeat_n(thumb::NOP.to_le_bytes(), count)
            .flatten()
            .collect();
        self.patch_bytes(site, &bytes)
    }

    pub fn write_u16(&mut self, site: &Site, value: u16) -> Result<u32> {
        self.patch_bytes(site, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, site: &Site, value: u32) -> Result<u32> {
        self.patch_bytes(site, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, site: &Site, value: u64) -> Result<u32> {
        self.patch_bytes(site, &value.to_le_bytes())
    }

    /// Stores `bytes` into the exported variable `name`.
    ///
    /// The write may not run past the size the symbol declares.
    pub fn write_data(&mut self, name: &'static str, bytes: &[u8]) -> Result<u32> {
        let sym = *self.module.symbol(name).ok_or_else(|| missing_symbol(name))?;
        let addr = self.module.memory().guest_addr(sym.offset as usize);
        if sym.is_func || (sym.size != 0 && bytes.len() > sym.size as usize) {
            return Err(crate::Error::PatchOutOfBounds {
                addr,
                len: bytes.len(),
            });
        }
        self.module.memory_mut().write(addr, bytes)?;
        Ok(addr)
    }

    /// Emits the stub described by `spec` into the patch area and hooks its site to it.
    ///
    /// Returns the stub's address with the Thumb bit set.
    pub fn build_trampoline(&mut self, spec: &TrampolineSpec) -> Result<u32> {
        spec.validate()?;
        let site = self.resolve_site(&spec.site)?;
        let resume = self.resolve_site(&spec.resume)?;
        let divert = spec
            .divert
            .as_ref()
            .map(|site| self.resolve_site(site))
            .transpose()?;
        let handler = spec
            .handler
            .as_ref()
            .map(|handler| self.resolve_target(handler))
            .transpose()?;
        let mut cells = Vec::new();
        for wb in &spec.writebacks {
            if let Source::Cell(cell) = &wb.source {
                cells.push(self.resolve_target(cell)?);
            }
        }
        let code = trampoline::assemble(
            spec,
            &Resolved {
                handler,
                resume,
                divert,
                cells,
            },
        )?;
        let memory = self.module.memory_mut();
        let stub = memory.alloc_patch(code.len(), 4)?;
        memory.write(stub, &code)?;
        let stub = stub | 1;
        if site & 1 != 0 {
            self.write_thumb_hook(site, stub)?;
        } else {
            self.write_arm_hook(site, stub)?;
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Trampoline] {}: 0x{:x} -> stub 0x{:x} ({} bytes) -> 0x{:x}",
            spec.name,
            site & !1,
            stub & !1,
            code.len(),
            resume
        );
        self.trampolines.push((spec.name, stub));
        Ok(stub)
    }

    /// Synchronizes instruction fetch with every patch so far.
    pub fn flush(&mut self) {
        self.module.flush();
    }
}

impl core::fmt::Display for Site {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Site::Symbol(name) => f.write_str(name),
            Site::Text(offset) => write!(f, "text+0x{offset:x}"),
        }
    }
}
