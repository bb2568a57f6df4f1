//! Writing binding addresses into the import slots of the module.
use crate::{
    Module, Result,
    binding::{BindingKind, BindingTable},
    binding_error,
    elf::Import,
    missing_symbol,
    relocate_error,
};
use alloc::{boxed::Box, format, string::String, vec::Vec};

/// What [`resolve`] bound each import to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolveReport {
    pub native: usize,
    pub shim: usize,
    pub state_cell: usize,
    /// Imports bound to a trivial stub, in import order.
    pub stubbed: Vec<Box<str>>,
    /// Slots written in total.
    pub slots: usize,
}

impl ResolveReport {
    /// Number of imports bound.
    pub fn bound(&self) -> usize {
        self.native + self.shim + self.state_cell + self.stubbed.len()
    }
}

/// Binds every import of `module` against `table`.
///
/// Imports are visited in first-reference order and the first name without a
/// table entry fails the whole call with [`crate::Error::MissingSymbol`]. A
/// weak import gets no special treatment: it must be bound like any other.
/// Stubbing is never implied by a miss; only entries registered through
/// [`BindingTable::stub`] bind to a stub.
///
/// Must run after [`crate::relocate`]. The written slots are flushed before
/// returning.
pub fn resolve(module: &mut Module, table: &BindingTable) -> Result<ResolveReport> {
    if !module.state.relocated {
        return Err(relocate_error("module must be relocated before binding"));
    }
    if module.state.resolved {
        return Err(binding_error("module imports are already bound"));
    }
    let imports = core::mem::take(&mut module.imports);
    let result = bind_all(module, &imports, table);
    module.imports = imports;
    let report = result?;
    module.memory_mut().flush();
    module.state.resolved = true;

    #[cfg(feature = "log")]
    log::debug!(
        "[{}] bound {} imports ({} native, {} shim, {} state cells, {} stubbed) into {} slots",
        module.name(),
        report.bound(),
        report.native,
        report.shim,
        report.state_cell,
        report.stubbed.len(),
        report.slots
    );
    Ok(report)
}

fn bind_all(module: &mut Module, imports: &[Import], table: &BindingTable) -> Result<ResolveReport> {
    let mut report = ResolveReport::default();
    for import in imports {
        let name = &*import.name;
        let binding = table
            .get(name)
            .ok_or_else(|| missing_symbol(String::from(name)))?;
        // Only a module that will run needs real addresses; placeholder
        // addressing gives null entries a synthetic address of their own.
        if binding.address == 0 && module.addressing().is_executable() {
            return Err(binding_error(format!("{name} is bound to a null address")));
        }
        let value = module.native_address(name, binding.address)?;
        let memory = module.memory_mut();
        for slot in &import.slots {
            let word = if slot.add_addend {
                value.wrapping_add(slot.addend)
            } else {
                value
            };
            memory.write_u32(memory.guest_addr(slot.offset as usize), word)?;
        }
        report.slots += import.slots.len();
        match binding.kind {
            BindingKind::Native => report.native += 1,
            BindingKind::Shim => report.shim += 1,
            BindingKind::StateCell => report.state_cell += 1,
            BindingKind::Stub(_) => report.stubbed.push(import.name.clone()),
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[Binding] {} -> 0x{:x} ({:?}), {} slots",
            name,
            value,
            binding.kind,
            import.slots.len()
        );
    }
    Ok(report)
}
