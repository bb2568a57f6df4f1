//! Applying the REL relocation tables of the module.
use crate::{
    Module, Result,
    arch::{REL_GOT, REL_JUMP_SLOT, REL_NONE, REL_RELATIVE, REL_SYMBOLIC},
    elf::{ElfRel, Import, ImportSlot, REL_SIZE, Rel, SymbolTable, read_pod},
    relocate_error,
};
use alloc::{boxed::Box, format, vec::Vec};
use core::ops::Range;
use hashbrown::HashMap;

/// Counts of what [`relocate`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelocationReport {
    /// `R_ARM_RELATIVE` records applied.
    pub relative: usize,
    /// Symbol-relative records resolved inside the module.
    pub symbolic: usize,
    /// Slots left for the resolver.
    pub import_slots: usize,
    /// Distinct imported names.
    pub imports: usize,
    /// `R_ARM_NONE` records.
    pub skipped: usize,
}

/// One word to write, computed while the tables are still borrowed.
struct Fixup {
    offset: u32,
    value: u32,
}

/// Applies every relocation record of the module, DT_REL first, then DT_JMPREL.
///
/// ```text
/// B  base of the module as the module sees it
/// A  implicit addend, the word stored at the target
/// S  address of the referenced symbol
///
/// R_ARM_RELATIVE             B + A
/// R_ARM_ABS32                S + A
/// R_ARM_GLOB_DAT, JUMP_SLOT  S
/// ```
///
/// Records against symbols the module defines are applied here. Records
/// against undefined symbols become import slots that [`crate::resolve`]
/// fills from the binding table. Must run exactly once; the touched words
/// are flushed before returning.
pub fn relocate(module: &mut Module) -> Result<RelocationReport> {
    if module.state.relocated {
        return Err(relocate_error("module is already relocated"));
    }
    let mut report = RelocationReport::default();
    let (fixups, imports) = {
        let memory = module.memory();
        let image = &memory.as_bytes()[..memory.image_len()];
        let base = memory.guest_base();
        let dynamic = module.dynamic();
        let symtab = SymbolTable::new(image, dynamic)?;
        let mut pass = Pass {
            image,
            base,
            symtab: &symtab,
            fixups: Vec::new(),
            imports: Vec::new(),
            import_index: HashMap::new(),
            report: &mut report,
        };
        for table in [&dynamic.rel, &dynamic.pltrel].into_iter().flatten() {
            pass.table(table.clone())?;
        }
        (pass.fixups, pass.imports)
    };

    let memory = module.memory_mut();
    for fixup in fixups {
        let addr = memory.guest_addr(fixup.offset as usize);
        memory.write_u32(addr, fixup.value)?;
    }
    memory.flush();

    report.imports = imports.len();
    #[cfg(feature = "log")]
    log::debug!(
        "[{}] relocated: {} relative, {} symbolic, {} import slots for {} imports",
        module.name(),
        report.relative,
        report.symbolic,
        report.import_slots,
        report.imports
    );
    module.imports = imports;
    module.state.relocated = true;
    Ok(report)
}

struct Pass<'a> {
    image: &'a [u8],
    base: u32,
    symtab: &'a SymbolTable<'a>,
    fixups: Vec<Fixup>,
    imports: Vec<Import>,
    import_index: HashMap<&'a str, usize>,
    report: &'a mut RelocationReport,
}

impl<'a> Pass<'a> {
    fn table(&mut self, range: Range<u32>) -> Result<()> {
        let start = range.start as usize;
        let end = range.end as usize;
        if end > self.image.len() {
            return Err(relocate_error("relocation table lies outside the image"));
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[Relocation] table at 0x{:x}, {} records",
            self.base.wrapping_add(range.start),
            (end - start) / REL_SIZE
        );
        for cur in (start..end).step_by(REL_SIZE) {
            let rel: Rel = read_pod(self.image, cur)
                .ok_or_else(|| relocate_error("truncated relocation record"))?;
            self.record(ElfRel::new(rel))?;
        }
        Ok(())
    }

    fn record(&mut self, rel: ElfRel) -> Result<()> {
        let r_type = rel.r_type();
        if r_type == REL_NONE {
            self.report.skipped += 1;
            return Ok(());
        }
        let offset = rel.r_offset();
        let addend: u32 = read_pod(self.image, offset as usize).ok_or_else(|| {
            relocate_error(format!(
                "{} target 0x{:x} lies outside the image",
                rel.r_type_str(),
                offset
            ))
        })?;
        match r_type {
            REL_RELATIVE => {
                self.fixup(offset, self.base.wrapping_add(addend));
                self.report.relative += 1;
            }
            REL_SYMBOLIC | REL_GOT | REL_JUMP_SLOT => {
                let add_addend = r_type == REL_SYMBOLIC;
                let (sym, name) = self.symtab.symbol_idx(rel.r_symbol())?;
                if rel.r_symbol() == 0 || !sym.is_undef() {
                    // The null symbol has value 0.
                    let s = if rel.r_symbol() == 0 {
                        0
                    } else {
                        self.base.wrapping_add(sym.st_value())
                    };
                    let value = if add_addend { s.wrapping_add(addend) } else { s };
                    self.fixup(offset, value);
                    self.report.symbolic += 1;
                } else {
                    self.import(name, sym.is_weak(), ImportSlot {
                        offset,
                        addend,
                        add_addend,
                    });
                    self.report.import_slots += 1;
                }
            }
            _ => {
                return Err(relocate_error(format!(
                    "unsupported relocation type {} at 0x{:x}",
                    rel.r_type_str(),
                    offset
                )));
            }
        }
        Ok(())
    }

    fn fixup(&mut self, offset: u32, value: u32) {
        self.fixups.push(Fixup { offset, value });
    }

    fn import(&mut self, name: &'a str, weak: bool, slot: ImportSlot) {
        match self.import_index.get(name) {
            Some(&idx) => self.imports[idx].slots.push(slot),
            None => {
                self.import_index.insert(name, self.imports.len());
                self.imports.push(Import {
                    name: Box::from(name),
                    slots: alloc::vec![slot],
                    weak,
                });
            }
        }
    }
}
