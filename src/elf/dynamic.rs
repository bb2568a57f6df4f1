//! Parsing the `.dynamic` section
use crate::{
    Result,
    elf::{DYN_SIZE, Dyn, REL_SIZE, read_pod},
    parse_dynamic_error,
};
use alloc::vec::Vec;
use core::ops::Range;
use elf::abi::*;

/// Information in the dynamic section, as offsets from the image base.
#[derive(Debug, Default, Clone)]
pub struct ElfDynamic {
    /// DT_SYMTAB
    pub symtab_off: u32,
    /// DT_STRTAB
    pub strtab_off: u32,
    /// DT_STRSZ
    pub strtab_size: u32,
    /// DT_HASH
    pub hash_off: Option<u32>,
    /// DT_GNU_HASH
    pub gnu_hash_off: Option<u32>,
    /// DT_REL / DT_RELSZ
    pub rel: Option<Range<u32>>,
    /// DT_JMPREL / DT_PLTRELSZ
    pub pltrel: Option<Range<u32>>,
    /// DT_INIT
    pub init_off: Option<u32>,
    /// DT_INIT_ARRAY / DT_INIT_ARRAYSZ
    pub init_array: Option<Range<u32>>,
    /// DT_FINI
    pub fini_off: Option<u32>,
    /// DT_FINI_ARRAY / DT_FINI_ARRAYSZ
    pub fini_array: Option<Range<u32>>,
    /// DT_NEEDED, as string table offsets
    pub needed_libs: Vec<u32>,
    /// DT_SONAME
    pub soname_off: Option<u32>,
    /// DT_FLAGS contains DF_TEXTREL or DT_TEXTREL is present
    pub text_rel: bool,
}

impl ElfDynamic {
    /// Parses the dynamic array found at `dynamic_off` inside the mapped `image`.
    pub(crate) fn new(image: &[u8], dynamic_off: u32) -> Result<ElfDynamic> {
        let mut dynamic = ElfDynamic::default();
        let mut symtab = None;
        let mut strtab = None;
        let mut rel_off = None;
        let mut rel_size = None;
        let mut pltrel_off = None;
        let mut pltrel_size = None;
        let mut init_array_off = None;
        let mut init_array_size = None;
        let mut fini_array_off = None;
        let mut fini_array_size = None;

        let mut cur = dynamic_off as usize;
        loop {
            let entry: Dyn = read_pod(image, cur)
                .ok_or_else(|| parse_dynamic_error("dynamic section is not terminated by DT_NULL"))?;
            let val = entry.d_val;
            match entry.d_tag as i64 {
                DT_NULL => break,
                DT_NEEDED => dynamic.needed_libs.push(val),
                DT_SONAME => dynamic.soname_off = Some(val),
                DT_HASH => dynamic.hash_off = Some(val),
                DT_GNU_HASH => dynamic.gnu_hash_off = Some(val),
                DT_SYMTAB => symtab = Some(val),
                DT_STRTAB => strtab = Some(val),
                DT_STRSZ => dynamic.strtab_size = val,
                DT_REL => rel_off = Some(val),
                DT_RELSZ => rel_size = Some(val),
                DT_RELENT if val as usize != REL_SIZE => {
                    return Err(parse_dynamic_error("unexpected DT_RELENT"));
                }
                DT_RELA | DT_RELASZ => {
                    return Err(parse_dynamic_error("RELA relocations are not used on ARM"));
                }
                DT_PLTREL if val as i64 != DT_REL => {
                    return Err(parse_dynamic_error("DT_PLTREL must be DT_REL"));
                }
                DT_JMPREL => pltrel_off = Some(val),
                DT_PLTRELSZ => pltrel_size = Some(val),
                DT_INIT => dynamic.init_off = Some(val),
                DT_FINI => dynamic.fini_off = Some(val),
                DT_INIT_ARRAY => init_array_off = Some(val),
                DT_INIT_ARRAYSZ => init_array_size = Some(val),
                DT_FINI_ARRAY => fini_array_off = Some(val),
                DT_FINI_ARRAYSZ => fini_array_size = Some(val),
                DT_TEXTREL => dynamic.text_rel = true,
                DT_FLAGS => dynamic.text_rel |= val & DF_TEXTREL as u32 != 0,
                _ => {}
            }
            cur += DYN_SIZE;
        }

        dynamic.symtab_off =
            symtab.ok_or_else(|| parse_dynamic_error("dynamic section does not have DT_SYMTAB"))?;
        dynamic.strtab_off =
            strtab.ok_or_else(|| parse_dynamic_error("dynamic section does not have DT_STRTAB"))?;
        if dynamic.hash_off.is_none() && dynamic.gnu_hash_off.is_none() {
            return Err(parse_dynamic_error(
                "dynamic section has neither DT_HASH nor DT_GNU_HASH",
            ));
        }
        dynamic.rel = table(rel_off, rel_size, "DT_REL")?;
        dynamic.pltrel = table(pltrel_off, pltrel_size, "DT_JMPREL")?;
        dynamic.init_array = table(init_array_off, init_array_size, "DT_INIT_ARRAY")?;
        dynamic.fini_array = table(fini_array_off, fini_array_size, "DT_FINI_ARRAY")?;
        Ok(dynamic)
    }
}

fn table(off: Option<u32>, size: Option<u32>, tag: &'static str) -> Result<Option<Range<u32>>> {
    match (off, size) {
        (Some(off), Some(size)) => off
            .checked_add(size)
            .map(|end| Some(off..end))
            .ok_or_else(|| parse_dynamic_error(alloc::format!("{tag} overflows the address space"))),
        (None, None) | (None, Some(0)) => Ok(None),
        (Some(_), None) => Err(parse_dynamic_error(alloc::format!("{tag} has no size entry"))),
        (None, Some(_)) => Err(parse_dynamic_error(alloc::format!("{tag} size without table"))),
    }
}
