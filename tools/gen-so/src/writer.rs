use crate::common::{HashStyle, InitEntry, RelocEntry, RelocPlace, SymbolDesc, SymbolScope, SymbolType};
use crate::hash::{gnu_hash, sysv_hash};
use anyhow::{Context, Result, bail};
use byteorder::{ByteOrder, LittleEndian};
use elf::abi::*;
use std::collections::BTreeMap;
use std::path::Path;

const EHDR_SIZE: u32 = 52;
const PHDR_SIZE: u32 = 32;
const SYM_SIZE: u32 = 16;
const REL_SIZE: u32 = 8;
const DYN_SIZE: u32 = 8;
/// Version 5 EABI, what the Android toolchain writes into `e_flags`.
const EF_ARM_EABI_VER5: u32 = 0x0500_0000;
/// Thumb `nop`, used to fill the text padding.
const THUMB_NOP: u16 = 0xBF00;

fn align_up(val: u32, align: u32) -> u32 {
    val.div_ceil(align) * align
}

pub(crate) struct StringTable {
    data: Vec<u8>,
    index: BTreeMap<String, u32>,
}

impl StringTable {
    pub(crate) fn new() -> Self {
        Self {
            data: vec![0u8],
            index: BTreeMap::new(),
        }
    }

    pub(crate) fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.index.insert(s.to_string(), idx);
        idx
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Configuration for the shared object writer.
///
/// # Example
///
/// ```ignore
/// let config = SoWriterConfig::default()
///     .with_soname("libtest.so")
///     .with_init_array(vec![InitEntry::Func("ctor".into())]);
/// let writer = SoWriter::with_config(config);
/// ```
#[derive(Clone, Debug)]
pub struct SoWriterConfig {
    pub soname: Option<String>,
    pub needed: Vec<String>,
    pub hash: HashStyle,
    /// Alignment of the data segment (default: 0x1000)
    pub page_size: u32,
    /// Bytes of `nop` appended to the text, room for patch tests.
    pub text_padding: u32,
    /// Zero-initialized bytes after the data segment's file contents.
    pub bss_size: u32,
    /// Function named by DT_INIT.
    pub init: Option<String>,
    pub init_array: Vec<InitEntry>,
    /// Function named by `e_entry`.
    pub entry: Option<String>,
}

impl Default for SoWriterConfig {
    fn default() -> Self {
        Self {
            soname: None,
            needed: Vec::new(),
            hash: HashStyle::Sysv,
            page_size: 0x1000,
            text_padding: 0,
            bss_size: 0,
            init: None,
            init_array: Vec::new(),
            entry: None,
        }
    }
}

impl SoWriterConfig {
    pub fn with_soname(mut self, soname: impl Into<String>) -> Self {
        self.soname = Some(soname.into());
        self
    }

    pub fn with_needed(mut self, lib: impl Into<String>) -> Self {
        self.needed.push(lib.into());
        self
    }

    pub fn with_hash(mut self, hash: HashStyle) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_text_padding(mut self, len: u32) -> Self {
        self.text_padding = len;
        self
    }

    pub fn with_bss(mut self, len: u32) -> Self {
        self.bss_size = len;
        self
    }

    pub fn with_init(mut self, func: impl Into<String>) -> Self {
        self.init = Some(func.into());
        self
    }

    pub fn with_init_array(mut self, entries: Vec<InitEntry>) -> Self {
        self.init_array = entries;
        self
    }

    pub fn with_entry(mut self, func: impl Into<String>) -> Self {
        self.entry = Some(func.into());
        self
    }
}

/// The generated file and where everything ended up.
///
/// All addresses are offsets from the image base: the first segment starts
/// at vaddr 0 and every file offset equals its vaddr.
#[derive(Clone, Debug)]
pub struct SoOutput {
    pub data: Vec<u8>,
    /// Defined symbols, Thumb bit included.
    pub symbols: BTreeMap<String, u32>,
    /// Target of each relocation entry, in the order they were given.
    pub slots: Vec<u32>,
    pub text_vaddr: u32,
    /// End of the text, padding included.
    pub text_end: u32,
    pub data_vaddr: u32,
    pub init_array_vaddr: u32,
    pub got_vaddr: u32,
    pub dynamic_vaddr: u32,
    pub rel_vaddr: u32,
    /// End of the last segment in memory.
    pub image_end: u32,
}

impl SoOutput {
    /// Address of a defined symbol, Thumb bit included.
    pub fn symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }

    /// Reads the little-endian word at `vaddr` of the file.
    pub fn word(&self, vaddr: u32) -> u32 {
        LittleEndian::read_u32(&self.data[vaddr as usize..])
    }
}

/// Writes ELF32 ARM shared objects.
pub struct SoWriter {
    config: SoWriterConfig,
}

impl Default for SoWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SoWriter {
    pub fn new() -> Self {
        Self {
            config: SoWriterConfig::default(),
        }
    }

    pub fn with_config(config: SoWriterConfig) -> Self {
        Self { config }
    }

    /// Write the object to `out_path`, returning the output metadata for verification.
    pub fn write_file(
        &self,
        out_path: &Path,
        relocs: &[RelocEntry],
        symbols: &[SymbolDesc],
    ) -> Result<SoOutput> {
        let output = self.write(relocs, symbols)?;
        std::fs::write(out_path, &output.data)
            .with_context(|| format!("writing {}", out_path.display()))?;
        Ok(output)
    }

    pub fn write(&self, relocs: &[RelocEntry], symbols: &[SymbolDesc]) -> Result<SoOutput> {
        let config = &self.config;

        // Undefined symbols first so the GNU hash covers a contiguous tail.
        let mut order: Vec<&SymbolDesc> = symbols.iter().filter(|s| !s.is_defined()).collect();
        let symoffset = order.len() as u32 + 1;
        order.extend(symbols.iter().filter(|s| s.is_defined()));
        let nsyms = order.len() as u32 + 1;
        let sym_index: BTreeMap<&str, u32> = order
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.name.as_str(), idx as u32 + 1))
            .collect();

        let mut dynstr = StringTable::new();
        let soname = config.soname.as_deref().map(|s| dynstr.add(s));
        let needed: Vec<u32> = config.needed.iter().map(|s| dynstr.add(s)).collect();
        let name_offs: Vec<u32> = order.iter().map(|s| dynstr.add(&s.name)).collect();

        let (plt, dyn_relocs): (Vec<&RelocEntry>, Vec<&RelocEntry>) =
            relocs.iter().partition(|r| r.is_plt());
        let init_funcs = config
            .init_array
            .iter()
            .filter(|e| matches!(e, InitEntry::Func(_)))
            .count() as u32;
        let n_rel = dyn_relocs.len() as u32 + init_funcs;
        let n_plt = plt.len() as u32;
        let n_slots = relocs
            .iter()
            .filter(|r| r.place == RelocPlace::Slot)
            .count() as u32;

        let sysv = matches!(config.hash, HashStyle::Sysv | HashStyle::Both);
        let gnu = matches!(config.hash, HashStyle::Gnu | HashStyle::Both);
        let nbucket = nsyms.max(1);
        let n_gnu_chain = nsyms - symoffset;

        // Read-only, executable segment.
        let phnum = 3;
        let mut off = EHDR_SIZE + PHDR_SIZE * phnum;
        let dynsym_off = align_up(off, 4);
        off = dynsym_off + SYM_SIZE * nsyms;
        let dynstr_off = off;
        off += dynstr.data().len() as u32;
        let hash_off = align_up(off, 4);
        if sysv {
            off = hash_off + 8 + 4 * nbucket + 4 * nsyms;
        }
        let gnu_hash_off = align_up(off, 4);
        if gnu {
            off = gnu_hash_off + 16 + 4 + 4 + 4 * n_gnu_chain;
        }
        let rel_off = align_up(off, 4);
        let plt_off = rel_off + REL_SIZE * n_rel;
        off = plt_off + REL_SIZE * n_plt;
        let text_off = align_up(off, 16);
        off = text_off;
        let mut symbols_out: BTreeMap<String, u32> = BTreeMap::new();
        let mut content_at: BTreeMap<&str, u32> = BTreeMap::new();
        for &s in order.iter().filter(|s| s.is_code()) {
            if let Some(code) = &s.content {
                off = align_up(off, 4);
                content_at.insert(s.name.as_str(), off);
                let thumb = (s.sym_type == SymbolType::ThumbFunc) as u32;
                symbols_out.insert(s.name.clone(), off | thumb);
                off += code.len() as u32;
            }
        }
        off = align_up(off, 2);
        let text_end = off + config.text_padding;
        let rx_end = text_end;

        // Writable segment.
        let rw_off = align_up(rx_end, config.page_size);
        let init_array_off = rw_off;
        off = init_array_off + 4 * config.init_array.len() as u32;
        let data_off = align_up(off, 4);
        off = data_off;
        for &s in order.iter().filter(|s| !s.is_code()) {
            if let Some(data) = &s.content {
                off = align_up(off, 4);
                content_at.insert(s.name.as_str(), off);
                symbols_out.insert(s.name.clone(), off);
                off += data.len() as u32;
            }
        }
        let got_off = align_up(off, 4);
        off = got_off + 4 * n_slots;
        let dynamic_off = align_up(off, 4);

        let mut dynamic: Vec<(i64, u32)> = Vec::new();
        for &lib in &needed {
            dynamic.push((DT_NEEDED, lib));
        }
        if let Some(soname) = soname {
            dynamic.push((DT_SONAME, soname));
        }
        if sysv {
            dynamic.push((DT_HASH, hash_off));
        }
        if gnu {
            dynamic.push((DT_GNU_HASH, gnu_hash_off));
        }
        dynamic.push((DT_STRTAB, dynstr_off));
        dynamic.push((DT_SYMTAB, dynsym_off));
        dynamic.push((DT_STRSZ, dynstr.data().len() as u32));
        dynamic.push((DT_SYMENT, SYM_SIZE));
        if n_rel > 0 {
            dynamic.push((DT_REL, rel_off));
            dynamic.push((DT_RELSZ, REL_SIZE * n_rel));
            dynamic.push((DT_RELENT, REL_SIZE));
        }
        if n_plt > 0 {
            dynamic.push((DT_JMPREL, plt_off));
            dynamic.push((DT_PLTRELSZ, REL_SIZE * n_plt));
            dynamic.push((DT_PLTREL, DT_REL as u32));
        }
        if let Some(init) = &config.init {
            let addr = *symbols_out
                .get(init)
                .with_context(|| format!("DT_INIT function {init} is not defined"))?;
            dynamic.push((DT_INIT, addr));
        }
        if !config.init_array.is_empty() {
            dynamic.push((DT_INIT_ARRAY, init_array_off));
            dynamic.push((DT_INIT_ARRAYSZ, 4 * config.init_array.len() as u32));
        }
        dynamic.push((DT_NULL, 0));
        let rw_filesz_end = dynamic_off + DYN_SIZE * dynamic.len() as u32;
        let image_end = rw_filesz_end + config.bss_size;

        let mut buf = vec![0u8; rw_filesz_end as usize];

        // ELF header.
        buf[..4].copy_from_slice(&ELFMAGIC);
        buf[EI_CLASS] = ELFCLASS32;
        buf[EI_DATA] = ELFDATA2LSB;
        buf[EI_VERSION] = EV_CURRENT;
        LittleEndian::write_u16(&mut buf[16..], ET_DYN);
        LittleEndian::write_u16(&mut buf[18..], EM_ARM);
        LittleEndian::write_u32(&mut buf[20..], EV_CURRENT as u32);
        let entry = match &config.entry {
            Some(name) => *symbols_out
                .get(name)
                .with_context(|| format!("entry {name} is not defined"))?,
            None => 0,
        };
        LittleEndian::write_u32(&mut buf[24..], entry);
        LittleEndian::write_u32(&mut buf[28..], EHDR_SIZE);
        LittleEndian::write_u32(&mut buf[36..], EF_ARM_EABI_VER5);
        LittleEndian::write_u16(&mut buf[40..], EHDR_SIZE as u16);
        LittleEndian::write_u16(&mut buf[42..], PHDR_SIZE as u16);
        LittleEndian::write_u16(&mut buf[44..], phnum as u16);
        LittleEndian::write_u16(&mut buf[46..], 40);

        // Program headers.
        let phdrs = [
            (PT_LOAD, 0, rx_end, rx_end, PF_R | PF_X, config.page_size),
            (
                PT_LOAD,
                rw_off,
                rw_filesz_end - rw_off,
                image_end - rw_off,
                PF_R | PF_W,
                config.page_size,
            ),
            (
                PT_DYNAMIC,
                dynamic_off,
                DYN_SIZE * dynamic.len() as u32,
                DYN_SIZE * dynamic.len() as u32,
                PF_R | PF_W,
                4,
            ),
        ];
        for (idx, (p_type, start, filesz, memsz, flags, align)) in phdrs.into_iter().enumerate() {
            let at = (EHDR_SIZE + PHDR_SIZE * idx as u32) as usize;
            LittleEndian::write_u32(&mut buf[at..], p_type);
            LittleEndian::write_u32(&mut buf[at + 4..], start);
            LittleEndian::write_u32(&mut buf[at + 8..], start);
            LittleEndian::write_u32(&mut buf[at + 12..], start);
            LittleEndian::write_u32(&mut buf[at + 16..], filesz);
            LittleEndian::write_u32(&mut buf[at + 20..], memsz);
            LittleEndian::write_u32(&mut buf[at + 24..], flags);
            LittleEndian::write_u32(&mut buf[at + 28..], align);
        }

        // Symbols.
        for (idx, s) in order.iter().enumerate() {
            let at = (dynsym_off + SYM_SIZE * (idx as u32 + 1)) as usize;
            let value = symbols_out.get(&s.name).copied().unwrap_or(0);
            let size = s
                .size
                .unwrap_or_else(|| s.content.as_ref().map_or(0, |c| c.len() as u32));
            let bind = match s.scope {
                SymbolScope::Global => STB_GLOBAL,
                SymbolScope::Local => STB_LOCAL,
                SymbolScope::Weak => STB_WEAK,
            };
            let ty = if s.is_code() { STT_FUNC } else { STT_OBJECT };
            let shndx: u16 = match (s.is_defined(), s.is_code()) {
                (false, _) => SHN_UNDEF,
                (true, true) => 1,
                (true, false) => 2,
            };
            LittleEndian::write_u32(&mut buf[at..], name_offs[idx]);
            LittleEndian::write_u32(&mut buf[at + 4..], value);
            LittleEndian::write_u32(&mut buf[at + 8..], size);
            buf[at + 12] = (bind << 4) | ty;
            LittleEndian::write_u16(&mut buf[at + 14..], shndx);
        }
        let strtab = dynstr.data();
        buf[dynstr_off as usize..dynstr_off as usize + strtab.len()].copy_from_slice(strtab);

        // Hash tables.
        if sysv {
            let base = hash_off as usize;
            LittleEndian::write_u32(&mut buf[base..], nbucket);
            LittleEndian::write_u32(&mut buf[base + 4..], nsyms);
            let buckets = base + 8;
            let chains = buckets + 4 * nbucket as usize;
            for (idx, s) in order.iter().enumerate() {
                let idx = idx as u32 + 1;
                let bucket = buckets + 4 * (sysv_hash(&s.name) % nbucket) as usize;
                let head = LittleEndian::read_u32(&buf[bucket..]);
                LittleEndian::write_u32(&mut buf[chains + 4 * idx as usize..], head);
                LittleEndian::write_u32(&mut buf[bucket..], idx);
            }
        }
        if gnu {
            let base = gnu_hash_off as usize;
            LittleEndian::write_u32(&mut buf[base..], 1);
            LittleEndian::write_u32(&mut buf[base + 4..], symoffset);
            LittleEndian::write_u32(&mut buf[base + 8..], 1);
            LittleEndian::write_u32(&mut buf[base + 12..], 5);
            // A full bloom word never filters a lookup out.
            LittleEndian::write_u32(&mut buf[base + 16..], u32::MAX);
            let first = if n_gnu_chain > 0 { symoffset } else { 0 };
            LittleEndian::write_u32(&mut buf[base + 20..], first);
            let chains = base + 24;
            for (idx, s) in order.iter().enumerate().skip(symoffset as usize - 1) {
                let pos = idx + 1 - symoffset as usize;
                let last = pos as u32 + 1 == n_gnu_chain;
                let value = (gnu_hash(&s.name) & !1) | last as u32;
                LittleEndian::write_u32(&mut buf[chains + 4 * pos..], value);
            }
        }

        // Code and data.
        for s in &order {
            if let (Some(content), Some(&at)) = (&s.content, content_at.get(s.name.as_str())) {
                buf[at as usize..at as usize + content.len()].copy_from_slice(content);
            }
        }
        let pad_start = text_end - config.text_padding;
        for at in (pad_start..text_end).step_by(2) {
            if at + 2 <= text_end {
                LittleEndian::write_u16(&mut buf[at as usize..], THUMB_NOP);
            }
        }

        // Relocations and the words they target.
        let mut slots = vec![0u32; relocs.len()];
        let mut next_slot = got_off;
        let mut rel_at = rel_off as usize;
        let mut plt_at = plt_off as usize;
        for (idx, reloc) in relocs.iter().enumerate() {
            let target = match &reloc.place {
                RelocPlace::Slot => {
                    let slot = next_slot;
                    next_slot += 4;
                    slot
                }
                RelocPlace::InSymbol { name, offset } => {
                    let at = content_at
                        .get(name.as_str())
                        .with_context(|| format!("relocation inside undefined symbol {name}"))?;
                    at + offset
                }
            };
            let sym = if reloc.symbol_name.is_empty() {
                0
            } else {
                *sym_index
                    .get(reloc.symbol_name.as_str())
                    .with_context(|| format!("relocation against unknown symbol {}", reloc.symbol_name))?
            };
            let mut addend = reloc.addend;
            if let Some(name) = &reloc.addend_symbol {
                let addr = symbols_out
                    .get(name)
                    .with_context(|| format!("relative relocation to undefined symbol {name}"))?;
                addend = addend.wrapping_add(*addr);
            }
            if target as usize + 4 > buf.len() {
                bail!("relocation target 0x{target:x} is outside the file");
            }
            LittleEndian::write_u32(&mut buf[target as usize..], addend);
            let at = if reloc.is_plt() { &mut plt_at } else { &mut rel_at };
            LittleEndian::write_u32(&mut buf[*at..], target);
            LittleEndian::write_u32(&mut buf[*at + 4..], (sym << 8) | reloc.r_type);
            *at += REL_SIZE as usize;
            slots[idx] = target;
        }
        for (idx, entry) in config.init_array.iter().enumerate() {
            let at = init_array_off + 4 * idx as u32;
            match entry {
                InitEntry::Raw(value) => LittleEndian::write_u32(&mut buf[at as usize..], *value),
                InitEntry::Func(name) => {
                    let addr = *symbols_out
                        .get(name)
                        .with_context(|| format!("init function {name} is not defined"))?;
                    LittleEndian::write_u32(&mut buf[at as usize..], addr);
                    LittleEndian::write_u32(&mut buf[rel_at..], at);
                    LittleEndian::write_u32(&mut buf[rel_at + 4..], R_ARM_RELATIVE);
                    rel_at += REL_SIZE as usize;
                }
            }
        }

        for (idx, (tag, val)) in dynamic.iter().enumerate() {
            let at = (dynamic_off + DYN_SIZE * idx as u32) as usize;
            LittleEndian::write_i32(&mut buf[at..], *tag as i32);
            LittleEndian::write_u32(&mut buf[at + 4..], *val);
        }

        Ok(SoOutput {
            data: buf,
            symbols: symbols_out,
            slots,
            text_vaddr: text_off,
            text_end,
            data_vaddr: data_off,
            init_array_vaddr: init_array_off,
            got_vaddr: got_off,
            dynamic_vaddr: dynamic_off,
            rel_vaddr: rel_off,
            image_end,
        })
    }
}
