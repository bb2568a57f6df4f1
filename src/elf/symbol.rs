//! Dynamic symbol table and the name index built over it.
use crate::{
    Result,
    elf::{ElfDynamic, ElfSymbol, SYM_SIZE, Sym, read_pod},
    malformed_error,
};
use alloc::{boxed::Box, vec::Vec};
use core::hash::{Hash, Hasher};
use elf::abi::STT_FUNC;
use foldhash::{SharedSeed, fast::FoldHasher};
use hashbrown::HashTable;

const HASHER: FoldHasher<'static> = FoldHasher::with_seed(0, SharedSeed::global_fixed());

/// The dynamic string table.
pub(crate) struct ElfStringTable<'a> {
    data: &'a [u8],
}

impl<'a> ElfStringTable<'a> {
    pub(crate) fn new(image: &'a [u8], dynamic: &ElfDynamic) -> Result<Self> {
        let start = dynamic.strtab_off as usize;
        let data = if dynamic.strtab_size == 0 {
            image.get(start..)
        } else {
            image.get(start..start + dynamic.strtab_size as usize)
        }
        .ok_or_else(|| malformed_error("DT_STRTAB lies outside the image"))?;
        Ok(Self { data })
    }

    /// Reads the NUL-terminated string at `offset`.
    pub(crate) fn get_str(&self, offset: usize) -> Result<&'a str> {
        let tail = self
            .data
            .get(offset..)
            .ok_or_else(|| malformed_error("symbol name offset outside DT_STRTAB"))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed_error("unterminated symbol name"))?;
        core::str::from_utf8(&tail[..len]).map_err(|_| malformed_error("symbol name is not UTF-8"))
    }
}

/// The dynamic symbol table.
pub(crate) struct SymbolTable<'a> {
    image: &'a [u8],
    symtab_off: usize,
    count: usize,
    pub(crate) strtab: ElfStringTable<'a>,
}

impl<'a> SymbolTable<'a> {
    pub(crate) fn new(image: &'a [u8], dynamic: &ElfDynamic) -> Result<Self> {
        let count = symbol_count(image, dynamic)?;
        let symtab_off = dynamic.symtab_off as usize;
        let end = symtab_off + count * SYM_SIZE;
        if end > image.len() {
            return Err(malformed_error("DT_SYMTAB lies outside the image"));
        }
        Ok(Self {
            image,
            symtab_off,
            count,
            strtab: ElfStringTable::new(image, dynamic)?,
        })
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Returns the symbol at `idx` together with its name.
    pub(crate) fn symbol_idx(&self, idx: usize) -> Result<(ElfSymbol, &'a str)> {
        if idx >= self.count {
            return Err(malformed_error("symbol index outside DT_SYMTAB"));
        }
        let sym: Sym = read_pod(self.image, self.symtab_off + idx * SYM_SIZE)
            .ok_or_else(|| malformed_error("symbol index outside DT_SYMTAB"))?;
        let sym = ElfSymbol::new(sym);
        let name = self.strtab.get_str(sym.st_name())?;
        Ok((sym, name))
    }
}

/// Number of entries in the dynamic symbol table.
///
/// DT_HASH stores it directly as `nchain`; with only DT_GNU_HASH the last
/// chain reachable from any bucket marks the end of the table.
fn symbol_count(image: &[u8], dynamic: &ElfDynamic) -> Result<usize> {
    let word = |off: usize| -> Result<u32> {
        read_pod::<u32>(image, off).ok_or_else(|| malformed_error("hash table lies outside the image"))
    };
    if let Some(hash_off) = dynamic.hash_off {
        return Ok(word(hash_off as usize + 4)? as usize);
    }
    let Some(gnu_off) = dynamic.gnu_hash_off else {
        return Err(malformed_error("no hash table"));
    };
    let gnu_off = gnu_off as usize;
    let nbucket = word(gnu_off)? as usize;
    let symoffset = word(gnu_off + 4)? as usize;
    let bloom_size = word(gnu_off + 8)? as usize;
    let buckets = gnu_off + 16 + bloom_size * 4;
    let chains = buckets + nbucket * 4;

    let mut last = 0;
    for i in 0..nbucket {
        last = last.max(word(buckets + i * 4)? as usize);
    }
    if last < symoffset {
        return Ok(symoffset);
    }
    while word(chains + (last - symoffset) * 4)? & 1 == 0 {
        last += 1;
    }
    Ok(last + 1)
}

/// An exported symbol of the module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportedSymbol {
    /// Offset of the symbol from the image base.
    pub offset: u32,
    /// Size of the symbol in bytes.
    pub size: u32,
    /// Whether the symbol is code.
    pub is_func: bool,
}

struct IndexEntry {
    name: Box<str>,
    symbol: ExportedSymbol,
}

/// Name to offset index over the exported symbols of the module.
///
/// Built once at load time so that repeated lookups during patching are
/// constant time on average.
pub struct SymbolIndex {
    map: HashTable<IndexEntry>,
}

impl SymbolIndex {
    pub(crate) fn build(symtab: &SymbolTable) -> Result<Self> {
        let mut map = HashTable::with_capacity(symtab.count());
        // Index 0 is the reserved null symbol.
        for idx in 1..symtab.count() {
            let (sym, name) = symtab.symbol_idx(idx)?;
            if !sym.is_exported() || name.is_empty() {
                continue;
            }
            let hash = Self::hash(name.as_bytes());
            // The first definition wins, like a linear scan would.
            if map.find(hash, |e: &IndexEntry| &*e.name == name).is_some() {
                continue;
            }
            map.insert_unique(
                hash,
                IndexEntry {
                    name: name.into(),
                    symbol: ExportedSymbol {
                        offset: sym.st_value(),
                        size: sym.st_size(),
                        is_func: sym.st_type() == STT_FUNC,
                    },
                },
                |e| Self::hash(e.name.as_bytes()),
            );
        }
        Ok(Self { map })
    }

    fn hash(name: &[u8]) -> u64 {
        let mut hasher = HASHER.clone();
        name.hash(&mut hasher);
        hasher.finish()
    }

    /// Looks up an exported symbol by exact name.
    pub fn get(&self, name: &str) -> Option<&ExportedSymbol> {
        self.map
            .find(Self::hash(name.as_bytes()), |e| &*e.name == name)
            .map(|e| &e.symbol)
    }

    /// Number of indexed symbols.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over all indexed symbols in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExportedSymbol)> {
        self.map.iter().map(|e| (&*e.name, &e.symbol))
    }
}

/// One import of the module: an undefined symbol referenced by relocations.
#[derive(Clone, Debug)]
pub struct Import {
    /// Symbol name.
    pub name: Box<str>,
    /// Offsets from the image base of every word that must hold the import's address.
    pub slots: Vec<ImportSlot>,
    /// Whether the symbol is declared weak.
    pub weak: bool,
}

/// A word of the image that receives an import's address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportSlot {
    /// Offset from the image base.
    pub offset: u32,
    /// The implicit addend stored at the slot before binding.
    pub addend: u32,
    /// Whether the final value is `address + addend` rather than `address`.
    pub add_addend: bool,
}
