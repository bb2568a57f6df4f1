//! The loaded module and the translation of host addresses into its address space.
use crate::{
    Result, binding_error,
    elf::{ElfDynamic, ExportedSymbol, Import, SymbolIndex},
    segment::{ElfSegments, SegmentInfo},
};
use alloc::{string::String, vec::Vec};
use core::{fmt::Debug, ops::Range};
use delegate::delegate;
use hashbrown::HashMap;

/// First synthetic address handed out by [`NativeAddressing::Placeholder`].
const PLACEHOLDER_START: u32 = 0x0100_0000;
/// Distance between two synthetic addresses.
const PLACEHOLDER_STEP: u32 = 0x10;

/// How host addresses (bindings, hook handlers) become addresses the module can use.
#[derive(Debug, Default)]
pub enum NativeAddressing {
    /// Host addresses are used as they are and must fit in 32 bits.
    #[default]
    Direct,
    /// Every distinct host address gets a unique synthetic 32-bit address.
    ///
    /// Nothing may execute in this mode; it exists to check that every import
    /// binds and every patch applies on hosts with a wider address space.
    Placeholder(Placeholders),
}

/// Synthetic addresses assigned so far.
#[derive(Debug)]
pub struct Placeholders {
    next: u32,
    assigned: HashMap<usize, u32>,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            next: PLACEHOLDER_START,
            assigned: HashMap::new(),
        }
    }
}

impl Placeholders {
    fn address(&mut self, host: usize, avoid: &Range<u32>) -> Result<u32> {
        if let Some(&addr) = self.assigned.get(&host) {
            return Ok(addr);
        }
        if avoid.contains(&self.next) || avoid.contains(&self.next.wrapping_add(PLACEHOLDER_STEP - 1)) {
            self.next = avoid.end;
        }
        let slot = self.next;
        self.next = self
            .next
            .checked_add(PLACEHOLDER_STEP)
            .ok_or_else(|| binding_error("placeholder address range exhausted"))?;
        // Keep the Thumb bit so hooks still pick the right encoding.
        let addr = slot | (host as u32 & 1);
        self.assigned.insert(host, addr);
        Ok(addr)
    }

    /// Number of distinct host addresses seen.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

impl NativeAddressing {
    /// Placeholder addressing with no address assigned yet.
    pub fn placeholder() -> Self {
        NativeAddressing::Placeholder(Placeholders::default())
    }

    /// Whether foreign code may run under this addressing.
    pub fn is_executable(&self) -> bool {
        matches!(self, NativeAddressing::Direct)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoadState {
    pub(crate) relocated: bool,
    pub(crate) resolved: bool,
}

/// The loaded foreign module.
///
/// Owns the mapping for its whole lifetime; dropping the module unmaps it.
pub struct Module {
    name: String,
    soname: Option<String>,
    needed: Vec<String>,
    memory: ElfSegments,
    dynamic: ElfDynamic,
    symbols: SymbolIndex,
    entry: u32,
    text_offset: u32,
    addressing: NativeAddressing,
    pub(crate) imports: Vec<Import>,
    pub(crate) state: LoadState,
}

impl Debug for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("memory", &self.memory)
            .field("symbols", &self.symbols.len())
            .field("imports", &self.imports.len())
            .finish()
    }
}

impl Module {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        soname: Option<String>,
        needed: Vec<String>,
        memory: ElfSegments,
        dynamic: ElfDynamic,
        symbols: SymbolIndex,
        entry: u32,
        text_offset: u32,
        addressing: NativeAddressing,
    ) -> Self {
        Self {
            name,
            soname,
            needed,
            memory,
            dynamic,
            symbols,
            entry,
            text_offset,
            addressing,
            imports: Vec::new(),
            state: LoadState::default(),
        }
    }

    delegate! {
        to self.memory {
            /// Host address of the image base.
            pub fn base(&self) -> usize;
            /// Address of the image base as seen by the module.
            pub fn guest_base(&self) -> u32;
            /// Total length of the mapping, patch area included.
            pub fn len(&self) -> usize;
            /// Length of the part covered by PT_LOAD segments.
            pub fn image_len(&self) -> usize;
            /// The guest address range of the patch area.
            pub fn patch_area(&self) -> Range<u32>;
            /// The mapped segments in program header order.
            pub fn segments(&self) -> &[SegmentInfo];
            /// Whether `addr` lies inside the mapping.
            pub fn contains(&self, addr: u32) -> bool;
            /// The bytes at `[addr, addr + len)`.
            pub fn read(&self, addr: u32, len: usize) -> Result<&[u8]>;
            /// Reads the little-endian word at `addr`.
            pub fn read_u32(&self, addr: u32) -> Result<u32>;
            /// Whether the declared protections have been restored.
            pub fn is_sealed(&self) -> bool;
            /// Synchronizes instruction fetch with every write since the last flush.
            pub fn flush(&mut self);
            /// Restores the declared segment protections.
            pub fn seal(&mut self) -> Result<()>;
        }
    }

    /// File name the module was loaded from.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// DT_SONAME, when present.
    #[inline]
    pub fn soname(&self) -> Option<&str> {
        self.soname.as_deref()
    }

    /// DT_NEEDED entries in declaration order.
    #[inline]
    pub fn needed_libs(&self) -> &[String] {
        &self.needed
    }

    #[inline]
    pub fn memory(&self) -> &ElfSegments {
        &self.memory
    }

    #[inline]
    pub fn memory_mut(&mut self) -> &mut ElfSegments {
        &mut self.memory
    }

    #[inline]
    pub fn dynamic(&self) -> &ElfDynamic {
        &self.dynamic
    }

    /// Start of the first executable segment.
    ///
    /// Fixed catalog offsets are relative to this address.
    #[inline]
    pub fn text_base(&self) -> u32 {
        self.memory.guest_addr(self.text_offset as usize)
    }

    /// `e_entry` translated to a guest address, if the image declares one.
    pub fn entry(&self) -> Option<u32> {
        (self.entry != 0).then(|| self.memory.guest_addr(self.entry as usize))
    }

    /// The index of exported symbols.
    #[inline]
    pub fn symbols(&self) -> &SymbolIndex {
        &self.symbols
    }

    /// Looks up an exported symbol.
    #[inline]
    pub fn symbol(&self, name: &str) -> Option<&ExportedSymbol> {
        self.symbols.get(name)
    }

    /// Guest address of an exported symbol, Thumb bit included.
    pub fn symbol_address(&self, name: &str) -> Option<u32> {
        self.symbols
            .get(name)
            .map(|sym| self.memory.guest_addr(sym.offset as usize))
    }

    /// Host address for a guest address inside the mapping.
    ///
    /// Only meaningful for calling into the module when the guest and host
    /// addresses coincide.
    pub fn host_address(&self, addr: u32) -> Option<usize> {
        self.memory.host_ptr(addr).map(|ptr| ptr as usize)
    }

    /// Imports collected by [`crate::relocate`], in first-reference order.
    #[inline]
    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    #[inline]
    pub fn is_relocated(&self) -> bool {
        self.state.relocated
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.state.resolved
    }

    #[inline]
    pub fn addressing(&self) -> &NativeAddressing {
        &self.addressing
    }

    pub fn set_addressing(&mut self, addressing: NativeAddressing) {
        self.addressing = addressing;
    }

    /// Translates a host address into one the module can store and branch to.
    ///
    /// `name` only serves the error message.
    pub fn native_address(&mut self, name: &str, host: usize) -> Result<u32> {
        match &mut self.addressing {
            NativeAddressing::Direct => u32::try_from(host).map_err(|_| {
                binding_error(alloc::format!(
                    "{name}: native address 0x{host:x} is outside the 32-bit address space"
                ))
            }),
            NativeAddressing::Placeholder(placeholders) => {
                let avoid = self.memory.guest_base()..self.memory.guest_addr(self.memory.len());
                placeholders.address(host, &avoid)
            }
        }
    }

    /// Initializer addresses in the order they must run: DT_INIT, then DT_INIT_ARRAY.
    ///
    /// Reads the relocated array, so call it after [`crate::relocate`].
    /// Entries of 0 and -1 are skipped, as the dynamic linker does.
    pub fn initializers(&self) -> Result<Vec<u32>> {
        let mut funcs = Vec::new();
        if let Some(init) = self.dynamic.init_off {
            funcs.push(self.memory.guest_addr(init as usize));
        }
        if let Some(array) = &self.dynamic.init_array {
            for off in array.clone().step_by(4) {
                let func = self.memory.read_u32(self.memory.guest_addr(off as usize))?;
                if func != 0 && func != u32::MAX {
                    funcs.push(func);
                }
            }
        }
        Ok(funcs)
    }
}
