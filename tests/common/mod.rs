#![allow(dead_code)]
pub mod thumb;

use gen_so::{RelocEntry, SoOutput, SoWriter, SoWriterConfig, SymbolDesc};
use so_loader::{
    Loader, Module,
    binding::{BindingTable, StubSet},
    os::HeapMmap,
};

/// Requested base; the heap backend places the mapping elsewhere, so on a
/// 64-bit host this is also the base the module sees.
pub const BASE: u32 = 0x4000_0000;
/// Fake host stubs, small enough for direct addressing.
pub const RET0: usize = 0x0F00_0001;
pub const RET1: usize = 0x0F00_0011;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn stub_set() -> StubSet {
    StubSet::new(RET0, RET1)
}

pub fn table() -> BindingTable {
    BindingTable::new(stub_set())
}

pub fn build(relocs: &[RelocEntry], symbols: &[SymbolDesc]) -> SoOutput {
    build_with(SoWriterConfig::default(), relocs, symbols)
}

pub fn build_with(config: SoWriterConfig, relocs: &[RelocEntry], symbols: &[SymbolDesc]) -> SoOutput {
    SoWriter::with_config(config).write(relocs, symbols).unwrap()
}

pub fn loader() -> Loader<HeapMmap> {
    Loader::new().with_base(BASE).with_mmap::<HeapMmap>()
}

/// Maps `output` without relocating it.
pub fn load(output: &SoOutput) -> Module {
    init_logger();
    loader().load(output.data.as_slice()).unwrap()
}

/// Maps and relocates `output`.
pub fn load_relocated(output: &SoOutput) -> Module {
    let mut module = load(output);
    so_loader::relocate(&mut module).unwrap();
    module
}

/// Guest address of a vaddr of `module`.
pub fn at(module: &Module, vaddr: u32) -> u32 {
    module.guest_base().wrapping_add(vaddr)
}

pub fn word(module: &Module, vaddr: u32) -> u32 {
    module.read_u32(at(module, vaddr)).unwrap()
}

/// Thumb halfwords as bytes, in execution order.
pub fn halfwords(code: &[u16]) -> Vec<u8> {
    code.iter().flat_map(|half| half.to_le_bytes()).collect()
}
