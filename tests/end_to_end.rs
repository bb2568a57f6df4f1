mod common;

use common::{at, build_with, halfwords, load, loader, table, thumb::{Cpu, asm}, word};
use gen_so::{InitEntry, RelocEntry, SoOutput, SoWriterConfig, SymbolDesc};
use so_loader::{
    Error, NativeAddressing,
    binding::StubKind,
    catalog::{Catalog, PatchAction, PatchEntry},
    patch::{PatchEngine, Site, Target},
    relocate, resolve,
};

const HELPER: usize = 0x0E00_0001;
const SCREEN_WIDTH: usize = 0x0E00_0101;
const COUNTER: usize = 0x0E10_0000;

/// `add` tail-calls the imported `helper` through a literal the loader fills.
fn output() -> SoOutput {
    let add = halfwords(&[0xF8DF, 0xC004, 0x4760, asm::NOP, 0, 0]);
    let symbols = [
        SymbolDesc::thumb_func("add", &add),
        SymbolDesc::thumb_func_halfwords(
            "OS_ScreenGetWidth",
            &[asm::movs(0, 200), asm::BX_LR, asm::NOP, asm::NOP],
        ),
        SymbolDesc::thumb_func_halfwords("init", &[asm::BX_LR, asm::NOP]),
        SymbolDesc::object("vtable", &[0; 8]),
        SymbolDesc::undefined_func("helper"),
        SymbolDesc::undefined_object("counter"),
        SymbolDesc::undefined_func("sigaction"),
    ];
    let relocs = [
        RelocEntry::abs("helper").in_symbol("add", 8),
        RelocEntry::relative_to("add").in_symbol("vtable", 0),
        RelocEntry::abs("OS_ScreenGetWidth").in_symbol("vtable", 4),
        RelocEntry::glob_dat("counter"),
        RelocEntry::jump_slot("sigaction"),
    ];
    let config = SoWriterConfig::default()
        .with_soname("libGTASA.so")
        .with_init_array(vec![InitEntry::Func("init".into())]);
    build_with(config, &relocs, &symbols)
}

fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.push(PatchEntry::new(
        "screen_width",
        "report the host display",
        PatchAction::Hook {
            site: Site::Symbol("OS_ScreenGetWidth"),
            target: Target::native("screen_width", SCREEN_WIDTH),
            mode: Default::default(),
        },
    ));
    catalog
}

#[test]
fn unbound_import_fails_the_load() {
    let mut module = load(&output());
    relocate(&mut module).unwrap();
    let mut table = table();
    table.state_cell("counter", COUNTER).unwrap();
    table.stub("sigaction", StubKind::Ret0).unwrap();
    let err = resolve(&mut module, &table).unwrap_err();
    assert!(matches!(err, Error::MissingSymbol { ref name } if name == "helper"));
}

#[test]
fn brings_up_and_runs_the_module() {
    let output = output();
    let mut module = load(&output);
    let relocs = relocate(&mut module).unwrap();
    assert_eq!(relocs.relative, 2);
    assert_eq!(relocs.symbolic, 1);
    assert_eq!(relocs.imports, 3);

    let mut table = table();
    table.native("helper", HELPER).unwrap();
    table.state_cell("counter", COUNTER).unwrap();
    table.stub("sigaction", StubKind::Ret0).unwrap();
    let bound = resolve(&mut module, &table).unwrap();
    assert_eq!(bound.bound(), 3);

    let add = module.symbol_address("add").unwrap();
    assert_eq!(add, module.guest_base() + output.symbol("add").unwrap());
    assert_eq!(module.initializers().unwrap(), [at(&module, output.symbol("init").unwrap())]);
    assert_eq!(word(&module, output.symbol("vtable").unwrap()), add);
    assert_eq!(word(&module, output.slots[3]), COUNTER as u32);
    assert_eq!(word(&module, output.slots[4]), common::RET0 as u32);

    let mut engine = PatchEngine::new(&mut module);
    let report = catalog().apply(&mut engine, &|_: &str| -> Option<bool> { None }).unwrap();
    assert_eq!(report.applied, 1);
    engine.flush();
    module.seal().unwrap();

    let mut cpu = Cpu::new(&module);
    cpu.on(HELPER as u32, |cpu| cpu.regs.r[0] += cpu.regs.r[1]);
    cpu.on(SCREEN_WIDTH as u32, |cpu| cpu.regs.r[0] = 960);
    assert_eq!(cpu.call(add, &[2, 3]), 5);
    let through_table = word(&module, output.symbol("vtable").unwrap() + 4);
    assert_eq!(cpu.call(through_table, &[]), 960);
}

#[test]
fn verification_needs_no_real_addresses() {
    let output = output();
    common::init_logger();
    let mut module = loader()
        .with_placeholder_addresses(true)
        .load(output.data.as_slice())
        .unwrap();
    assert!(matches!(module.addressing(), NativeAddressing::Placeholder(_)));
    relocate(&mut module).unwrap();

    let mut table = table();
    table.native("helper", usize::MAX - 0xFFE).unwrap();
    table.state_cell("counter", 0).unwrap();
    table.stub("sigaction", StubKind::Ret0).unwrap();
    resolve(&mut module, &table).unwrap();

    let mut engine = PatchEngine::new(&mut module);
    catalog().apply(&mut engine, &|_: &str| -> Option<bool> { None }).unwrap();
    let literal = at(engine.module(), output.symbol("add").unwrap() - 1 + 8);
    assert_eq!(engine.module().read_u32(literal).unwrap(), 0x0100_0001);
}
