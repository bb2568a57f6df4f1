mod common;

use common::{RET0, RET1, build, load, load_relocated, table, word};
use gen_so::{RelocEntry, SoOutput, SymbolDesc};
use rstest::rstest;
use so_loader::{
    Error, NativeAddressing, Result,
    binding::{BindingKind, BindingProvider, BindingTable, SAFE_TO_STUB, StubKind, safe_stub_kind},
    resolve,
};

const MALLOC: usize = 0x2000_0101;
const FREE: usize = 0x2000_0201;
const LOG: usize = 0x2000_0301;
const TOUCH: usize = 0x2100_0000;

fn module_output() -> SoOutput {
    let symbols = [
        SymbolDesc::object("table", &[0; 8]),
        SymbolDesc::undefined_func("malloc"),
        SymbolDesc::undefined_func("free").weak(),
        SymbolDesc::undefined_func("__android_log_print"),
        SymbolDesc::undefined_object("hasTouchScreen"),
        SymbolDesc::undefined_func("sigaction"),
        SymbolDesc::undefined_func("IsProfileStatsBusy"),
    ];
    let relocs = [
        RelocEntry::jump_slot("malloc"),
        RelocEntry::jump_slot("free"),
        RelocEntry::glob_dat("malloc"),
        RelocEntry::jump_slot("__android_log_print"),
        RelocEntry::abs("hasTouchScreen").with_addend(4),
        RelocEntry::glob_dat("hasTouchScreen"),
        RelocEntry::jump_slot("sigaction"),
        RelocEntry::jump_slot("IsProfileStatsBusy"),
    ];
    build(&relocs, &symbols)
}

fn full_table() -> BindingTable {
    let mut table = table();
    table.native("malloc", MALLOC).unwrap();
    table.native("free", FREE).unwrap();
    table.shim("__android_log_print", LOG).unwrap();
    table.state_cell("hasTouchScreen", TOUCH).unwrap();
    table.stub("sigaction", StubKind::Ret0).unwrap();
    table.stub("IsProfileStatsBusy", StubKind::Ret1).unwrap();
    table
}

#[test]
fn binds_every_slot() {
    let output = module_output();
    let mut module = load_relocated(&output);
    let report = resolve(&mut module, &full_table()).unwrap();
    assert_eq!(report.native, 2);
    assert_eq!(report.shim, 1);
    assert_eq!(report.state_cell, 1);
    let stubbed: Vec<&str> = report.stubbed.iter().map(|name| &**name).collect();
    assert_eq!(stubbed, ["sigaction", "IsProfileStatsBusy"]);
    assert_eq!(report.bound(), 6);
    assert_eq!(report.slots, 8);
    assert!(module.is_resolved());

    let slot = |idx: usize| word(&module, output.slots[idx]);
    assert_eq!(slot(0), MALLOC as u32);
    assert_eq!(slot(1), FREE as u32);
    assert_eq!(slot(2), MALLOC as u32);
    assert_eq!(slot(3), LOG as u32);
    assert_eq!(slot(4), TOUCH as u32 + 4);
    assert_eq!(slot(5), TOUCH as u32);
    assert_eq!(slot(6), RET0 as u32);
    assert_eq!(slot(7), RET1 as u32);
}

#[rstest]
#[case::strong("malloc")]
#[case::weak("free")]
#[case::state_cell("hasTouchScreen")]
fn every_import_must_be_bound(#[case] missing: &str) {
    let mut table = table();
    for binding in full_table().iter().filter(|b| &*b.name != missing) {
        table.insert(binding.clone()).unwrap();
    }
    let mut module = load_relocated(&module_output());
    match resolve(&mut module, &table) {
        Err(Error::MissingSymbol { name }) => assert_eq!(name, missing),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!module.is_resolved());
}

#[test]
fn first_missing_import_is_reported() {
    // DT_REL references hasTouchScreen before DT_JMPREL references free.
    let mut table = table();
    table.native("malloc", MALLOC).unwrap();
    let mut module = load_relocated(&module_output());
    let err = resolve(&mut module, &table).unwrap_err();
    assert_eq!(err.to_string(), "Missing symbol: hasTouchScreen");
}

#[test]
fn misses_are_never_stubbed() {
    let mut table = full_table();
    // Stubbing must be asked for per name, even for listed ones.
    let mut without = self::table();
    for binding in table.iter().filter(|b| &*b.name != "sigaction") {
        without.insert(binding.clone()).unwrap();
    }
    let mut module = load_relocated(&module_output());
    assert!(matches!(
        resolve(&mut module, &without),
        Err(Error::MissingSymbol { name }) if name == "sigaction"
    ));
    assert!(table.stub("sigaction", StubKind::Ret0).is_err());
}

#[test]
fn only_listed_names_may_be_stubbed() {
    let mut table = table();
    let err = table.stub("malloc", StubKind::Ret0).unwrap_err();
    assert!(err.to_string().contains("malloc is not safe to stub"), "{err}");
    let err = table.stub("IsProfileStatsBusy", StubKind::Ret0).unwrap_err();
    assert!(err.to_string().contains("Ret1"), "{err}");
    assert!(table.is_empty());

    table.stub_all_safe().unwrap();
    assert_eq!(table.len(), SAFE_TO_STUB.len());
    assert_eq!(safe_stub_kind("IsProfileStatsBusy"), Some(StubKind::Ret1));
    assert_eq!(safe_stub_kind("malloc"), None);
    for binding in table.iter() {
        let BindingKind::Stub(kind) = binding.kind else {
            panic!("{} is not a stub", binding.name);
        };
        assert_eq!(binding.address, table.stubs().address(kind));
    }
}

#[test]
fn duplicate_names_are_rejected() {
    let mut table = table();
    table.native("malloc", MALLOC).unwrap();
    let err = table.shim("malloc", FREE).unwrap_err();
    assert!(matches!(err, Error::DuplicateBinding { ref name } if name == "malloc"));
    assert_eq!(table.get("malloc").unwrap().address, MALLOC);
    assert!(table.get("Malloc").is_none());
}

struct Allocator;

impl BindingProvider for Allocator {
    fn name(&self) -> &'static str {
        "allocator"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        table.native("malloc", MALLOC)?;
        table.native("free", FREE)
    }
}

struct Broken;

impl BindingProvider for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        table.stub("free", StubKind::Ret0)
    }
}

#[test]
fn providers_compose_in_order() {
    let mut table = table();
    table.register(&Allocator).unwrap();
    let names: Vec<&str> = table.iter().map(|b| &*b.name).collect();
    assert_eq!(names, ["malloc", "free"]);

    assert!(matches!(
        table.register(&Allocator),
        Err(Error::DuplicateBinding { name }) if name == "malloc"
    ));
    let err = self::table().register(&Broken).unwrap_err();
    assert!(err.to_string().starts_with("Binding error: broken: "), "{err}");
}

#[test]
fn requires_relocation_first() {
    let mut module = load(&module_output());
    assert!(matches!(
        resolve(&mut module, &full_table()),
        Err(Error::Relocation { .. })
    ));
}

#[test]
fn binds_once() {
    let mut module = load_relocated(&module_output());
    resolve(&mut module, &full_table()).unwrap();
    assert!(matches!(
        resolve(&mut module, &full_table()),
        Err(Error::Binding { .. })
    ));
}

#[test]
fn null_addresses_cannot_run() {
    let mut table = table();
    for binding in full_table().iter() {
        let mut binding = binding.clone();
        if &*binding.name == "free" {
            binding.address = 0;
        }
        table.insert(binding).unwrap();
    }
    let mut module = load_relocated(&module_output());
    let err = resolve(&mut module, &table).unwrap_err();
    assert!(err.to_string().contains("free is bound to a null address"), "{err}");
}

#[cfg(target_pointer_width = "64")]
#[test]
fn direct_addresses_must_fit() {
    let mut table = table();
    for binding in full_table().iter() {
        let mut binding = binding.clone();
        if &*binding.name == "malloc" {
            binding.address = 0x7f00_0000_0101;
        }
        table.insert(binding).unwrap();
    }
    let mut module = load_relocated(&module_output());
    let err = resolve(&mut module, &table).unwrap_err();
    assert!(err.to_string().contains("outside the 32-bit address space"), "{err}");
}

#[test]
fn placeholders_stand_in_for_host_addresses() {
    let wide = usize::MAX - 0xFFE;
    let mut table = table();
    for binding in full_table().iter() {
        let mut binding = binding.clone();
        match &*binding.name {
            "malloc" => binding.address = wide,
            "free" => binding.address = 0,
            _ => {}
        }
        table.insert(binding).unwrap();
    }
    let output = module_output();
    let mut module = load_relocated(&output);
    module.set_addressing(NativeAddressing::placeholder());
    resolve(&mut module, &table).unwrap();

    // Assigned in first-reference order, DT_REL before DT_JMPREL.
    let malloc = word(&module, output.slots[0]);
    assert_eq!(malloc, 0x0100_0001);
    assert_eq!(word(&module, output.slots[2]), malloc);
    assert_eq!(word(&module, output.slots[5]), 0x0100_0010);
    assert_eq!(word(&module, output.slots[4]), 0x0100_0014);
    let free = word(&module, output.slots[1]);
    assert_eq!(free, 0x0100_0020);
    assert_eq!(word(&module, output.slots[3]), 0x0100_0031);
    assert!(!module.contains(malloc) && !module.contains(free));
    let NativeAddressing::Placeholder(assigned) = module.addressing() else {
        panic!("addressing changed");
    };
    assert_eq!(assigned.len(), 6);
}
