mod common;

use common::{BASE, at, build, build_with, halfwords, load, load_relocated, loader, thumb::asm};
use gen_so::{HashStyle, InitEntry, SoWriterConfig, SymbolDesc};
use rstest::rstest;
use so_loader::{DEFAULT_PATCH_AREA, Error, segment::PAGE_SIZE};

fn body() -> Vec<u8> {
    halfwords(&[asm::movs(0, 7), asm::NOP, asm::NOP, asm::BX_LR])
}

fn sample() -> Vec<SymbolDesc> {
    vec![
        SymbolDesc::thumb_func("thumb_fn", &body()),
        SymbolDesc::arm_func("arm_fn", &asm::arm_return(3)),
        SymbolDesc::object("table", &[1, 2, 3, 4, 5, 6, 7, 8]),
    ]
}

fn malformed(bytes: &[u8]) -> String {
    common::init_logger();
    match loader().load(bytes) {
        Err(Error::MalformedImage { msg }) => msg.into_owned(),
        Err(err) => panic!("unexpected error {err}"),
        Ok(_) => panic!("accepted a malformed image"),
    }
}

#[rstest]
#[case::magic(0, 0x7e, "invalid ELF magic")]
#[case::class(4, 2, "expected ELF32")]
#[case::byte_order(5, 2, "byte order mismatch")]
#[case::version(6, 0, "invalid ELF version")]
#[case::machine(18, 62, "expected ARM")]
#[case::executable(16, 2, "not a shared object")]
fn rejects_foreign_headers(#[case] at: usize, #[case] value: u8, #[case] expected: &str) {
    let mut data = build(&[], &sample()).data;
    data[at] = value;
    let msg = malformed(&data);
    assert!(msg.contains(expected), "{msg}");
}

#[test]
fn rejects_truncated_header() {
    let data = build(&[], &sample()).data;
    assert_eq!(malformed(&data[..20]), "truncated ELF header");
}

#[test]
fn rejects_segment_past_end_of_file() {
    let data = build(&[], &sample()).data;
    assert_eq!(
        malformed(&data[..data.len() - 4]),
        "PT_LOAD file contents lie past the end of the file"
    );
}

#[test]
fn rejects_missing_dynamic_segment() {
    let mut data = build(&[], &sample()).data;
    // Third program header: turn PT_DYNAMIC into PT_NULL.
    let phdr = 52 + 2 * 32;
    data[phdr..phdr + 4].copy_from_slice(&0u32.to_le_bytes());
    assert_eq!(malformed(&data), "no PT_DYNAMIC segment");
}

#[test]
fn maps_segments_and_patch_area() {
    let output = build(&[], &sample());
    let module = load(&output);
    assert_eq!(module.guest_base() as usize % PAGE_SIZE, 0);
    if module.base() > u32::MAX as usize {
        assert_eq!(module.guest_base(), BASE);
    }
    assert_eq!(module.name(), "<memory>");
    assert_eq!(module.text_base(), module.guest_base());
    assert_eq!(module.segments().len(), 2);
    assert!(module.image_len() >= output.image_end as usize);
    assert_eq!(module.len(), module.image_len() + DEFAULT_PATCH_AREA);
    let patch = module.patch_area();
    assert_eq!(patch.start, at(&module, module.image_len() as u32));
    assert_eq!((patch.end - patch.start) as usize, DEFAULT_PATCH_AREA);

    let thumb = output.symbol("thumb_fn").unwrap() & !1;
    assert_eq!(module.read(at(&module, thumb), 8).unwrap(), body().as_slice());
    let table = output.symbol("table").unwrap();
    assert_eq!(module.read(at(&module, table), 8).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(!module.is_relocated());
    assert!(!module.is_resolved());
}

#[test]
fn zero_fills_bss() {
    let output = build_with(SoWriterConfig::default().with_bss(0x2000), &[], &sample());
    let module = load(&output);
    let bss = at(&module, output.image_end - 0x2000);
    assert!(module.read(bss, 0x2000).unwrap().iter().all(|&b| b == 0));
    assert!(module.contains(at(&module, output.image_end - 1)));
}

#[test]
fn custom_patch_area() {
    let output = build(&[], &sample());
    let module = loader()
        .with_patch_area(0x100)
        .load(output.data.as_slice())
        .unwrap();
    assert_eq!(module.len() - module.image_len(), 0x1000);
    assert!(!module.contains(module.guest_base().wrapping_add(module.len() as u32)));
}

#[test]
fn reads_dynamic_names() {
    let config = SoWriterConfig::default()
        .with_soname("libGTASA.so")
        .with_needed("libc.so")
        .with_needed("libGLESv2.so");
    let module = load(&build_with(config, &[], &sample()));
    assert_eq!(module.soname(), Some("libGTASA.so"));
    assert_eq!(module.needed_libs(), ["libc.so", "libGLESv2.so"]);
}

#[rstest]
#[case(HashStyle::Sysv)]
#[case(HashStyle::Gnu)]
#[case(HashStyle::Both)]
fn looks_up_exports(#[case] hash: HashStyle) {
    let mut symbols = sample();
    symbols.push(SymbolDesc::undefined_func("malloc"));
    let output = build_with(SoWriterConfig::default().with_hash(hash), &[], &symbols);
    let module = load(&output);

    assert_eq!(module.symbols().len(), 3);
    let thumb = module.symbol("thumb_fn").unwrap();
    assert!(thumb.is_func);
    assert_eq!(thumb.offset, output.symbol("thumb_fn").unwrap());
    assert_eq!(thumb.offset & 1, 1);
    assert_eq!(thumb.size, 8);
    let arm = module.symbol("arm_fn").unwrap();
    assert_eq!(arm.offset & 1, 0);
    let table = module.symbol("table").unwrap();
    assert!(!table.is_func);
    assert_eq!(table.size, 8);

    assert_eq!(
        module.symbol_address("thumb_fn"),
        Some(at(&module, output.symbol("thumb_fn").unwrap()))
    );
    assert!(module.symbol("malloc").is_none());
    assert!(module.symbol("Thumb_fn").is_none());
    assert!(module.symbol_address("missing").is_none());
}

#[test]
fn local_symbols_are_not_exported() {
    let mut symbols = sample();
    symbols.push(SymbolDesc::object("hidden", &[0; 4]).with_scope(gen_so::SymbolScope::Local));
    let module = load(&build(&[], &symbols));
    assert!(module.symbol("hidden").is_none());
    assert!(module.symbol("table").is_some());
}

#[test]
fn initializers_run_init_then_array() {
    let mut symbols = sample();
    for name in ["init", "first", "second"] {
        symbols.push(SymbolDesc::thumb_func(name, &body()));
    }
    let config = SoWriterConfig::default()
        .with_init("init")
        .with_init_array(vec![
            InitEntry::Func("first".into()),
            InitEntry::Raw(0),
            InitEntry::Raw(u32::MAX),
            InitEntry::Func("second".into()),
        ]);
    let output = build_with(config, &[], &symbols);
    let module = load_relocated(&output);
    let expected: Vec<u32> = ["init", "first", "second"]
        .iter()
        .map(|name| at(&module, output.symbol(name).unwrap()))
        .collect();
    assert_eq!(module.initializers().unwrap(), expected);
}

#[test]
fn entry_point_is_translated() {
    let output = build_with(SoWriterConfig::default().with_entry("thumb_fn"), &[], &sample());
    let module = load(&output);
    assert_eq!(module.entry(), Some(at(&module, output.symbol("thumb_fn").unwrap())));
    assert_eq!(load(&build(&[], &sample())).entry(), None);
}

#[test]
fn reads_outside_the_mapping_fail() {
    let module = load(&build(&[], &sample()));
    let end = module.guest_base().wrapping_add(module.len() as u32);
    assert!(matches!(
        module.read(end - 2, 4),
        Err(Error::PatchOutOfBounds { len: 4, .. })
    ));
    assert!(module.read(module.guest_base().wrapping_sub(4), 4).is_err());
    assert!(module.host_address(module.guest_base()).is_some());
    assert!(module.host_address(end + 0x10).is_none());
}

#[test]
fn sealed_memory_rejects_writes() {
    let output = build(&[], &sample());
    let mut module = load_relocated(&output);
    let table = at(&module, output.symbol("table").unwrap());
    module.memory_mut().write_u32(table, 0xAABB_CCDD).unwrap();
    module.seal().unwrap();
    assert!(module.is_sealed());
    assert_eq!(module.read_u32(table).unwrap(), 0xAABB_CCDD);
    assert!(matches!(
        module.memory_mut().write_u32(table, 0),
        Err(Error::Mmap { .. })
    ));
}
