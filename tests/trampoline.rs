mod common;

use common::{at, build, load_relocated, loader, thumb::{Cpu, EXIT, LR, SP, STACK_TOP, asm}};
use gen_so::{SoOutput, SymbolDesc};
use rstest::rstest;
use so_loader::{
    Error, Module,
    patch::{PatchEngine, Site, Target, trampoline::*},
};
use std::{cell::RefCell, rc::Rc};

const HANDLER: usize = 0x0E00_0101;
const DATA: u32 = 0x6000_0000;
const CELL: u32 = 0x6100_0000;

/// `steer` returns 77 + r5 unless diverted; the trampoline replaces the
/// first instruction and resumes at the `adds`.
fn output() -> SoOutput {
    let symbols = [SymbolDesc::thumb_func_halfwords(
        "steer",
        &[
            asm::movs(0, 77),
            asm::NOP,
            asm::NOP,
            asm::NOP,
            asm::adds(0, 0, 5),
            asm::BX_LR,
        ],
    )];
    build(&[], &symbols)
}

fn resume(output: &SoOutput) -> Site {
    Site::Text(output.symbol("steer").unwrap() + 8)
}

fn spec(output: &SoOutput) -> TrampolineSpec {
    TrampolineSpec::new("steer", Site::Symbol("steer"), resume(output))
}

fn handler() -> Target {
    Target::native("steer_handler", HANDLER)
}

fn install(output: &SoOutput, spec: &TrampolineSpec) -> (Module, u32) {
    let mut module = load_relocated(output);
    let mut engine = PatchEngine::new(&mut module);
    let stub = engine.build_trampoline(spec).unwrap();
    assert_eq!(engine.trampolines(), [(spec.name, stub)]);
    engine.flush();
    (module, stub)
}

/// Fills every register with a recognizable value.
fn scramble(cpu: &mut Cpu) {
    for reg in 0..13 {
        cpu.regs.r[reg] = 0x1000 + reg as u32;
    }
    for reg in 0..32 {
        cpu.regs.s[reg] = 0x2000 + reg as u32;
    }
}

/// Clobbers what the procedure call standard lets a callee clobber.
fn clobber(cpu: &mut Cpu, vfp: bool) {
    for reg in [1, 2, 3, 12] {
        cpu.regs.r[reg] = 0xDEAD_0000 + reg as u32;
    }
    if vfp {
        for reg in 0..16 {
            cpu.regs.s[reg] = 0xBEEF_0000 + reg as u32;
        }
    }
}

#[test]
fn stub_lives_in_the_patch_area() {
    let output = output();
    let spec = spec(&output).handler(handler()).arg(Arg::Core(4));
    let (module, stub) = install(&output, &spec);
    assert_eq!(stub & 1, 1);
    assert!(module.patch_area().contains(&(stub & !1)));
    let site = at(&module, output.symbol("steer").unwrap() & !1);
    assert_eq!(module.read(site, 4).unwrap(), &[0xDF, 0xF8, 0x00, 0xF0]);
    assert_eq!(module.read_u32(site + 4).unwrap(), stub);
    // push.w {r0-r12, lr}; mov r4, sp
    assert_eq!(module.read(stub & !1, 6).unwrap(), &[0x2D, 0xE9, 0xFF, 0x5F, 0x6C, 0x46]);
}

#[test]
fn passes_core_registers_and_writes_back_r0() {
    let output = output();
    let spec = spec(&output)
        .handler(handler())
        .arg(Arg::Core(4))
        .arg(Arg::Core(5))
        .writeback(Writeback::new(Source::R0, Dest::Core(0)));
    let (module, _) = install(&output, &spec);

    let mut cpu = Cpu::new(&module);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    cpu.on(HANDLER as u32, move |cpu| {
        log.borrow_mut().extend([cpu.regs.r[0], cpu.regs.r[1], cpu.regs.r[SP] % 8]);
        cpu.regs.r[0] = cpu.regs.r[0] * 10 + cpu.regs.r[1];
        clobber(cpu, false);
    });
    scramble(&mut cpu);
    cpu.regs.r[4] = 3;
    cpu.regs.r[5] = 4;
    // Misalign the caller's stack by one word.
    cpu.regs.r[SP] = STACK_TOP - 4;
    let before = cpu.regs.clone();

    assert_eq!(cpu.call(at(&module, output.symbol("steer").unwrap()), &[]), 34 + 4);
    assert_eq!(*seen.borrow(), [3, 4, 0]);
    for reg in 1..13 {
        assert_eq!(cpu.regs.r[reg], before.r[reg], "r{reg}");
    }
    assert_eq!(cpu.regs.r[SP], STACK_TOP - 4);
    assert_eq!(cpu.regs.s, before.s);
}

#[test]
fn loads_memory_arguments() {
    let output = output();
    let spec = spec(&output)
        .handler(handler())
        .arg(Arg::Mem { base: Base::Core(4), offset: 8 })
        .arg(Arg::Mem { base: Base::Sp, offset: 4 })
        .arg(Arg::Core(LR as u8))
        .writeback(Writeback::new(Source::R0, Dest::Core(0)));
    let (module, _) = install(&output, &spec);

    let mut cpu = Cpu::new(&module);
    let mut data = vec![0; 16];
    data[8..12].copy_from_slice(&500u32.to_le_bytes());
    cpu.map(DATA, data);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    cpu.on(HANDLER as u32, move |cpu| {
        log.borrow_mut().push(cpu.regs.r[2]);
        cpu.regs.r[0] += cpu.regs.r[1];
    });
    cpu.regs.r[4] = DATA;
    cpu.regs.r[5] = 6;
    cpu.write_u32(STACK_TOP + 4, 20);

    assert_eq!(cpu.call(at(&module, output.symbol("steer").unwrap()), &[]), 526);
    assert_eq!(*seen.borrow(), [EXIT | 1]);
}

#[test]
fn vfp_arguments_and_results() {
    let output = output();
    let spec = spec(&output)
        .handler(handler())
        .arg(Arg::Vfp(3))
        .arg(Arg::Vfp(21))
        .writeback(Writeback::new(Source::S0, Dest::Vfp(2)))
        .writeback(Writeback::new(Source::R1, Dest::Vfp(20)))
        .writeback(Writeback::new(Source::R0, Dest::Core(0)))
        .save_vfp(true);
    let (module, _) = install(&output, &spec);

    let mut cpu = Cpu::new(&module);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    cpu.on(HANDLER as u32, move |cpu| {
        log.borrow_mut().extend([cpu.regs.r[0], cpu.regs.r[1]]);
        clobber(cpu, true);
        cpu.regs.s[0] = 2.5f32.to_bits();
        cpu.regs.r[1] = 0x1234;
        cpu.regs.r[0] = 5;
    });
    scramble(&mut cpu);
    cpu.regs.r[5] = 1;
    cpu.regs.s[3] = 1.5f32.to_bits();
    let before = cpu.regs.clone();

    assert_eq!(cpu.call(at(&module, output.symbol("steer").unwrap()), &[]), 6);
    assert_eq!(*seen.borrow(), [1.5f32.to_bits(), before.s[21]]);
    assert_eq!(cpu.regs.s[2], 2.5f32.to_bits());
    assert_eq!(cpu.regs.s[20], 0x1234);
    for reg in (0..32).filter(|reg| ![2, 20].contains(reg)) {
        assert_eq!(cpu.regs.s[reg], before.s[reg], "s{reg}");
    }
}

#[test]
fn vfp_results_without_saving() {
    let output = output();
    let spec = spec(&output)
        .handler(handler())
        .writeback(Writeback::new(Source::R0, Dest::Vfp(1)))
        .writeback(Writeback::new(Source::R0, Dest::Core(0)));
    let (module, _) = install(&output, &spec);

    let mut cpu = Cpu::new(&module);
    cpu.on(HANDLER as u32, |cpu| cpu.regs.r[0] = 0x3F80_0000);
    cpu.regs.r[5] = 0;
    cpu.call(at(&module, output.symbol("steer").unwrap()), &[]);
    assert_eq!(cpu.regs.s[1], 1.0f32.to_bits());
}

#[test]
fn state_cells_need_no_handler() {
    let output = output();
    let spec = spec(&output).writeback(Writeback::new(
        Source::Cell(Target::native("flag", CELL as usize)),
        Dest::Core(5),
    ));
    let (module, _) = install(&output, &spec);

    let mut cpu = Cpu::new(&module);
    cpu.map(CELL, 11u32.to_le_bytes().to_vec());
    cpu.regs.r[5] = 1000;
    assert_eq!(cpu.call(at(&module, output.symbol("steer").unwrap()), &[100]), 111);
    assert_eq!(cpu.regs.r[5], 11);
    assert!(!cpu.trace.contains(&(HANDLER as u32)));
}

#[rstest]
#[case::resumes(0, 100 + 5)]
#[case::diverts(1, 100)]
fn handler_result_picks_the_continuation(#[case] result: u32, #[case] expected: u32) {
    let output = output();
    // Diverting skips the `adds` and returns straight away.
    let divert = Site::Text(output.symbol("steer").unwrap() + 10);
    let spec = spec(&output).handler(handler()).arg(Arg::Core(0)).divert(divert);
    let (module, _) = install(&output, &spec);

    let mut cpu = Cpu::new(&module);
    cpu.on(HANDLER as u32, move |cpu| {
        clobber(cpu, false);
        cpu.regs.r[0] = result;
    });
    cpu.regs.r[5] = 5;
    assert_eq!(cpu.call(at(&module, output.symbol("steer").unwrap()), &[100]), expected);
}

#[test]
fn stubs_are_allocated_in_sequence() {
    let output = output();
    let mut module = load_relocated(&output);
    let mut engine = PatchEngine::new(&mut module);
    let first = engine
        .build_trampoline(&spec(&output).handler(handler()))
        .unwrap();
    let mut second = spec(&output).handler(handler()).save_vfp(true);
    second.name = "again";
    let second = engine.build_trampoline(&second).unwrap();
    assert!(second > first);
    assert_eq!((second & !1) % 4, 0);
    let names: Vec<&str> = engine.trampolines().iter().map(|t| t.0).collect();
    assert_eq!(names, ["steer", "again"]);
}

#[test]
fn rejected_specs_leave_the_module_alone() {
    let output = output();
    let mut module = load_relocated(&output);
    let site = at(&module, output.symbol("steer").unwrap() & !1);
    let original = module.read(site, 8).unwrap().to_vec();
    let mut engine = PatchEngine::new(&mut module);
    let five = (0..5).fold(spec(&output).handler(handler()), |spec, reg| spec.arg(Arg::Core(reg)));
    assert!(matches!(engine.build_trampoline(&five), Err(Error::Trampoline { .. })));
    let no_handler = spec(&output).arg(Arg::Core(0));
    assert!(matches!(engine.build_trampoline(&no_handler), Err(Error::Trampoline { .. })));
    let bad_site = TrampolineSpec::new("lost", Site::Symbol("lost"), resume(&output));
    assert!(matches!(engine.build_trampoline(&bad_site), Err(Error::MissingSymbol { .. })));
    assert!(engine.trampolines().is_empty());
    assert_eq!(engine.module().read(site, 8).unwrap(), original.as_slice());
}

#[test]
fn patch_area_can_run_out() {
    let output = output();
    let mut module = loader()
        .with_patch_area(0)
        .load(output.data.as_slice())
        .unwrap();
    so_loader::relocate(&mut module).unwrap();
    let mut engine = PatchEngine::new(&mut module);
    let err = engine
        .build_trampoline(&spec(&output).handler(handler()))
        .unwrap_err();
    assert_eq!(err.to_string(), "Trampoline error: patch area exhausted");
}
