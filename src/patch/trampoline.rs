//! Declarative trampolines and the Thumb-2 stub generated from them.
//!
//! A trampoline diverts a site inside a function to a host handler and then
//! continues at a resume point of the same function. The stub looks like this:
//!
//! ```text
//! push.w  {r0-r12, lr}        @ frame: every core register at the site
//! vpush   {d0-d7}             @ optional
//! mov     r4, sp              @ r4 addresses the frame from here on
//! mov     ip, sp
//! bic.w   ip, ip, #7
//! mov     sp, ip              @ 8-byte aligned for the call
//! ...                         @ load arguments from the frame, VFP or memory
//! ldr.w   ip, [pc, #handler]
//! blx     ip
//! cmp     r0, #0              @ only with a divert site
//! ...                         @ results into frame slots or VFP registers
//! mov     sp, r4
//! vpop    {d0-d7}
//! pop.w   {r0-r12, lr}
//! it      ne                  @ only with a divert site
//! ldr.w   pc, [pc, #divert]
//! ldr.w   pc, [pc, #resume]
//! .word   handler, resume, cells...
//! ```
//!
//! Nothing but the registers named by a [`Writeback`] differs between the site
//! and the resume point. None of the instructions between the `cmp` and the
//! `it` touch the flags.
use super::{
    Site, Target,
    thumb::{self, IP, LR, PC, SP},
};
use crate::{Result, trampoline_error};
use alloc::{format, vec::Vec};

const MAX_ARGS: usize = 4;
const SAVED_CORE: u16 = 0x1FFF | thumb::reg_bit(LR);
const SAVED_CORE_BYTES: u16 = 14 * 4;
const SAVED_VFP_BYTES: u16 = 8 * 8;

/// Where the stub finds the value of one handler argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg {
    /// A core register as it was at the site (`r0`-`r12`, `lr`).
    Core(u8),
    /// The bits of a single-precision register (`s0`-`s31`).
    Vfp(u8),
    /// The word at `[base + offset]`, with the base as it was at the site.
    Mem { base: Base, offset: u16 },
}

/// Base register of an [`Arg::Mem`] load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Base {
    Core(u8),
    /// The stack pointer at the site.
    Sp,
}

/// A value produced by the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// The handler's `r0`.
    R0,
    /// The handler's `r1`, the high word of a 64-bit result.
    R1,
    /// The handler's `s0`, a float result under the hard-float convention.
    S0,
    /// The word stored at an address, read after the call.
    Cell(Target),
}

/// Register the module sees after the trampoline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dest {
    Core(u8),
    Vfp(u8),
}

/// One result written back into the module's register state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Writeback {
    pub source: Source,
    pub dest: Dest,
}

impl Writeback {
    pub fn new(source: Source, dest: Dest) -> Self {
        Self { source, dest }
    }
}

/// Description of one trampoline.
///
/// # Examples
/// ```rust
/// use so_loader::patch::{Site, Target, trampoline::*};
///
/// // r0 = handler(r4, r8) in s0, then continue 0x60 bytes further.
/// let spec = TrampolineSpec::new("rudder", Site::Text(0x1001), Site::Text(0x1061))
///     .handler(Target::Native { name: "rudder", addr: 0x4001 })
///     .arg(Arg::Core(4))
///     .arg(Arg::Core(8))
///     .writeback(Writeback::new(Source::S0, Dest::Vfp(0)))
///     .save_vfp(true);
/// assert_eq!(spec.args.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrampolineSpec {
    pub name: &'static str,
    pub site: Site,
    pub resume: Site,
    /// Where the module continues instead of `resume` when the handler
    /// returns non-zero in `r0`.
    pub divert: Option<Site>,
    pub handler: Option<Target>,
    pub args: Vec<Arg>,
    pub writebacks: Vec<Writeback>,
    /// Save and restore `d0`-`d7` around the call.
    pub save_vfp: bool,
}

impl TrampolineSpec {
    pub fn new(name: &'static str, site: Site, resume: Site) -> Self {
        Self {
            name,
            site,
            resume,
            divert: None,
            handler: None,
            args: Vec::new(),
            writebacks: Vec::new(),
            save_vfp: false,
        }
    }

    pub fn handler(mut self, handler: Target) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn divert(mut self, site: Site) -> Self {
        self.divert = Some(site);
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn writeback(mut self, writeback: Writeback) -> Self {
        self.writebacks.push(writeback);
        self
    }

    pub fn save_vfp(mut self, save: bool) -> Self {
        self.save_vfp = save;
        self
    }

    /// Checks everything that does not depend on the module.
    pub fn validate(&self) -> Result<()> {
        let err = |what: &str| Err(trampoline_error(format!("{}: {what}", self.name)));
        if self.args.len() > MAX_ARGS {
            return err("more than 4 arguments");
        }
        if self.handler.is_none() {
            if !self.args.is_empty() {
                return err("arguments without a handler");
            }
            if self.divert.is_some() {
                return err("divert site without a handler");
            }
            if self
                .writebacks
                .iter()
                .any(|wb| !matches!(wb.source, Source::Cell(_)))
            {
                return err("result writeback without a handler");
            }
        }
        let frame = self.frame_bytes();
        for arg in &self.args {
            match *arg {
                Arg::Core(reg) if !is_saved_core(reg) => return err("argument register not saved"),
                Arg::Vfp(reg) if reg > 31 => return err("no such VFP register"),
                Arg::Mem {
                    base: Base::Core(reg),
                    offset,
                } if !is_saved_core(reg) || offset > 0xFFF => {
                    return err("memory argument out of encoding range");
                }
                Arg::Mem {
                    base: Base::Sp,
                    offset,
                } if offset as u32 + frame as u32 > 0xFFF => {
                    return err("stack argument out of encoding range");
                }
                _ => {}
            }
        }
        for wb in &self.writebacks {
            match wb.dest {
                Dest::Core(reg) if !is_saved_core(reg) => return err("cannot write back to sp or pc"),
                Dest::Vfp(reg) if reg > 31 => return err("no such VFP register"),
                _ => {}
            }
        }
        Ok(())
    }

    fn frame_bytes(&self) -> u16 {
        SAVED_CORE_BYTES + if self.save_vfp { SAVED_VFP_BYTES } else { 0 }
    }

    /// Offset of a saved core register from the frame pointer.
    fn core_slot(&self, reg: u8) -> u16 {
        let vfp = if self.save_vfp { SAVED_VFP_BYTES } else { 0 };
        let idx = if reg == LR { 13 } else { reg as u16 };
        vfp + idx * 4
    }

    /// Offset of a saved single-precision register, if it is in the frame.
    fn vfp_slot(&self, reg: u8) -> Option<u16> {
        (self.save_vfp && reg < 16).then_some(reg as u16 * 4)
    }
}

fn is_saved_core(reg: u8) -> bool {
    reg <= IP || reg == LR
}

/// Addresses the stub needs, resolved by the engine.
pub(crate) struct Resolved {
    pub(crate) handler: Option<u32>,
    pub(crate) resume: u32,
    pub(crate) divert: Option<u32>,
    /// One entry per [`Source::Cell`] writeback, in order.
    pub(crate) cells: Vec<u32>,
}

/// Stub code with its literal pool still symbolic.
struct Assembler {
    code: Vec<u16>,
    /// `(halfword index of the ldr.w, literal value)`.
    literals: Vec<(usize, u32)>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            code: Vec::new(),
            literals: Vec::new(),
        }
    }

    fn op16(&mut self, half: u16) {
        self.code.push(half);
    }

    fn op32(&mut self, [hw1, hw2]: [u16; 2]) {
        self.code.push(hw1);
        self.code.push(hw2);
    }

    fn load_literal(&mut self, rt: u8, value: u32) {
        self.literals.push((self.code.len(), value));
        self.op32(thumb::ldr_w(rt, PC, 0));
    }

    /// Lays out the pool after the code and fixes every literal load.
    fn finish(mut self) -> Result<Vec<u8>> {
        let code_len = self.code.len() * 2;
        let pool_start = (code_len + 3) & !3;
        let mut pool: Vec<u32> = Vec::new();
        for &(at, value) in &self.literals {
            let slot = match pool.iter().position(|&v| v == value) {
                Some(slot) => slot,
                None => {
                    pool.push(value);
                    pool.len() - 1
                }
            };
            let lit = pool_start + slot * 4;
            let pc = (at * 2 + 4) & !3;
            let imm = lit - pc;
            if imm > 0xFFF {
                return Err(trampoline_error("literal pool out of range"));
            }
            self.code[at + 1] = (self.code[at + 1] & 0xF000) | imm as u16;
        }
        let mut bytes = Vec::with_capacity(pool_start + pool.len() * 4);
        for half in &self.code {
            bytes.extend_from_slice(&half.to_le_bytes());
        }
        if pool_start > code_len {
            bytes.extend_from_slice(&thumb::NOP.to_le_bytes());
        }
        for word in pool {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Ok(bytes)
    }
}

/// Generates the stub for `spec`.
///
/// The stub is position independent: it only addresses its own literal pool.
/// `spec` must have passed [`TrampolineSpec::validate`].
pub(crate) fn assemble(spec: &TrampolineSpec, resolved: &Resolved) -> Result<Vec<u8>> {
    const FP: u8 = 4;
    let mut asm = Assembler::new();

    asm.op32(thumb::push_w(SAVED_CORE));
    if spec.save_vfp {
        asm.op32(thumb::vpush(0, 8));
    }
    asm.op16(thumb::mov(FP, SP));
    asm.op16(thumb::mov(IP, SP));
    asm.op32(thumb::bic_w(IP, IP, 7));
    asm.op16(thumb::mov(SP, IP));

    for (idx, arg) in spec.args.iter().enumerate() {
        let rt = idx as u8;
        match *arg {
            Arg::Core(reg) => asm.op32(thumb::ldr_w(rt, FP, spec.core_slot(reg))),
            Arg::Vfp(reg) => asm.op32(thumb::vmov_to_core(rt, reg)),
            Arg::Mem {
                base: Base::Core(reg),
                offset,
            } => {
                asm.op32(thumb::ldr_w(IP, FP, spec.core_slot(reg)));
                asm.op32(thumb::ldr_w(rt, IP, offset));
            }
            Arg::Mem {
                base: Base::Sp,
                offset,
            } => asm.op32(thumb::ldr_w(rt, FP, spec.frame_bytes() + offset)),
        }
    }

    if let Some(handler) = resolved.handler {
        asm.load_literal(IP, handler);
        asm.op16(thumb::blx(IP));
        if resolved.divert.is_some() {
            asm.op16(thumb::cmp_imm(0, 0));
        }
    }

    let mut cells = resolved.cells.iter();
    for wb in &spec.writebacks {
        let reg = match &wb.source {
            Source::R0 => 0,
            Source::R1 => 1,
            Source::S0 => {
                asm.op32(thumb::vmov_to_core(IP, 0));
                IP
            }
            Source::Cell(_) => {
                let addr = *cells
                    .next()
                    .ok_or_else(|| trampoline_error("unresolved state cell"))?;
                asm.load_literal(IP, addr);
                asm.op32(thumb::ldr_w(IP, IP, 0));
                IP
            }
        };
        match wb.dest {
            Dest::Core(dest) => asm.op32(thumb::str_w(reg, FP, spec.core_slot(dest))),
            Dest::Vfp(dest) => match spec.vfp_slot(dest) {
                Some(slot) => asm.op32(thumb::str_w(reg, FP, slot)),
                None => asm.op32(thumb::vmov_from_core(dest, reg)),
            },
        }
    }

    asm.op16(thumb::mov(SP, FP));
    if spec.save_vfp {
        asm.op32(thumb::vpop(0, 8));
    }
    asm.op32(thumb::pop_w(SAVED_CORE));
    if let Some(divert) = resolved.divert {
        asm.op16(thumb::IT_NE);
        asm.load_literal(PC, divert);
    }
    asm.load_literal(PC, resolved.resume);
    asm.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TrampolineSpec {
        TrampolineSpec::new("t", Site::Text(0x101), Site::Text(0x121))
    }

    #[test]
    fn rejects_bad_descriptions() {
        assert!(spec().arg(Arg::Core(0)).validate().is_err());
        let with_handler = spec().handler(Target::Site(Site::Text(0x201)));
        assert!(with_handler.clone().arg(Arg::Core(SP)).validate().is_err());
        assert!(with_handler.clone().arg(Arg::Vfp(32)).validate().is_err());
        assert!(
            with_handler
                .clone()
                .writeback(Writeback::new(Source::R0, Dest::Core(PC)))
                .validate()
                .is_err()
        );
        let five = (0..5).fold(with_handler.clone(), |spec, r| spec.arg(Arg::Core(r)));
        assert!(five.validate().is_err());
        assert!(
            spec()
                .writeback(Writeback::new(Source::R0, Dest::Core(0)))
                .validate()
                .is_err()
        );
        assert!(spec().divert(Site::Text(0x141)).validate().is_err());
        assert!(with_handler.arg(Arg::Core(LR)).validate().is_ok());
    }

    #[test]
    fn literal_loads_reach_the_pool() {
        let spec = spec()
            .handler(Target::Site(Site::Text(0x201)))
            .arg(Arg::Core(4));
        let resolved = Resolved {
            handler: Some(0x1234_5679),
            resume: 0x1000_0121,
            divert: None,
            cells: Vec::new(),
        };
        let bytes = assemble(&spec, &resolved).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        let pool = &bytes[bytes.len() - 8..];
        assert_eq!(&pool[..4], &0x1234_5679u32.to_le_bytes());
        assert_eq!(&pool[4..], &0x1000_0121u32.to_le_bytes());
    }

    #[test]
    fn divert_is_conditional_on_r0() {
        let spec = spec()
            .handler(Target::Site(Site::Text(0x201)))
            .divert(Site::Text(0x141));
        let resolved = Resolved {
            handler: Some(0x1234_5679),
            resume: 0x1000_0121,
            divert: Some(0x1000_0141),
            cells: Vec::new(),
        };
        let bytes = assemble(&spec, &resolved).unwrap();
        let halves: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let blx = halves.iter().position(|&h| h == thumb::blx(IP)).unwrap();
        assert_eq!(halves[blx + 1], thumb::cmp_imm(0, 0));
        let it = halves.iter().position(|&h| h == thumb::IT_NE).unwrap();
        assert_eq!(halves[it - 2..it], thumb::pop_w(SAVED_CORE));
        assert_eq!(halves[it + 1], 0xF8DF);
        assert_eq!(halves[it + 3], 0xF8DF);
        let pool = &bytes[bytes.len() - 12..];
        assert_eq!(&pool[4..8], &0x1000_0141u32.to_le_bytes());
        assert_eq!(&pool[8..], &0x1000_0121u32.to_le_bytes());
    }
}
