//! A tiny ARM/Thumb-2 interpreter covering the instructions the patch engine
//! emits, plus the few the synthetic modules are written with.
use so_loader::Module;
use std::collections::HashMap;

pub const SP: usize = 13;
pub const LR: usize = 14;
pub const PC: usize = 15;

/// Return address handed to the code under test; reaching it ends a run.
pub const EXIT: u32 = 0xFFFF_FFF0;
const STACK_BASE: u32 = 0x7000_0000;
const STACK_SIZE: usize = 0x1_0000;
/// Initial stack pointer, leaving room above it for caller frames.
pub const STACK_TOP: u32 = STACK_BASE + 0x8000;
const MAX_STEPS: usize = 100_000;

pub type Handler = Box<dyn FnMut(&mut Cpu)>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Regs {
    pub r: [u32; 16],
    pub s: [u32; 32],
}

/// Guest memory made of disjoint regions.
pub struct Cpu {
    pub regs: Regs,
    thumb: bool,
    /// Z flag, the only one the emitted code tests.
    zero: bool,
    /// Condition of a pending single-instruction `it` block.
    it_ne: Option<bool>,
    regions: Vec<(u32, Vec<u8>)>,
    handlers: HashMap<u32, Handler>,
    /// Addresses branched to, in order.
    pub trace: Vec<u32>,
}

impl Cpu {
    /// Copies the whole mapping of `module`, patch area included.
    pub fn new(module: &Module) -> Self {
        let base = module.guest_base();
        let image = module.read(base, module.len()).unwrap().to_vec();
        let mut regions = vec![(base, image), (STACK_BASE, vec![0; STACK_SIZE])];
        regions.sort_by_key(|r| r.0);
        let mut regs = Regs::default();
        regs.r[SP] = STACK_TOP;
        Self {
            regs,
            thumb: true,
            zero: false,
            it_ne: None,
            regions,
            handlers: HashMap::new(),
            trace: Vec::new(),
        }
    }

    /// Adds a data region, e.g. for a host state cell.
    pub fn map(&mut self, base: u32, bytes: Vec<u8>) {
        self.regions.push((base, bytes));
    }

    /// Runs `handler` whenever control reaches `addr`, then returns to `lr`.
    pub fn on(&mut self, addr: u32, handler: impl FnMut(&mut Cpu) + 'static) {
        self.handlers.insert(addr & !1, Box::new(handler));
    }

    fn locate(&self, addr: u32, len: usize) -> (usize, usize) {
        for (idx, (base, bytes)) in self.regions.iter().enumerate() {
            let off = addr.wrapping_sub(*base) as usize;
            if addr >= *base && off + len <= bytes.len() {
                return (idx, off);
            }
        }
        panic!("access of {len} bytes at 0x{addr:08x} is unmapped");
    }

    pub fn read(&self, addr: u32, len: usize) -> &[u8] {
        let (idx, off) = self.locate(addr, len);
        &self.regions[idx].1[off..off + len]
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        u16::from_le_bytes(self.read(addr, 2).try_into().unwrap())
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.read(addr, 4).try_into().unwrap())
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) {
        let (idx, off) = self.locate(addr, 4);
        self.regions[idx].1[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn branch(&mut self, target: u32) {
        self.trace.push(target);
        self.thumb = target & 1 != 0;
        self.regs.r[PC] = target & !1;
    }

    /// Calls `func` with up to four core arguments and returns `r0`.
    pub fn call(&mut self, func: u32, args: &[u32]) -> u32 {
        self.regs.r[..args.len()].copy_from_slice(args);
        self.regs.r[LR] = EXIT | 1;
        self.branch(func);
        self.run();
        self.regs.r[0]
    }

    /// Executes from the current `pc` until control reaches [`EXIT`].
    pub fn run(&mut self) {
        for _ in 0..MAX_STEPS {
            let pc = self.regs.r[PC];
            if pc == EXIT {
                return;
            }
            if let Some(mut handler) = self.handlers.remove(&pc) {
                handler(self);
                self.handlers.insert(pc, handler);
                let lr = self.regs.r[LR];
                self.branch(lr);
                continue;
            }
            if self.thumb {
                self.step_thumb(pc);
            } else {
                self.step_arm(pc);
            }
        }
        panic!("no exit after {MAX_STEPS} instructions");
    }

    fn step_arm(&mut self, pc: u32) {
        let insn = self.read_u32(pc);
        self.regs.r[PC] = pc + 4;
        match insn {
            // ldr pc, [pc, #-4]
            0xE51F_F004 => {
                let dest = self.read_u32(pc + 4);
                self.branch(dest);
            }
            // bx rm
            _ if insn & 0xFFFF_FFF0 == 0xE12F_FF10 => {
                let dest = self.regs.r[(insn & 0xF) as usize];
                self.branch(dest);
            }
            // mov rd, #imm8
            _ if insn & 0xFFF0_0F00 == 0xE3A0_0000 => {
                self.regs.r[((insn >> 12) & 0xF) as usize] = insn & 0xFF;
            }
            _ => panic!("unsupported ARM instruction 0x{insn:08x} at 0x{pc:08x}"),
        }
    }

    fn step_thumb(&mut self, pc: u32) {
        let hw1 = self.read_u16(pc);
        let wide = hw1 >> 11 >= 0b11101;
        self.regs.r[PC] = pc + if wide { 4 } else { 2 };
        if self.it_ne.take() == Some(false) {
            return;
        }
        if wide {
            let hw2 = self.read_u16(pc + 2);
            self.exec32(pc, hw1, hw2);
        } else {
            self.exec16(pc, hw1);
        }
    }

    fn exec16(&mut self, pc: u32, hw: u16) {
        let r = &mut self.regs.r;
        match hw {
            0xBF00 => {}
            // it ne, one instruction
            0xBF18 => self.it_ne = Some(!self.zero),
            // cmp rn, #imm8
            _ if hw & 0xF800 == 0x2800 => self.zero = r[((hw >> 8) & 7) as usize] == (hw & 0xFF) as u32,
            // movs rd, #imm8
            _ if hw & 0xF800 == 0x2000 => r[((hw >> 8) & 7) as usize] = (hw & 0xFF) as u32,
            // adds rd, rn, rm
            _ if hw & 0xFE00 == 0x1800 => {
                let (rm, rn, rd) = ((hw >> 6) & 7, (hw >> 3) & 7, hw & 7);
                r[rd as usize] = r[rn as usize].wrapping_add(r[rm as usize]);
            }
            // mov rd, rm (high registers)
            _ if hw & 0xFF00 == 0x4600 => {
                let rd = (((hw >> 7) & 1) << 3) | (hw & 7);
                let rm = (hw >> 3) & 0xF;
                r[rd as usize] = r[rm as usize];
            }
            // blx rm
            _ if hw & 0xFF87 == 0x4780 => {
                let dest = r[((hw >> 3) & 0xF) as usize];
                r[LR] = (pc + 2) | 1;
                self.branch(dest);
            }
            // bx rm
            _ if hw & 0xFF87 == 0x4700 => {
                let dest = r[((hw >> 3) & 0xF) as usize];
                self.branch(dest);
            }
            _ => panic!("unsupported Thumb instruction 0x{hw:04x} at 0x{pc:08x}"),
        }
    }

    fn exec32(&mut self, pc: u32, hw1: u16, hw2: u16) {
        let rn = (hw1 & 0xF) as usize;
        let rt = (hw2 >> 12) as usize;
        let imm12 = (hw2 & 0xFFF) as u32;
        match hw1 {
            // ldr.w rt, [rn, #imm12]
            _ if hw1 & 0xFFF0 == 0xF8D0 => {
                let base = if rn == PC { (pc + 4) & !3 } else { self.regs.r[rn] };
                let value = self.read_u32(base.wrapping_add(imm12));
                if rt == PC {
                    self.branch(value);
                } else {
                    self.regs.r[rt] = value;
                }
            }
            // str.w rt, [rn, #imm12]
            _ if hw1 & 0xFFF0 == 0xF8C0 => {
                let addr = self.regs.r[rn].wrapping_add(imm12);
                self.write_u32(addr, self.regs.r[rt]);
            }
            // push.w {list}
            0xE92D => {
                let list = hw2;
                let count = list.count_ones();
                let mut addr = self.regs.r[SP] - 4 * count;
                self.regs.r[SP] = addr;
                for reg in (0..16).filter(|reg| list & (1 << reg) != 0) {
                    self.write_u32(addr, self.regs.r[reg]);
                    addr += 4;
                }
            }
            // pop.w {list}
            0xE8BD => {
                let mut addr = self.regs.r[SP];
                let mut dest = None;
                for reg in (0..16).filter(|reg| hw2 & (1 << reg) != 0) {
                    let value = self.read_u32(addr);
                    if reg == PC {
                        dest = Some(value);
                    } else {
                        self.regs.r[reg] = value;
                    }
                    addr += 4;
                }
                self.regs.r[SP] = addr;
                if let Some(dest) = dest {
                    self.branch(dest);
                }
            }
            // vpush {d<first>-...}
            0xED2D if hw2 & 0x0F00 == 0x0B00 => {
                let first = 2 * (hw2 >> 12) as usize;
                let words = (hw2 & 0xFF) as usize;
                let mut addr = self.regs.r[SP] - 4 * words as u32;
                self.regs.r[SP] = addr;
                for idx in first..first + words {
                    self.write_u32(addr, self.regs.s[idx]);
                    addr += 4;
                }
            }
            // vpop {d<first>-...}
            0xECBD if hw2 & 0x0F00 == 0x0B00 => {
                let first = 2 * (hw2 >> 12) as usize;
                let words = (hw2 & 0xFF) as usize;
                let mut addr = self.regs.r[SP];
                for idx in first..first + words {
                    self.regs.s[idx] = self.read_u32(addr);
                    addr += 4;
                }
                self.regs.r[SP] = addr;
            }
            // vmov rt, sn / vmov sn, rt
            _ if hw1 & 0xFFE0 == 0xEE00 && hw2 & 0x0F7F == 0x0A10 => {
                let sn = (((hw1 & 0xF) << 1) | ((hw2 >> 7) & 1)) as usize;
                if hw1 & 0x10 != 0 {
                    self.regs.r[rt] = self.regs.s[sn];
                } else {
                    self.regs.s[sn] = self.regs.r[rt];
                }
            }
            // bic.w rd, rn, #imm8
            _ if hw1 & 0xFBF0 == 0xF020 && hw2 & 0x7000 == 0 => {
                let rd = ((hw2 >> 8) & 0xF) as usize;
                self.regs.r[rd] = self.regs.r[rn] & !((hw2 & 0xFF) as u32);
            }
            _ => panic!("unsupported Thumb-2 instruction 0x{hw1:04x} 0x{hw2:04x} at 0x{pc:08x}"),
        }
    }
}

/// Thumb encodings used to write test functions.
pub mod asm {
    pub const NOP: u16 = 0xBF00;
    pub const BX_LR: u16 = 0x4770;

    pub const fn movs(rd: u16, imm8: u16) -> u16 {
        0x2000 | (rd << 8) | imm8
    }

    pub const fn adds(rd: u16, rn: u16, rm: u16) -> u16 {
        0x1800 | (rm << 6) | (rn << 3) | rd
    }

    /// `mov r<rd>, #imm8` and `bx lr` in ARM state.
    pub fn arm_return(imm8: u8) -> Vec<u8> {
        let mut code = (0xE3A0_0000u32 | imm8 as u32).to_le_bytes().to_vec();
        code.extend_from_slice(&0xE12F_FF1Eu32.to_le_bytes());
        code
    }
}
