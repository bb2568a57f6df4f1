//! Encoders for the handful of ARM and Thumb-2 instructions the engine emits.
//!
//! 32-bit Thumb instructions are returned as two halfwords in execution
//! order; each halfword is stored little endian.

/// `nop` (T1).
pub const NOP: u16 = 0xBF00;
/// `it ne` covering one instruction.
pub const IT_NE: u16 = 0xBF18;
/// `ldr pc, [pc, #-4]` (A1): jump to the word that follows.
pub const ARM_LDR_PC_NEXT: u32 = 0xE51F_F004;

pub const SP: u8 = 13;
pub const LR: u8 = 14;
pub const PC: u8 = 15;
pub const IP: u8 = 12;

/// `ldr.w rt, [rn, #imm12]` (T3). With `rn == PC` this is the literal form
/// and the base is the word-aligned address of the instruction plus 4.
#[inline]
pub const fn ldr_w(rt: u8, rn: u8, imm12: u16) -> [u16; 2] {
    [0xF8D0 | rn as u16, ((rt as u16) << 12) | (imm12 & 0xFFF)]
}

/// `str.w rt, [rn, #imm12]` (T3).
#[inline]
pub const fn str_w(rt: u8, rn: u8, imm12: u16) -> [u16; 2] {
    [0xF8C0 | rn as u16, ((rt as u16) << 12) | (imm12 & 0xFFF)]
}

/// `push.w {list}` (STMDB sp!, T2).
#[inline]
pub const fn push_w(list: u16) -> [u16; 2] {
    [0xE92D, list]
}

/// `pop.w {list}` (LDMIA sp!, T2).
#[inline]
pub const fn pop_w(list: u16) -> [u16; 2] {
    [0xE8BD, list]
}

/// `vpush {d<first>-d<first+count-1>}` for `first < 16`.
#[inline]
pub const fn vpush(first: u8, count: u8) -> [u16; 2] {
    [0xED2D, ((first as u16) << 12) | 0x0B00 | (count as u16 * 2)]
}

/// `vpop {d<first>-d<first+count-1>}` for `first < 16`.
#[inline]
pub const fn vpop(first: u8, count: u8) -> [u16; 2] {
    [0xECBD, ((first as u16) << 12) | 0x0B00 | (count as u16 * 2)]
}

/// `vmov rt, s<n>`.
#[inline]
pub const fn vmov_to_core(rt: u8, sn: u8) -> [u16; 2] {
    [
        0xEE10 | (sn as u16 >> 1),
        ((rt as u16) << 12) | 0x0A10 | ((sn as u16 & 1) << 7),
    ]
}

/// `vmov s<n>, rt`.
#[inline]
pub const fn vmov_from_core(sn: u8, rt: u8) -> [u16; 2] {
    [
        0xEE00 | (sn as u16 >> 1),
        ((rt as u16) << 12) | 0x0A10 | ((sn as u16 & 1) << 7),
    ]
}

/// `mov rd, rm` (T1), any two registers.
#[inline]
pub const fn mov(rd: u8, rm: u8) -> u16 {
    0x4600 | (((rd as u16) & 8) << 4) | ((rm as u16) << 3) | (rd as u16 & 7)
}

/// `cmp rn, #imm8` (T1) for `rn < 8`.
#[inline]
pub const fn cmp_imm(rn: u8, imm8: u8) -> u16 {
    0x2800 | ((rn as u16) << 8) | imm8 as u16
}

/// `bic.w rd, rn, #imm8` for an unrotated 8-bit immediate.
#[inline]
pub const fn bic_w(rd: u8, rn: u8, imm8: u8) -> [u16; 2] {
    [0xF020 | rn as u16, ((rd as u16) << 8) | imm8 as u16]
}

/// `blx rm`.
#[inline]
pub const fn blx(rm: u8) -> u16 {
    0x4780 | ((rm as u16) << 3)
}

/// Register list bit for `reg`.
#[inline]
pub const fn reg_bit(reg: u8) -> u16 {
    1 << reg
}

/// Bytes redirecting a Thumb site at `addr` (Thumb bit clear) to `dest`.
///
/// `ldr.w pc, [pc]` reads the word 4 bytes past the instruction, so a site
/// that is not word aligned is padded with one `nop` first.
pub fn thumb_hook(addr: u32, dest: u32) -> ([u8; 10], usize) {
    let mut out = [0; 10];
    let mut len = 0;
    let mut put = |half: u16| {
        out[len..len + 2].copy_from_slice(&half.to_le_bytes());
        len += 2;
    };
    if addr & 2 != 0 {
        put(NOP);
    }
    let [hw1, hw2] = ldr_w(PC, PC, 0);
    put(hw1);
    put(hw2);
    put(dest as u16);
    put((dest >> 16) as u16);
    (out, len)
}

/// Bytes redirecting an ARM site to `dest`.
pub fn arm_hook(dest: u32) -> [u8; 8] {
    let mut out = [0; 8];
    out[..4].copy_from_slice(&ARM_LDR_PC_NEXT.to_le_bytes());
    out[4..].copy_from_slice(&dest.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings() {
        assert_eq!(ldr_w(PC, PC, 0), [0xF8DF, 0xF000]);
        assert_eq!(push_w(0x5FFF), [0xE92D, 0x5FFF]);
        assert_eq!(vpush(0, 8), [0xED2D, 0x0B10]);
        assert_eq!(vpop(0, 8), [0xECBD, 0x0B10]);
        assert_eq!(mov(4, SP), 0x466C);
        assert_eq!(mov(SP, 4), 0x46A5);
        assert_eq!(mov(IP, SP), 0x46EC);
        assert_eq!(blx(IP), 0x47E0);
        assert_eq!(bic_w(IP, IP, 7), [0xF02C, 0x0C07]);
        // vmov r1, s21 / vmov s28, r1
        assert_eq!(vmov_to_core(1, 21), [0xEE1A, 0x1A90]);
        assert_eq!(vmov_from_core(28, 1), [0xEE0E, 0x1A10]);
    }

    #[test]
    fn thumb_hook_pads_unaligned_sites() {
        let (bytes, len) = thumb_hook(0x1000, 0x2001);
        assert_eq!(len, 8);
        assert_eq!(&bytes[..8], &[0xDF, 0xF8, 0x00, 0xF0, 0x01, 0x20, 0x00, 0x00]);
        let (bytes, len) = thumb_hook(0x1002, 0x2001);
        assert_eq!(len, 10);
        assert_eq!(&bytes[..4], &[0x00, 0xBF, 0xDF, 0xF8]);
    }
}
