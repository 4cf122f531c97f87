/*
 * Copyright (C) 2024 Nils Asmussen, Barkhausen Institut
 *
 * This file is part of M3 (Microkernel-based SysteM for Heterogeneous Manycores).
 *
 * M3 is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * M3 is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License version 2 for more details.
 */

//! Encoders for the subset of the SPU instruction set used by the runtime
//!
//! SPU instructions are 32 bits wide and stored big-endian in the local store. The formats place
//! the opcode in the most significant bits, followed by the immediate (RI7, RI10, RI16, RI18) or
//! RB, then RA and finally RT in the lowest 7 bits.

/// The opcodes, already shifted into position
pub mod op {
    pub const STOP: u32 = 0x0000_0000;
    pub const LNOP: u32 = 0x0020_0000;
    pub const NOP: u32 = 0x4020_0000;
    pub const RDCH: u32 = 0x01A0_0000;
    pub const RCHCNT: u32 = 0x01E0_0000;
    pub const WRCH: u32 = 0x21A0_0000;
    pub const A: u32 = 0x1800_0000;
    pub const BI: u32 = 0x3500_0000;
    pub const BISL: u32 = 0x3520_0000;
    pub const IL: u32 = 0x4080_0000;
    pub const LQA: u32 = 0x3080_0000;
    pub const STQA: u32 = 0x2080_0000;
    pub const BR: u32 = 0x3200_0000;
    pub const BRSL: u32 = 0x3300_0000;
    pub const BRZ: u32 = 0x2000_0000;
    pub const BRNZ: u32 = 0x2100_0000;
    pub const LQD: u32 = 0x3400_0000;
    pub const STQD: u32 = 0x2400_0000;
    pub const AI: u32 = 0x1C00_0000;
    pub const ORI: u32 = 0x0400_0000;
    pub const ILA: u32 = 0x4200_0000;
}

/// The mask for the 11-bit opcodes of the RR format
pub const OP11_MASK: u32 = 0xFFE0_0000;
/// The mask for the 9-bit opcodes of the RI16 format
pub const OP9_MASK: u32 = 0xFF80_0000;
/// The mask for the 8-bit opcodes of the RI10 format
pub const OP8_MASK: u32 = 0xFF00_0000;
/// The mask for the 7-bit opcodes of the RI18 format
pub const OP7_MASK: u32 = 0xFE00_0000;

/// The link register
pub const LR: u32 = 0;
/// The stack pointer
pub const SP: u32 = 1;

fn reg(r: u32) -> u32 {
    r & 0x7F
}

fn rr(op: u32, rb: u32, ra: u32, rt: u32) -> u32 {
    op | (reg(rb) << 14) | (reg(ra) << 7) | reg(rt)
}

fn ri10(op: u32, imm: i32, ra: u32, rt: u32) -> u32 {
    op | (((imm as u32) & 0x3FF) << 14) | (reg(ra) << 7) | reg(rt)
}

fn ri16(op: u32, imm: i32, rt: u32) -> u32 {
    op | (((imm as u32) & 0xFFFF) << 7) | reg(rt)
}

/// `stop code`: stop and signal the host
pub fn stop(code: u32) -> u32 {
    op::STOP | (code & 0x3FFF)
}

/// `lnop`: no operation on the odd pipeline
pub fn lnop() -> u32 {
    op::LNOP
}

/// `nop`: no operation on the even pipeline
pub fn nop() -> u32 {
    op::NOP
}

/// `rdch rt, ch`: read from channel
pub fn rdch(rt: u32, ch: u32) -> u32 {
    rr(op::RDCH, 0, ch, rt)
}

/// `rchcnt rt, ch`: read channel count
pub fn rchcnt(rt: u32, ch: u32) -> u32 {
    rr(op::RCHCNT, 0, ch, rt)
}

/// `wrch ch, rt`: write to channel
pub fn wrch(ch: u32, rt: u32) -> u32 {
    rr(op::WRCH, 0, ch, rt)
}

/// `a rt, ra, rb`: add word
pub fn a(rt: u32, ra: u32, rb: u32) -> u32 {
    rr(op::A, rb, ra, rt)
}

/// `bi ra`: branch indirect
pub fn bi(ra: u32) -> u32 {
    rr(op::BI, 0, ra, 0)
}

/// `bisl rt, ra`: branch indirect and set link
pub fn bisl(rt: u32, ra: u32) -> u32 {
    rr(op::BISL, 0, ra, rt)
}

/// `il rt, imm`: immediate load word (sign-extended)
pub fn il(rt: u32, imm: i16) -> u32 {
    ri16(op::IL, imm as i32, rt)
}

/// `ila rt, imm`: immediate load address (18 bits)
pub fn ila(rt: u32, imm: u32) -> u32 {
    op::ILA | ((imm & 0x3FFFF) << 7) | reg(rt)
}

/// `lqa rt, addr`: load quadword from absolute address
pub fn lqa(rt: u32, addr: u32) -> u32 {
    ri16(op::LQA, (addr >> 2) as i32, rt)
}

/// `stqa rt, addr`: store quadword to absolute address
pub fn stqa(rt: u32, addr: u32) -> u32 {
    ri16(op::STQA, (addr >> 2) as i32, rt)
}

/// `lqd rt, off(ra)`: load quadword from `ra` plus the byte offset `off` (multiple of 16)
pub fn lqd(rt: u32, off: i32, ra: u32) -> u32 {
    ri10(op::LQD, off >> 4, ra, rt)
}

/// `stqd rt, off(ra)`: store quadword to `ra` plus the byte offset `off` (multiple of 16)
pub fn stqd(rt: u32, off: i32, ra: u32) -> u32 {
    ri10(op::STQD, off >> 4, ra, rt)
}

/// `ai rt, ra, imm`: add word immediate
pub fn ai(rt: u32, ra: u32, imm: i16) -> u32 {
    ri10(op::AI, imm as i32, ra, rt)
}

/// `ori rt, ra, imm`: or word immediate
pub fn ori(rt: u32, ra: u32, imm: i16) -> u32 {
    ri10(op::ORI, imm as i32, ra, rt)
}

/// `br off`: relative branch by `off` bytes
pub fn br(off: i32) -> u32 {
    ri16(op::BR, off >> 2, 0)
}

/// `brsl rt, off`: relative branch by `off` bytes and set link
pub fn brsl(rt: u32, off: i32) -> u32 {
    ri16(op::BRSL, off >> 2, rt)
}

/// `brz rt, off`: relative branch by `off` bytes if `rt` is zero
pub fn brz(rt: u32, off: i32) -> u32 {
    ri16(op::BRZ, off >> 2, rt)
}

/// `brnz rt, off`: relative branch by `off` bytes if `rt` is not zero
pub fn brnz(rt: u32, off: i32) -> u32 {
    ri16(op::BRNZ, off >> 2, rt)
}

/// Converts the given instructions into their big-endian local-store representation
pub fn assemble(insns: &[u32]) -> Vec<u8> {
    insns.iter().flat_map(|i| i.to_be_bytes()).collect()
}
