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

//! A small SPU interpreter, implementing the launch primitive of the emulated spufs
//!
//! It supports the instructions the runtime emits itself (see [`isa`](crate::isa)) and the
//! channel operations on the mailboxes and signal-notification registers. Everything else stops
//! the SPU with an invalid-instruction or invalid-channel status, like the hardware does.

use base::io::LogFlags;

use crate::arch::sim::spu::{Registers, Spu};
use crate::isa::{op, OP11_MASK, OP7_MASK, OP8_MASK, OP9_MASK};
use crate::kif::{self, Channel, RunStatus, LSLR};

fn rt(insn: u32) -> usize {
    (insn & 0x7F) as usize
}

fn ra(insn: u32) -> usize {
    ((insn >> 7) & 0x7F) as usize
}

fn rb(insn: u32) -> usize {
    ((insn >> 14) & 0x7F) as usize
}

fn i10(insn: u32) -> i32 {
    (((insn >> 14) & 0x3FF) as i32) << 22 >> 22
}

fn i16(insn: u32) -> i32 {
    (((insn >> 7) & 0xFFFF) as i32) << 16 >> 16
}

fn i18(insn: u32) -> u32 {
    (insn >> 7) & 0x3FFFF
}

fn splat(val: u32) -> [u32; 4] {
    [val; 4]
}

fn rel_target(pc: u32, insn: u32) -> u32 {
    (pc as i32).wrapping_add(i16(insn) << 2) as u32 & LSLR & !3
}

enum Step {
    Next,
    Jump(u32),
    Stop(u32),
}

/// Executes instructions starting at `npc` until the SPU stops
///
/// Returns the status word; `npc` is updated to the instruction following the stop, or to the
/// faulting instruction in case of an error.
pub fn run(spu: &Spu, npc: &mut u32) -> u32 {
    let mut regs = spu.regs();
    let mut pc = *npc & LSLR & !3;
    loop {
        let insn = spu.ls().load_word(pc);
        log!(LogFlags::SimInsn, "spu{}: {:#07x}: {:08x}", spu.id(), pc, insn);

        match step(spu, &mut regs, pc, insn) {
            Step::Next => pc = (pc + 4) & LSLR,
            Step::Jump(target) => pc = target,
            Step::Stop(status) => {
                if status & RunStatus::STOPPED_BY_STOP.bits() != 0 {
                    pc = (pc + 4) & LSLR;
                }
                *npc = pc;
                log!(
                    LogFlags::SimSpu,
                    "spu{}: stopped with status {:#x} at {:#x}",
                    spu.id(),
                    status,
                    pc
                );
                return status;
            },
        }
    }
}

fn step(spu: &Spu, regs: &mut Registers, pc: u32, insn: u32) -> Step {
    match insn & OP11_MASK {
        op::STOP => return Step::Stop(kif::stop_status(insn & 0x3FFF)),
        op::LNOP | op::NOP => return Step::Next,
        op::RDCH => {
            return match spu.read_channel(Channel::from(ra(insn) as u32)) {
                Some(val) => {
                    regs[rt(insn)] = [val, 0, 0, 0];
                    Step::Next
                },
                None => Step::Stop(RunStatus::INVALID_CH.bits()),
            };
        },
        op::RCHCNT => {
            return match spu.channel_count(Channel::from(ra(insn) as u32)) {
                Some(cnt) => {
                    regs[rt(insn)] = [cnt, 0, 0, 0];
                    Step::Next
                },
                None => Step::Stop(RunStatus::INVALID_CH.bits()),
            };
        },
        op::WRCH => {
            let val = regs[rt(insn)][0];
            return match spu.write_channel(Channel::from(ra(insn) as u32), val) {
                Some(()) => Step::Next,
                None => Step::Stop(RunStatus::INVALID_CH.bits()),
            };
        },
        op::A => {
            let (a, b) = (regs[ra(insn)], regs[rb(insn)]);
            for i in 0..4 {
                regs[rt(insn)][i] = a[i].wrapping_add(b[i]);
            }
            return Step::Next;
        },
        op::BI => return Step::Jump(regs[ra(insn)][0] & LSLR & !3),
        op::BISL => {
            let target = regs[ra(insn)][0] & LSLR & !3;
            regs[rt(insn)] = [(pc + 4) & LSLR, 0, 0, 0];
            return Step::Jump(target);
        },
        _ => {},
    }

    match insn & OP9_MASK {
        op::IL => {
            regs[rt(insn)] = splat(i16(insn) as u32);
            return Step::Next;
        },
        op::LQA => {
            regs[rt(insn)] = spu.ls().load_quad((i16(insn) << 2) as u32);
            return Step::Next;
        },
        op::STQA => {
            spu.ls().store_quad((i16(insn) << 2) as u32, regs[rt(insn)]);
            return Step::Next;
        },
        op::BR => return Step::Jump(rel_target(pc, insn)),
        op::BRSL => {
            regs[rt(insn)] = [(pc + 4) & LSLR, 0, 0, 0];
            return Step::Jump(rel_target(pc, insn));
        },
        op::BRZ | op::BRNZ => {
            let zero = regs[rt(insn)][0] == 0;
            return match (insn & OP9_MASK == op::BRZ) == zero {
                true => Step::Jump(rel_target(pc, insn)),
                false => Step::Next,
            };
        },
        _ => {},
    }

    match insn & OP8_MASK {
        op::LQD => {
            let addr = regs[ra(insn)][0].wrapping_add((i10(insn) << 4) as u32);
            regs[rt(insn)] = spu.ls().load_quad(addr);
            return Step::Next;
        },
        op::STQD => {
            let addr = regs[ra(insn)][0].wrapping_add((i10(insn) << 4) as u32);
            spu.ls().store_quad(addr, regs[rt(insn)]);
            return Step::Next;
        },
        op::AI => {
            let a = regs[ra(insn)];
            regs[rt(insn)] = a.map(|w| w.wrapping_add(i10(insn) as u32));
            return Step::Next;
        },
        op::ORI => {
            let a = regs[ra(insn)];
            regs[rt(insn)] = a.map(|w| w | i10(insn) as u32);
            return Step::Next;
        },
        _ => {},
    }

    if insn & OP7_MASK == op::ILA {
        regs[rt(insn)] = splat(i18(insn));
        return Step::Next;
    }

    Step::Stop(RunStatus::INVALID_INSTR.bits())
}
