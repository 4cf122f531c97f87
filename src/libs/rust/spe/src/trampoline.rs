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

//! The launch trampoline
//!
//! To start a program with arguments, the host stages a small stub at the end of the local store.
//! The stub occupies the last [`REGION_SIZE`] bytes: a [`RegBlock`] with the argument registers
//! and the entry point, followed by the code. The code loads r3-r6 and the entry point from the
//! block, clears the stack pointer so that the program sets up its default stack, writes a null
//! backchain over the consumed entry quadword and branches to the entry point. If the program
//! returns, the stub stops with exit code 0.
//!
//! The region is not preserved across runs; the program's stack grows into it.

use static_assertions::const_assert;

use base::errors::Error;
use base::io::LogFlags;

use crate::context::Context;
use crate::isa;
use crate::kif;
use crate::psmap::PsArea;

/// The size of the whole trampoline region
pub const REGION_SIZE: u32 = 0x80;
/// The size of the register block
pub const REGBLOCK_SIZE: u32 = 0x50;

/// The local-store address of the register block
pub const REGBLOCK_OFF: u32 = kif::LS_SIZE as u32 - REGION_SIZE;
/// The local-store address of the entry point within the register block
pub const ENTRY_OFF: u32 = REGBLOCK_OFF + 4 * 16;
/// The local-store address of the code, which is also the entry point of the trampoline
pub const CODE_OFF: u32 = REGBLOCK_OFF + REGBLOCK_SIZE;
/// The local-store address of the null backchain written by the trampoline
pub const BACKCHAIN_OFF: u32 = ENTRY_OFF;
/// The initial stack pointer set by the trampoline; zero requests the default stack
pub const STACK_PTR: u32 = 0;

/// The trampoline code. Do not change: the encoding depends on the offsets above.
pub const CODE: [u32; 12] = [
    0x30FF_F003, // lqa   $3, REGBLOCK_OFF + 0x00
    0x30FF_F204, // lqa   $4, REGBLOCK_OFF + 0x10
    0x30FF_F405, // lqa   $5, REGBLOCK_OFF + 0x20
    0x30FF_F606, // lqa   $6, REGBLOCK_OFF + 0x30
    0x30FF_F807, // lqa   $7, ENTRY_OFF
    0x4080_0001, // il    $1, STACK_PTR
    0x4080_0002, // il    $2, 0
    0x20FF_F802, // stqa  $2, BACKCHAIN_OFF
    0x3520_0380, // bisl  $0, $7
    0x0000_2000, // stop  0x2000
    0x0020_0000, // lnop
    0x0020_0000, // lnop
];

const_assert!(REGBLOCK_SIZE + CODE.len() as u32 * 4 == REGION_SIZE);
const_assert!(REGBLOCK_OFF % 16 == 0);
const_assert!(BACKCHAIN_OFF % 16 == 0);
const_assert!(BACKCHAIN_OFF >= REGBLOCK_OFF && BACKCHAIN_OFF < CODE_OFF);

/// The initial register state for a run
///
/// Every register is a quadword; the SPU ABI passes scalar values in the preferred slot, the
/// first word.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RegBlock {
    pub r3: [u32; 4],
    pub r4: [u32; 4],
    pub r5: [u32; 4],
    pub r6: [u32; 4],
    pub entry: [u32; 4],
}

impl RegBlock {
    /// Creates a register block with the given scalar arguments
    pub fn with_words(r3: u32, r4: u32, r5: u32, r6: u32) -> Self {
        Self {
            r3: [r3, 0, 0, 0],
            r4: [r4, 0, 0, 0],
            r5: [r5, 0, 0, 0],
            r6: [r6, 0, 0, 0],
            entry: [0; 4],
        }
    }

    /// Sets the entry point
    pub fn set_entry(&mut self, entry: u32) {
        self.entry = [entry, 0, 0, 0];
    }

    /// Returns the block in the big-endian layout of the local store
    pub fn to_bytes(&self) -> [u8; REGBLOCK_SIZE as usize] {
        let mut bytes = [0u8; REGBLOCK_SIZE as usize];
        let quads = [&self.r3, &self.r4, &self.r5, &self.r6, &self.entry];
        for (i, w) in quads.iter().flat_map(|q| q.iter()).enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
        }
        bytes
    }
}

/// Stages the trampoline with given registers in the local store of `ctx`
///
/// `regs.entry` has to contain the entry point of the program. Returns the entry point of the
/// trampoline, which is passed to the run primitive.
pub fn setup(ctx: &Context, regs: &RegBlock) -> Result<u32, Error> {
    let ls = ctx.local_store()?;
    stage(&ls, regs)
}

pub(crate) fn stage(ls: &PsArea<'_>, regs: &RegBlock) -> Result<u32, Error> {
    ls.write(CODE_OFF as usize, &isa::assemble(&CODE))?;
    ls.write(REGBLOCK_OFF as usize, &regs.to_bytes())?;
    log!(
        LogFlags::SpeRun,
        "staged trampoline at {:#x} for entry {:#x}",
        CODE_OFF,
        regs.entry[0]
    );
    Ok(CODE_OFF)
}
