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

//! Contains the definitions of the kernel and hardware interface of an SPU

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The size of an SPU's local store
pub const LS_SIZE: usize = 0x40000;
/// The mask that is applied to all local-store addresses (local store limit register)
pub const LSLR: u32 = (LS_SIZE - 1) as u32;

/// The maximum size of a single DMA transfer
pub const MAX_DMA_SIZE: usize = 16 * 1024;
/// The number of DMA tag groups that can be named in a transfer
pub const TAG_COUNT: u32 = 16;
/// The mask applied to DMA tags
pub const TAG_MASK: u32 = TAG_COUNT - 1;

/// The size of the problem-state area (`psmap`)
pub const PSMAP_SIZE: usize = 0x20000;

/// Offset and size of the MFC multi-source synchronization area within the problem state
pub const MSS_AREA: (usize, usize) = (0x0000, 0x1000);
/// Offset and size of the MFC command-queue area within the problem state
pub const MFC_CMD_AREA: (usize, usize) = (0x3000, 0x1000);
/// Offset and size of the control area within the problem state
pub const CONTROL_AREA: (usize, usize) = (0x4000, 0x1000);
/// Offset and size of the signal-notification area 1 within the problem state
pub const SIGNAL1_AREA: (usize, usize) = (0x14000, 0x1000);
/// Offset and size of the signal-notification area 2 within the problem state
pub const SIGNAL2_AREA: (usize, usize) = (0x1C000, 0x1000);

bitflags! {
    /// The flags for the `spu_create` system call
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SpuCreateFlags : u32 {
        /// Report stop events (required for the event multiplexer)
        const EVENTS_ENABLED = 0x0001;
        /// Create a gang directory instead of a context
        const GANG           = 0x0002;
        /// Do not schedule the context, but bind it to a physical SPU
        const NOSCHED        = 0x0004;
        /// Run the context in isolation mode
        const ISOLATE        = 0x0008;
        /// Place the context next to the given neighbor context
        const AFFINITY_SPU   = 0x0010;
        /// Place the context close to the memory
        const AFFINITY_MEM   = 0x0020;
    }
}

bitflags! {
    /// The status word returned by `spu_run`
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RunStatus : u32 {
        /// The SPU is running
        const RUNNING             = 0x01;
        /// The SPU executed a stop-and-signal instruction; the code is in bits 16..30
        const STOPPED_BY_STOP     = 0x02;
        /// The SPU executed a halt instruction
        const STOPPED_BY_HALT     = 0x04;
        /// The SPU is blocked on a channel
        const WAITING_FOR_CHANNEL = 0x08;
        /// The SPU stopped after a single step
        const SINGLE_STEP         = 0x10;
        /// The SPU fetched an invalid instruction
        const INVALID_INSTR       = 0x20;
        /// The SPU accessed an invalid channel
        const INVALID_CH          = 0x40;
    }
}

/// Extracts the stop-and-signal code from the status word returned by `spu_run`
pub fn stop_code(status: u32) -> u32 {
    (status >> 16) & 0x3FFF
}

/// Builds a status word for a stop-and-signal with given code
pub fn stop_status(code: u32) -> u32 {
    ((code & 0x3FFF) << 16) | RunStatus::STOPPED_BY_STOP.bits()
}

/// Stop codes in this range terminate the program; the low byte is the exit code
pub const STOP_EXIT: (u32, u32) = (0x2000, 0x20FF);
/// Stop codes in this range are callbacks; the low byte is the opcode
pub const STOP_CALLBACK: (u32, u32) = (0x2100, 0x21FF);

/// The commands of the memory flow controller
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum MfcCmd {
    /// Local store to effective address
    Put  = 0x20,
    /// Put with barrier
    PutB = 0x21,
    /// Put with fence
    PutF = 0x22,
    /// Effective address to local store
    Get  = 0x40,
    /// Get with barrier
    GetB = 0x41,
    /// Get with fence
    GetF = 0x42,
}

impl MfcCmd {
    /// Returns true if the command moves data into the local store
    pub fn is_get(self) -> bool {
        (u16::from(self) & 0x40) != 0
    }
}

int_enum! {
    /// The SPU channels that are used by the host runtime
    pub struct Channel : u32 {
        const RD_SIG_NOTIFY1    = 3;
        const RD_SIG_NOTIFY2    = 4;
        const MFC_LSA           = 16;
        const MFC_EAH           = 17;
        const MFC_EAL           = 18;
        const MFC_SIZE          = 19;
        const MFC_TAG_ID        = 20;
        const MFC_CMD           = 21;
        const WR_TAG_MASK       = 22;
        const WR_TAG_UPDATE     = 23;
        const RD_TAG_STAT       = 24;
        const WR_OUT_MBOX       = 28;
        const RD_IN_MBOX        = 29;
        const WR_OUT_INTR_MBOX  = 30;
    }
}
