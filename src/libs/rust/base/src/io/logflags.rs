/*
 * Copyright (C) 2023-2024 Nils Asmussen, Barkhausen Institut
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

use bitflags::bitflags;

use std::str;

bitflags! {
    /// All log flags used by the SPE runtime
    ///
    /// Logging is controlled at runtime via the environment variable `SPE_LOG`, which holds a
    /// `|`-separated list of flag names. Any module can then use the `log` macro to log
    /// something. The available flags are kept here.
    ///
    /// There are three general flags: `Info`, `Debug`, and `Error`. Info and Error are enabled by
    /// default.
    ///
    /// Additionally, there are per-subsystem flags such as `SpeDma` or `SimMfc` that control the
    /// logging of certain aspects within the runtime or the emulated backend.
    ///
    /// Note however that the log flags are hard coded to `Info` and `Error` with the `bench`
    /// feature!
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct LogFlags : u64 {
        /// General: informational output (enabled by default)
        const Info          = 1 << 0;
        /// General: debugging output (disable by default)
        const Debug         = 1 << 1;
        /// General: error output (enabled by default)
        const Error         = 1 << 2;

        #[doc(hidden)]
        const __spe_start = 3;

        /// runtime: context creation/destruction
        const SpeCtx        = 1 << (Self::__spe_start.bits() + 0);
        /// runtime: group operations
        const SpeGroup      = 1 << (Self::__spe_start.bits() + 1);
        /// runtime: DMA commands and tag status queries
        const SpeDma        = 1 << (Self::__spe_start.bits() + 2);
        /// runtime: mailbox and signal operations
        const SpeMbox       = 1 << (Self::__spe_start.bits() + 3);
        /// runtime: event registration and waits
        const SpeEvents     = 1 << (Self::__spe_start.bits() + 4);
        /// runtime: context runs and stop reasons
        const SpeRun        = 1 << (Self::__spe_start.bits() + 5);
        /// runtime: opening/closing of kernel files
        const SpeFds        = 1 << (Self::__spe_start.bits() + 6);
        /// runtime: problem-state mappings
        const SpeMap        = 1 << (Self::__spe_start.bits() + 7);

        #[doc(hidden)]
        const __sim_start = Self::__spe_start.bits() + 8;

        /// emulated backend: SPU creation and state changes
        const SimSpu        = 1 << (Self::__sim_start.bits() + 0);
        /// emulated backend: MFC queue operations
        const SimMfc        = 1 << (Self::__sim_start.bits() + 1);
        /// emulated backend: every executed instruction
        const SimInsn       = 1 << (Self::__sim_start.bits() + 2);
    }
}

impl str::FromStr for LogFlags {
    type Err = bitflags::parser::ParseError;

    fn from_str(flags: &str) -> Result<Self, Self::Err> {
        Ok(Self(flags.parse()?))
    }
}
