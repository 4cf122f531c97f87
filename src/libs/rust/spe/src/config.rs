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

//! The runtime configuration, taken from the environment
//!
//! | Variable            | Meaning                                              | Default |
//! |---------------------|------------------------------------------------------|---------|
//! | `SPE_PLATFORM`      | `spufs` for the Linux kernel, `sim` for the emulator  | `spufs` |
//! | `SPE_SPUFS_ROOT`    | mount point of spufs                                 | `/spu`  |
//! | `SPE_SIM_SPUS`      | number of emulated SPUs                              | 8       |
//! | `SPE_SIM_NO_DMA`    | emulate a kernel without MFC command queue           | off     |
//! | `SPE_SIM_ISOLATION` | emulate support for isolated contexts               | off     |
//!
//! Logging is configured separately via `SPE_LOG` (see [`LogFlags`](base::io::LogFlags)).

use base::env;
use base::errors::{Code, VerboseError};

use crate::arch::sim::SimConfig;

/// The default mount point of spufs
pub const DEF_SPUFS_ROOT: &str = "/spu";
/// The default number of emulated SPUs
pub const DEF_SIM_SPUS: usize = 8;

/// The kernel backends
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Platform {
    /// The Linux spufs interface
    Spufs,
    /// The emulated spufs
    Sim,
}

/// The configuration of the runtime
#[derive(Clone, Debug)]
pub struct Config {
    platform: Platform,
    spufs_root: String,
    sim: SimConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: Platform::Spufs,
            spufs_root: DEF_SPUFS_ROOT.to_string(),
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from the environment variables
    pub fn from_env() -> Result<Self, VerboseError> {
        let platform = match env::var("SPE_PLATFORM").as_deref() {
            None | Some("spufs") => Platform::Spufs,
            Some("sim") => Platform::Sim,
            Some(p) => {
                return Err(VerboseError::new(
                    Code::InvArgs,
                    format!("unknown platform '{}' in SPE_PLATFORM", p),
                ))
            },
        };

        let units = env::var_or("SPE_SIM_SPUS", DEF_SIM_SPUS);
        if units == 0 {
            return Err(VerboseError::new(
                Code::InvArgs,
                "SPE_SIM_SPUS has to be at least 1".to_string(),
            ));
        }

        Ok(Self {
            platform,
            spufs_root: env::var("SPE_SPUFS_ROOT").unwrap_or_else(|| DEF_SPUFS_ROOT.to_string()),
            sim: SimConfig::default()
                .units(units)
                .dma_queue(!env::var_flag("SPE_SIM_NO_DMA"))
                .isolation(env::var_flag("SPE_SIM_ISOLATION")),
        })
    }

    /// Returns the selected kernel backend
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Returns the mount point of spufs
    pub fn spufs_root(&self) -> &str {
        &self.spufs_root
    }

    /// Returns the configuration of the emulated spufs
    pub fn sim(&self) -> &SimConfig {
        &self.sim
    }
}
