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

//! An emulated spufs
//!
//! The emulator provides the same files and the same launch primitive as the Linux spufs, but runs
//! the SPU programs in an interpreter within the calling thread. The local store is an anonymous
//! memory file that is mapped by the interpreter and, via the `mem` file, by the runtime. Mailbox
//! and tag-group readiness is signalled through eventfds, so that waiting for events works via
//! epoll like with the real kernel.

mod doorbell;
mod files;
mod interp;
mod mfc;
mod spu;

pub use self::mfc::QUEUE_DEPTH;

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::arch::sim::files::SimFile;
use crate::arch::sim::mfc::Mfc;
use crate::arch::sim::spu::Spu;
use crate::arch::{
    CreateRequest, FileKind, GangDir, GangRequest, Kernel, KernelFeatures, SpuDir, SpuFile,
};
use crate::config::DEF_SIM_SPUS;
use crate::kif::SpuCreateFlags;

/// The configuration of the emulated spufs
#[derive(Clone, Debug)]
pub struct SimConfig {
    units: usize,
    dma_queue: bool,
    isolation: bool,
    affinity: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            units: DEF_SIM_SPUS,
            dma_queue: true,
            isolation: false,
            affinity: true,
        }
    }
}

impl SimConfig {
    /// Sets the number of SPUs, which limits the number of contexts that exist at the same time
    pub fn units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    /// Sets whether the contexts have an MFC proxy command queue (the `mfc` file)
    pub fn dma_queue(mut self, present: bool) -> Self {
        self.dma_queue = present;
        self
    }

    /// Sets whether isolated contexts are supported
    pub fn isolation(mut self, supported: bool) -> Self {
        self.isolation = supported;
        self
    }

    /// Sets whether affinity requests are supported
    pub fn affinity(mut self, supported: bool) -> Self {
        self.affinity = supported;
        self
    }

    /// Returns the number of SPUs
    pub fn unit_count(&self) -> usize {
        self.units
    }

    /// Returns whether the contexts have an MFC proxy command queue
    pub fn has_dma_queue(&self) -> bool {
        self.dma_queue
    }
}

/// The emulated kernel
pub struct SimKernel {
    cfg: SimConfig,
    active: Arc<AtomicUsize>,
    next_id: AtomicU32,
}

impl SimKernel {
    /// Creates a new emulated kernel with given configuration
    pub fn new(cfg: SimConfig) -> Arc<Self> {
        log!(LogFlags::SimSpu, "creating emulated spufs with {:?}", cfg);
        Arc::new(Self {
            cfg,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU32::new(0),
        })
    }

    /// Returns the number of contexts that currently occupy an SPU
    pub fn active_units(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn reserve_unit(&self) -> Result<Unit, Error> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.cfg.units).then_some(n + 1)
            })
            .map_err(|_| Error::new(Code::NoSpace))?;
        Ok(Unit {
            active: self.active.clone(),
        })
    }
}

impl Kernel for SimKernel {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn features(&self) -> KernelFeatures {
        let mut feat = KernelFeatures::GANGS;
        if self.cfg.isolation {
            feat |= KernelFeatures::ISOLATION;
        }
        if self.cfg.affinity {
            feat |= KernelFeatures::AFFINITY;
        }
        feat
    }

    fn create_context(&self, req: &CreateRequest<'_>) -> Result<Box<dyn SpuDir>, Error> {
        let affinity = SpuCreateFlags::AFFINITY_SPU | SpuCreateFlags::AFFINITY_MEM;
        if (req.flags.contains(SpuCreateFlags::ISOLATE) && !self.cfg.isolation)
            || (req.flags.intersects(affinity) && !self.cfg.affinity)
        {
            return Err(Error::new(Code::NotSup));
        }
        if req.flags.contains(SpuCreateFlags::AFFINITY_SPU) && req.neighbor.is_none() {
            return Err(Error::new(Code::InvArgs));
        }

        let unit = self.reserve_unit()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spu = Arc::new(Spu::new(id, req.flags.contains(SpuCreateFlags::ISOLATE))?);
        let mfc = match self.cfg.dma_queue {
            true => Some(Arc::new(Mfc::new(spu.clone())?)),
            false => None,
        };
        let path = match req.gang {
            Some(g) => format!("{}/{}", g.path(), req.name),
            None => format!("/sim/{}", req.name),
        };

        log!(LogFlags::SimSpu, "spu{}: bound to {}", id, path);
        Ok(Box::new(SimSpuDir {
            path,
            spu,
            mfc,
            _unit: unit,
        }))
    }

    fn create_gang(&self, req: &GangRequest<'_>) -> Result<Box<dyn GangDir>, Error> {
        Ok(Box::new(SimGang {
            path: format!("/sim/{}", req.name),
        }))
    }
}

// an occupied SPU, which is released on drop
struct Unit {
    active: Arc<AtomicUsize>,
}

impl Drop for Unit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

struct SimSpuDir {
    path: String,
    spu: Arc<Spu>,
    mfc: Option<Arc<Mfc>>,
    _unit: Unit,
}

impl SpuDir for SimSpuDir {
    fn path(&self) -> &str {
        &self.path
    }

    fn raw_fd(&self) -> RawFd {
        self.spu.ls().raw_fd()
    }

    fn open(&self, kind: FileKind) -> Result<Arc<dyn SpuFile>, Error> {
        match kind {
            FileKind::Mem if self.spu.is_isolated() => return Err(Error::new(Code::NoPerm)),
            FileKind::Mfc if self.mfc.is_none() => return Err(Error::new(Code::NoSuchFile)),
            FileKind::Mss | FileKind::Cntl | FileKind::Psmap => {
                return Err(Error::new(Code::NotSup))
            },
            _ => {},
        }
        Ok(Arc::new(SimFile::new(kind, self.spu.clone(), self.mfc.clone())))
    }

    fn run(&self, npc: &mut u32) -> Result<u32, Error> {
        Ok(interp::run(&self.spu, npc))
    }
}

impl Drop for SimSpuDir {
    fn drop(&mut self) {
        log!(LogFlags::SimSpu, "spu{}: released", self.spu.id());
    }
}

struct SimGang {
    path: String,
}

impl GangDir for SimGang {
    fn path(&self) -> &str {
        &self.path
    }
}
