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

//! The mapped problem-state regions of a context
//!
//! The local store and the problem-state areas are mapped lazily, one entry per [`RegionKind`].
//! A failed mapping is remembered, so that later requests for the same region report the same
//! error instead of retrying. All mappings are removed when the context is destroyed.

use std::marker::PhantomData;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use base::errors::{Code, Error};
use base::io::LogFlags;
use base::math;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::arch::os::Mapping;
use crate::arch::{FileKind, SpuDir};
use crate::context::CreateFlags;
use crate::fdcache::FdCache;
use crate::kif;

/// The mappable regions of a context
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(usize)]
pub enum RegionKind {
    /// The local store memory
    LocalStore,
    /// The MFC multi-source synchronization area
    MssArea,
    /// The MFC command-queue area
    MfcCmdArea,
    /// The SPU control area
    ControlArea,
    /// The signal-notification area 1
    SigNotify1Area,
    /// The signal-notification area 2
    SigNotify2Area,
}

const REGIONS: usize = RegionKind::SigNotify2Area as usize + 1;

impl RegionKind {
    /// Returns the offset and size of the region within the problem-state mapping
    fn area(self) -> (usize, usize) {
        match self {
            Self::LocalStore => (0, kif::LS_SIZE),
            Self::MssArea => kif::MSS_AREA,
            Self::MfcCmdArea => kif::MFC_CMD_AREA,
            Self::ControlArea => kif::CONTROL_AREA,
            Self::SigNotify1Area => kif::SIGNAL1_AREA,
            Self::SigNotify2Area => kif::SIGNAL2_AREA,
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Slot {
    Unmapped,
    Mapped(usize, usize),
    Failed(Code),
}

struct State {
    closed: bool,
    slots: [Slot; REGIONS],
    ls: Option<Mapping>,
    ps: Option<Mapping>,
}

/// The table of mapped regions of one context
pub(crate) struct PsMap {
    state: Mutex<State>,
}

impl PsMap {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                closed: false,
                slots: [Slot::Unmapped; REGIONS],
                ls: None,
                ps: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the address and size of the given region, mapping it on first use
    pub fn map(
        &self,
        kind: RegionKind,
        dir: &dyn SpuDir,
        files: &FdCache,
        flags: CreateFlags,
    ) -> Result<(usize, usize), Error> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::new(Code::Destroyed));
        }

        match state.slots[kind as usize] {
            Slot::Mapped(addr, size) => return Ok((addr, size)),
            Slot::Failed(code) => return Err(Error::new(code)),
            Slot::Unmapped => {},
        }

        let res = Self::map_new(&mut state, kind, dir, files, flags);
        state.slots[kind as usize] = match res {
            Ok((addr, size)) => {
                log!(
                    LogFlags::SpeMap,
                    "{}: mapped {:?} at {:#x}..{:#x}",
                    dir.path(),
                    kind,
                    addr,
                    addr + size
                );
                Slot::Mapped(addr, size)
            },
            Err(e) => {
                log!(LogFlags::SpeMap, "{}: mapping {:?} failed: {}", dir.path(), kind, e);
                Slot::Failed(e.code())
            },
        };
        res
    }

    fn map_new(
        state: &mut State,
        kind: RegionKind,
        dir: &dyn SpuDir,
        files: &FdCache,
        flags: CreateFlags,
    ) -> Result<(usize, usize), Error> {
        if kind == RegionKind::LocalStore {
            if flags.contains(CreateFlags::ISOLATE) {
                return Err(Error::new(Code::NoPerm));
            }
            let file = files.acquire(dir, FileKind::Mem)?;
            let fd = file.map_fd().ok_or_else(|| Error::new(Code::NotSup))?;
            let map = Mapping::new(fd, 0, kif::LS_SIZE)?;
            let res = (map.addr() as usize, map.size());
            state.ls = Some(map);
            return Ok(res);
        }

        if !flags.contains(CreateFlags::MAP_PS) {
            return Err(Error::new(Code::NoPerm));
        }
        // all problem-state areas share one mapping
        let base = match &state.ps {
            Some(m) => m.addr() as usize,
            None => {
                let file = files.acquire(dir, FileKind::Psmap)?;
                let fd = file.map_fd().ok_or_else(|| Error::new(Code::NotSup))?;
                let map = Mapping::new(fd, 0, kif::PSMAP_SIZE)?;
                let addr = map.addr() as usize;
                state.ps = Some(map);
                addr
            },
        };
        let (off, size) = kind.area();
        Ok((base + off, size))
    }

    /// Removes all mappings; later requests fail with [`Code::Destroyed`]
    pub fn unmap_all(&self) {
        let mut state = self.state();
        state.closed = true;
        state.slots = [Slot::Unmapped; REGIONS];
        state.ls = None;
        state.ps = None;
    }
}

/// A mapped region of a context
///
/// The area borrows its context, so that it cannot outlive the mapping. All accesses are
/// bounds-checked. Multi-byte values are stored big-endian, as seen by the SPU.
#[derive(Debug)]
pub struct PsArea<'c> {
    kind: RegionKind,
    addr: usize,
    size: usize,
    _ctx: PhantomData<&'c ()>,
}

impl<'c> PsArea<'c> {
    pub(crate) fn new(kind: RegionKind, addr: usize, size: usize) -> Self {
        Self {
            kind,
            addr,
            size,
            _ctx: PhantomData,
        }
    }

    /// Returns the kind of region
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Returns the host address of the region
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }

    /// Returns the size of the region in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, off: usize, len: usize) -> Result<(), Error> {
        match math::in_range(off, len, self.size) {
            true => Ok(()),
            false => Err(Error::new(Code::InvArgs)),
        }
    }

    /// Copies `buf.len()` bytes at `off` into `buf`
    pub fn read(&self, off: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.check(off, buf.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.as_ptr().add(off), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copies `data` to `off`
    pub fn write(&self, off: usize, data: &[u8]) -> Result<(), Error> {
        self.check(off, data.len())?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(off), data.len());
        }
        Ok(())
    }

    /// Reads the word at `off`, which needs to be 4-byte aligned
    pub fn read_u32(&self, off: usize) -> Result<u32, Error> {
        self.check(off, 4)?;
        if !math::is_aligned(off, 4) {
            return Err(Error::new(Code::InvArgs));
        }
        let val = unsafe { ptr::read_volatile(self.as_ptr().add(off) as *const u32) };
        Ok(u32::from_be(val))
    }

    /// Writes `val` to the word at `off`, which needs to be 4-byte aligned
    pub fn write_u32(&self, off: usize, val: u32) -> Result<(), Error> {
        self.check(off, 4)?;
        if !math::is_aligned(off, 4) {
            return Err(Error::new(Code::InvArgs));
        }
        unsafe { ptr::write_volatile(self.as_ptr().add(off) as *mut u32, val.to_be()) };
        Ok(())
    }
}
