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

//! The boundary to the kernel
//!
//! The runtime talks to the kernel exclusively through the traits in this module, which model the
//! spufs interface: a [`Kernel`] creates context directories ([`SpuDir`]) and gang directories
//! ([`GangDir`]), and each context directory provides a fixed set of files ([`FileKind`]) and the
//! launch primitive ([`SpuDir::run`]).

pub mod os;
pub mod sim;
pub mod spufs;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use std::os::fd::RawFd;
use std::sync::{Arc, OnceLock};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::config::{Config, Platform};
use crate::kif::SpuCreateFlags;

/// The files within a context directory
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(usize)]
pub enum FileKind {
    /// The local store
    Mem,
    /// The outbound mailbox (non-blocking reads)
    Mbox,
    /// The number of words in the outbound mailbox
    MboxStat,
    /// The outbound interrupt mailbox (blocking reads)
    Ibox,
    /// The outbound interrupt mailbox (non-blocking reads)
    IboxNb,
    /// The number of words in the outbound interrupt mailbox
    IboxStat,
    /// The inbound mailbox (blocking writes)
    Wbox,
    /// The inbound mailbox (non-blocking writes)
    WboxNb,
    /// The number of free slots in the inbound mailbox
    WboxStat,
    /// Signal-notification register 1
    Signal1,
    /// Signal-notification register 2
    Signal2,
    /// The mode of signal-notification register 1 (0 = overwrite, 1 = OR)
    Signal1Type,
    /// The mode of signal-notification register 2 (0 = overwrite, 1 = OR)
    Signal2Type,
    /// The MFC proxy command queue and tag status
    Mfc,
    /// The multi-source synchronization area
    Mss,
    /// The control area
    Cntl,
    /// The complete problem-state area
    Psmap,
}

/// The number of different files in a context directory
pub const FILE_KINDS: usize = FileKind::Psmap as usize + 1;

impl FileKind {
    /// Returns the name of the file within the context directory
    pub fn name(self) -> &'static str {
        match self {
            Self::Mem => "mem",
            Self::Mbox => "mbox",
            Self::MboxStat => "mbox_stat",
            Self::Ibox | Self::IboxNb => "ibox",
            Self::IboxStat => "ibox_stat",
            Self::Wbox | Self::WboxNb => "wbox",
            Self::WboxStat => "wbox_stat",
            Self::Signal1 => "signal1",
            Self::Signal2 => "signal2",
            Self::Signal1Type => "signal1_type",
            Self::Signal2Type => "signal2_type",
            Self::Mfc => "mfc",
            Self::Mss => "mss",
            Self::Cntl => "cntl",
            Self::Psmap => "psmap",
        }
    }

    /// Returns true if the file is opened in non-blocking mode
    pub fn is_nonblocking(self) -> bool {
        matches!(self, Self::Mbox | Self::IboxNb | Self::WboxNb)
    }
}

bitflags! {
    /// The optional features of a kernel backend
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct KernelFeatures : u32 {
        /// Isolated contexts are supported
        const ISOLATION = 0x1;
        /// SPU and memory affinity are supported
        const AFFINITY  = 0x2;
        /// Gangs are supported
        const GANGS     = 0x4;
    }
}

/// The arguments for the creation of a context directory
pub struct CreateRequest<'a> {
    /// The name of the directory
    pub name: &'a str,
    /// The `spu_create` flags
    pub flags: SpuCreateFlags,
    /// The access mode of the directory
    pub mode: u32,
    /// The gang to create the context in
    pub gang: Option<&'a dyn GangDir>,
    /// The neighbor for [`SpuCreateFlags::AFFINITY_SPU`]
    pub neighbor: Option<&'a dyn SpuDir>,
}

/// The arguments for the creation of a gang directory
pub struct GangRequest<'a> {
    /// The name of the directory
    pub name: &'a str,
    /// The access mode of the directory
    pub mode: u32,
}

/// A kernel backend
pub trait Kernel: Send + Sync {
    /// Returns the name of the backend
    fn name(&self) -> &'static str;

    /// Returns the supported optional features
    fn features(&self) -> KernelFeatures;

    /// Creates a new context directory
    fn create_context(&self, req: &CreateRequest<'_>) -> Result<Box<dyn SpuDir>, Error>;

    /// Creates a new gang directory
    fn create_gang(&self, req: &GangRequest<'_>) -> Result<Box<dyn GangDir>, Error>;
}

/// A context directory, which represents one SPU context within the kernel
pub trait SpuDir: Send + Sync {
    /// Returns the path of the directory
    fn path(&self) -> &str;

    /// Returns the file descriptor of the directory
    fn raw_fd(&self) -> RawFd;

    /// Opens the given file of the context
    fn open(&self, kind: FileKind) -> Result<Arc<dyn SpuFile>, Error>;

    /// Runs the context starting at `npc` until it stops
    ///
    /// On return, `npc` holds the address of the next instruction and the result is the status
    /// word (see [`RunStatus`](crate::kif::RunStatus)).
    fn run(&self, npc: &mut u32) -> Result<u32, Error>;
}

/// A gang directory
pub trait GangDir: Send + Sync {
    /// Returns the path of the directory
    fn path(&self) -> &str;
}

/// An open file of a context directory
pub trait SpuFile: Send + Sync {
    /// Returns the kind of file
    fn kind(&self) -> FileKind;

    /// Reads from the file into `buf` and returns the number of read bytes
    fn read(&self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Writes `buf` into the file and returns the number of written bytes
    fn write(&self, buf: &[u8]) -> Result<usize, Error>;

    /// Waits until all previous writes have been processed
    fn sync(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Returns a file descriptor and the epoll events that signal readiness of this file
    fn poll_fd(&self) -> Option<(RawFd, u32)> {
        None
    }

    /// Returns a file descriptor that can be mapped via `mmap`, if the file is mappable
    fn map_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Reads one 32-bit word from the given file
pub fn read_word(file: &dyn SpuFile) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    match file.read(&mut buf)? {
        4 => Ok(u32::from_ne_bytes(buf)),
        _ => Err(Error::new(Code::IoError)),
    }
}

/// Writes one 32-bit word into the given file
pub fn write_word(file: &dyn SpuFile, val: u32) -> Result<(), Error> {
    match file.write(&val.to_ne_bytes())? {
        4 => Ok(()),
        _ => Err(Error::new(Code::IoError)),
    }
}

static KERNEL: OnceLock<Arc<dyn Kernel>> = OnceLock::new();

/// Returns the kernel backend selected by the environment (see [`config`](crate::config))
///
/// The backend is created on the first call and shared afterwards.
pub fn default_kernel() -> Result<Arc<dyn Kernel>, Error> {
    if let Some(k) = KERNEL.get() {
        return Ok(k.clone());
    }

    let cfg = Config::from_env().map_err(|e| {
        log!(LogFlags::Error, "invalid configuration: {}", e);
        Error::new(e.code())
    })?;
    let kernel: Arc<dyn Kernel> = match cfg.platform() {
        Platform::Spufs => Arc::new(spufs::SpufsKernel::new(cfg.spufs_root())),
        Platform::Sim => sim::SimKernel::new(cfg.sim().clone()),
    };
    log!(LogFlags::Info, "using kernel backend '{}'", kernel.name());

    // a concurrent caller might have won; use whatever is stored now
    Ok(KERNEL.get_or_init(|| kernel).clone())
}
