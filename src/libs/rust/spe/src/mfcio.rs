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

//! The DMA engine
//!
//! Transfers between the local store and host memory are queued to the memory flow controller
//! (MFC) of the SPU through the `mfc` file of the context. Every transfer names a tag group; the
//! completion of tag groups is observed with [`Context::tag_status_read`].
//!
//! If the kernel does not provide an MFC command queue, transfers are performed as immediate copies
//! through the mapped local store. They are complete when the call returns, but tag status cannot
//! be queried in this case.

use std::cmp;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use static_assertions::const_assert;

use base::errors::{Code, Error};
use base::io::LogFlags;
use base::math;
use base::util;

use crate::arch::{self, os, FileKind, SpuFile};
use crate::context::{Context, CtxInner};
use crate::kif::{MfcCmd, LS_SIZE, MAX_DMA_SIZE, TAG_MASK};
use crate::psmap::RegionKind;

/// An MFC command as written to the `mfc` file
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MfcCommand {
    pad: u32,
    pub lsa: u32,
    pub ea: u64,
    pub size: u16,
    pub tag: u16,
    pub class: u16,
    pub cmd: u16,
}

const_assert!(mem::size_of::<MfcCommand>() == 24);

impl MfcCommand {
    /// Creates a new command
    ///
    /// The tag is masked to the 16 tag groups available to the host. The transfer class id and
    /// the replacement class id are packed into the class field.
    pub fn new(cmd: MfcCmd, lsa: u32, ea: u64, size: u16, tag: u32, tid: u32, rid: u32) -> Self {
        Self {
            pad: 0,
            lsa,
            ea,
            size,
            tag: (tag & TAG_MASK) as u16,
            class: (((tid & 0xFF) << 8) | (rid & 0xFF)) as u16,
            cmd: cmd.into(),
        }
    }

    /// Returns the command in the layout of the `mfc` file
    pub fn as_bytes(&self) -> &[u8] {
        util::object_to_bytes(self)
    }

    /// Parses a command from the layout of the `mfc` file
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != mem::size_of::<Self>() {
            return None;
        }
        let u16_at = |off: usize| u16::from_ne_bytes([buf[off], buf[off + 1]]);
        Some(Self {
            pad: 0,
            lsa: u32::from_ne_bytes(buf[4..8].try_into().ok()?),
            ea: u64::from_ne_bytes(buf[8..16].try_into().ok()?),
            size: u16_at(16),
            tag: u16_at(18),
            class: u16_at(20),
            cmd: u16_at(22),
        })
    }
}

/// The policy of [`Context::tag_status_read`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TagPolicy {
    /// Waits until all queued transfers have completed
    All,
    /// Waits until any tag group has completed
    Any,
    /// Does not wait
    Immediate,
}

/// The direction and host buffer of [`Context::dma_transfer`]
#[derive(Debug)]
pub enum Transfer<'a> {
    /// From the local store into the buffer
    Put(&'a mut [u8]),
    /// From the buffer into the local store
    Get(&'a [u8]),
}

impl CtxInner {
    /// Returns the MFC file or `None` if transfers have to fall back to direct copies
    fn mfc_file(&self) -> Result<Option<Arc<dyn SpuFile>>, Error> {
        if self.dma_fallback.load(Ordering::Relaxed) {
            return Ok(None);
        }
        match self.file(FileKind::Mfc) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.code() == Code::Destroyed => Err(e),
            Err(e) => {
                log!(
                    LogFlags::SpeDma,
                    "{}: no MFC queue ({}); using direct copies",
                    self.path(),
                    e
                );
                self.dma_fallback.store(true, Ordering::Relaxed);
                Ok(None)
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn submit(
        &self,
        op: MfcCmd,
        lsa: u32,
        ea: u64,
        size: usize,
        tag: u32,
        tid: u32,
        rid: u32,
    ) -> Result<(), Error> {
        if size > MAX_DMA_SIZE || !math::in_range(lsa as usize, size, LS_SIZE) {
            return Err(Error::new(Code::InvArgs));
        }

        let file = match self.mfc_file()? {
            Some(f) => f,
            None => return self.copy(op, lsa, ea, size),
        };

        let cmd = MfcCommand::new(op, lsa, ea, size as u16, tag, tid, rid);
        log!(
            LogFlags::SpeDma,
            "{}: {:?} lsa={:#x} ea={:#x} size={:#x} tag={} class={:#x}",
            self.path(),
            op,
            lsa,
            ea,
            size,
            cmd.tag,
            cmd.class
        );
        match file.write(cmd.as_bytes()) {
            Ok(n) if n == mem::size_of::<MfcCommand>() => Ok(()),
            Ok(n) => {
                log!(LogFlags::Error, "{}: short MFC write ({} bytes)", self.path(), n);
                Err(Error::new(Code::IoError))
            },
            Err(e) if e.code() == Code::QueueFull => Err(e),
            Err(e) => {
                log!(LogFlags::Error, "{}: MFC write failed: {}", self.path(), e);
                Err(Error::new(Code::IoError))
            },
        }
    }

    fn copy(&self, op: MfcCmd, lsa: u32, ea: u64, size: usize) -> Result<(), Error> {
        let ls = self.ps_area(RegionKind::LocalStore)?;
        // safety: the caller of the unsafe transfer functions guarantees that `ea` is valid
        if op.is_get() {
            let src = unsafe { std::slice::from_raw_parts(ea as usize as *const u8, size) };
            ls.write(lsa as usize, src)
        }
        else {
            let dst = unsafe { std::slice::from_raw_parts_mut(ea as usize as *mut u8, size) };
            ls.read(lsa as usize, dst)
        }
    }

    fn tag_status(&self, policy: TagPolicy) -> Result<u32, Error> {
        let file = self.mfc_file()?.ok_or_else(|| Error::new(Code::NotSup))?;
        let res = match policy {
            TagPolicy::All => file.sync().and_then(|_| arch::read_word(&*file)),
            TagPolicy::Any => arch::read_word(&*file),
            TagPolicy::Immediate => {
                let (fd, events) = file.poll_fd().ok_or_else(|| Error::new(Code::NotSup))?;
                match os::poll_one(fd, events, 0)? {
                    true => arch::read_word(&*file),
                    false => Ok(0),
                }
            },
        };
        match res {
            Err(e) if e.code() == Code::WouldBlock || e.code() == Code::QueueFull => Ok(0),
            r => r,
        }
    }

    /// Returns true if transfers are queued to a real MFC queue
    pub(crate) fn has_dma_queue(&self) -> Result<bool, Error> {
        self.mfc_file().map(|f| f.is_some())
    }

    pub(crate) fn poll_tag_status(&self) -> Result<u32, Error> {
        self.tag_status(TagPolicy::Immediate)
    }
}

macro_rules! dma_op {
    ($(#[$doc:meta])* $name:ident, $op:expr) => {
        $(#[$doc])*
        ///
        /// # Safety
        ///
        /// `ea` has to stay valid for `size` bytes until the tag group has completed.
        pub unsafe fn $name(
            &self,
            lsa: u32,
            ea: u64,
            size: usize,
            tag: u32,
            tid: u32,
            rid: u32,
        ) -> Result<(), Error> {
            let ctx = self.inner().begin_op()?;
            ctx.submit($op, lsa, ea, size, tag, tid, rid)
        }
    };
}

impl Context {
    dma_op!(
        /// Queues a transfer of `size` bytes from local-store address `lsa` to host address `ea`
        put,
        MfcCmd::Put
    );
    dma_op!(
        /// Like [`Context::put`], but ordered after all earlier transfers of the tag group
        putb,
        MfcCmd::PutB
    );
    dma_op!(
        /// Like [`Context::put`], but ordered after all earlier transfers of the tag group that
        /// have been queued before
        putf,
        MfcCmd::PutF
    );
    dma_op!(
        /// Queues a transfer of `size` bytes from host address `ea` to local-store address `lsa`
        get,
        MfcCmd::Get
    );
    dma_op!(
        /// Like [`Context::get`], but ordered after all earlier transfers of the tag group
        getb,
        MfcCmd::GetB
    );
    dma_op!(
        /// Like [`Context::get`], but ordered after all earlier transfers of the tag group that
        /// have been queued before
        getf,
        MfcCmd::GetF
    );

    /// Reads the mask of completed tag groups
    ///
    /// `mask` has to be zero; selecting tag groups is not supported ([`Code::NotSup`]). Without an
    /// MFC queue, tag status is not available and [`Code::NotSup`] is returned as well. With
    /// [`TagPolicy::Immediate`], 0 is returned if no tag group has completed yet.
    pub fn tag_status_read(&self, mask: u32, policy: TagPolicy) -> Result<u32, Error> {
        if mask != 0 {
            return Err(Error::new(Code::NotSup));
        }
        let ctx = self.inner().begin_op()?;
        ctx.tag_status(policy)
    }

    /// Transfers the whole buffer between the local store at `lsa` and host memory
    ///
    /// The transfer is split into fragments of at most 16 KiB that are queued on tag group `tag`.
    /// Returns after all of them have completed.
    pub fn dma_transfer(&self, lsa: u32, xfer: Transfer<'_>, tag: u32) -> Result<(), Error> {
        let (op, ea, len) = match xfer {
            Transfer::Put(buf) => (MfcCmd::Put, buf.as_mut_ptr() as u64, buf.len()),
            Transfer::Get(buf) => (MfcCmd::Get, buf.as_ptr() as u64, buf.len()),
        };
        if !math::in_range(lsa as usize, len, LS_SIZE) {
            return Err(Error::new(Code::InvArgs));
        }

        let ctx = self.inner().begin_op()?;
        let mut off = 0;
        while off < len {
            let amount = cmp::min(MAX_DMA_SIZE, len - off);
            let res = loop {
                match ctx.submit(op, lsa + off as u32, ea + off as u64, amount, tag, 0, 0) {
                    Err(e) if e.code() == Code::QueueFull => thread::yield_now(),
                    r => break r,
                }
            };
            if let Err(e) = res {
                // the buffer is borrowed only until we return; wait for the queued fragments
                ctx.tag_status(TagPolicy::All).ok();
                return Err(e);
            }
            off += amount;
        }

        match ctx.has_dma_queue()? {
            true => ctx.tag_status(TagPolicy::All).map(|_| ()),
            false => Ok(()),
        }
    }
}
