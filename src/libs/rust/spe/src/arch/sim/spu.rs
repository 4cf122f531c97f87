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

//! The state of an emulated SPU: local store, registers, mailboxes and signal registers

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::arch::os::{self, Mapping};
use crate::arch::sim::doorbell::Doorbell;
use crate::kif::{Channel, LSLR, LS_SIZE};

/// The register file: 128 registers with 4 words each, word 0 being the preferred slot
pub type Registers = [[u32; 4]; 128];

/// The local store, backed by an anonymous memory file so that the host can map it as well
pub struct LocalStore {
    fd: OwnedFd,
    map: Mapping,
}

impl LocalStore {
    fn new(id: u32) -> Result<Self, Error> {
        let fd = os::memfd(&format!("spu{}-ls", id), LS_SIZE)?;
        let map = Mapping::new(fd.as_raw_fd(), 0, LS_SIZE)?;
        Ok(Self { fd, map })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn load_word(&self, addr: u32) -> u32 {
        let off = (addr & LSLR & !3) as usize;
        let mut raw = [0u8; 4];
        // safety: the offset is masked to the local store and word aligned
        unsafe { ptr::copy_nonoverlapping(self.map.addr().add(off), raw.as_mut_ptr(), 4) };
        u32::from_be_bytes(raw)
    }

    pub fn load_quad(&self, addr: u32) -> [u32; 4] {
        let base = addr & LSLR & !0xF;
        [
            self.load_word(base),
            self.load_word(base + 4),
            self.load_word(base + 8),
            self.load_word(base + 12),
        ]
    }

    pub fn store_quad(&self, addr: u32, val: [u32; 4]) {
        let off = (addr & LSLR & !0xF) as usize;
        for (i, w) in val.iter().enumerate() {
            let raw = w.to_be_bytes();
            // safety: the offset is masked to the local store and quadword aligned
            unsafe {
                ptr::copy_nonoverlapping(raw.as_ptr(), self.map.addr().add(off + i * 4), 4)
            };
        }
    }

    /// Copies `size` bytes from `src` to the local store at `lsa`
    ///
    /// # Safety
    ///
    /// `src` has to be valid for `size` bytes and `lsa + size` must not exceed the local store.
    pub unsafe fn copy_in(&self, lsa: usize, src: *const u8, size: usize) {
        ptr::copy(src, self.map.addr().add(lsa), size);
    }

    /// Copies `size` bytes from the local store at `lsa` to `dst`
    ///
    /// # Safety
    ///
    /// `dst` has to be valid for `size` bytes and `lsa + size` must not exceed the local store.
    pub unsafe fn copy_out(&self, lsa: usize, dst: *mut u8, size: usize) {
        ptr::copy(self.map.addr().add(lsa), dst, size);
    }
}

#[derive(Default)]
struct Channels {
    in_mbox: Option<u32>,
    out_mbox: Option<u32>,
    out_intr_mbox: Option<u32>,
    signal: [u32; 2],
    signal_or: [bool; 2],
}

/// An emulated SPU
pub struct Spu {
    id: u32,
    isolated: bool,
    ls: LocalStore,
    chans: Mutex<Channels>,
    cond: Condvar,
    // readable while the outbound interrupt mailbox holds a word
    ibox_bell: Doorbell,
    // readable while the inbound mailbox has space
    wbox_bell: Doorbell,
    regs: Mutex<Box<Registers>>,
}

impl Spu {
    pub fn new(id: u32, isolated: bool) -> Result<Self, Error> {
        log!(LogFlags::SimSpu, "spu{}: created (isolated={})", id, isolated);
        Ok(Self {
            id,
            isolated,
            ls: LocalStore::new(id)?,
            chans: Mutex::new(Channels::default()),
            cond: Condvar::new(),
            ibox_bell: Doorbell::new(false)?,
            wbox_bell: Doorbell::new(true)?,
            regs: Mutex::new(Box::new([[0; 4]; 128])),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn ls(&self) -> &LocalStore {
        &self.ls
    }

    pub fn ibox_bell(&self) -> &Doorbell {
        &self.ibox_bell
    }

    pub fn wbox_bell(&self) -> &Doorbell {
        &self.wbox_bell
    }

    pub fn regs(&self) -> MutexGuard<'_, Box<Registers>> {
        self.regs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chans(&self) -> MutexGuard<'_, Channels> {
        self.chans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Channels>) -> MutexGuard<'a, Channels> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn changed(&self, chans: &Channels) {
        self.wbox_bell.set(chans.in_mbox.is_none());
        self.ibox_bell.set(chans.out_intr_mbox.is_some());
        self.cond.notify_all();
    }

    // host side

    pub fn write_in_mbox(&self, val: u32, block: bool) -> Result<(), Error> {
        let mut chans = self.chans();
        while chans.in_mbox.is_some() {
            if !block {
                return Err(Error::new(Code::WouldBlock));
            }
            chans = self.wait(chans);
        }
        chans.in_mbox = Some(val);
        self.changed(&chans);
        Ok(())
    }

    pub fn in_mbox_space(&self) -> u32 {
        self.chans().in_mbox.is_none() as u32
    }

    pub fn read_out_mbox(&self) -> Option<u32> {
        let mut chans = self.chans();
        let val = chans.out_mbox.take();
        if val.is_some() {
            self.changed(&chans);
        }
        val
    }

    pub fn out_mbox_count(&self) -> u32 {
        self.chans().out_mbox.is_some() as u32
    }

    pub fn read_out_intr_mbox(&self, block: bool) -> Result<u32, Error> {
        let mut chans = self.chans();
        loop {
            if let Some(val) = chans.out_intr_mbox.take() {
                self.changed(&chans);
                return Ok(val);
            }
            if !block {
                return Err(Error::new(Code::WouldBlock));
            }
            chans = self.wait(chans);
        }
    }

    pub fn out_intr_mbox_count(&self) -> u32 {
        self.chans().out_intr_mbox.is_some() as u32
    }

    pub fn write_signal(&self, idx: usize, val: u32) {
        let mut chans = self.chans();
        if chans.signal_or[idx] {
            chans.signal[idx] |= val;
        }
        else {
            chans.signal[idx] = val;
        }
        self.changed(&chans);
    }

    pub fn read_signal(&self, idx: usize) -> u32 {
        self.chans().signal[idx]
    }

    pub fn set_signal_or(&self, idx: usize, or: bool) {
        self.chans().signal_or[idx] = or;
    }

    pub fn signal_or(&self, idx: usize) -> bool {
        self.chans().signal_or[idx]
    }

    // SPU side

    /// Reads from the given channel, blocking until data is available
    ///
    /// Returns `None` for channels the emulator does not provide.
    pub fn read_channel(&self, ch: Channel) -> Option<u32> {
        let mut chans = self.chans();
        let val = match ch {
            Channel::RD_IN_MBOX => loop {
                if let Some(val) = chans.in_mbox.take() {
                    break val;
                }
                chans = self.wait(chans);
            },
            Channel::RD_SIG_NOTIFY1 | Channel::RD_SIG_NOTIFY2 => {
                let idx = (ch.val - Channel::RD_SIG_NOTIFY1.val) as usize;
                while chans.signal[idx] == 0 {
                    chans = self.wait(chans);
                }
                std::mem::replace(&mut chans.signal[idx], 0)
            },
            _ => return None,
        };
        self.changed(&chans);
        Some(val)
    }

    /// Writes `val` to the given channel, blocking until there is space
    ///
    /// Returns `None` for channels the emulator does not provide.
    pub fn write_channel(&self, ch: Channel, val: u32) -> Option<()> {
        if ch != Channel::WR_OUT_MBOX && ch != Channel::WR_OUT_INTR_MBOX {
            return None;
        }

        let mut chans = self.chans();
        loop {
            let slot = match ch {
                Channel::WR_OUT_MBOX => &mut chans.out_mbox,
                _ => &mut chans.out_intr_mbox,
            };
            if slot.is_none() {
                *slot = Some(val);
                break;
            }
            chans = self.wait(chans);
        }
        self.changed(&chans);
        Some(())
    }

    /// Returns the number of elements the given channel can currently deliver or accept
    pub fn channel_count(&self, ch: Channel) -> Option<u32> {
        let chans = self.chans();
        match ch {
            Channel::RD_IN_MBOX => Some(chans.in_mbox.is_some() as u32),
            Channel::WR_OUT_MBOX => Some(chans.out_mbox.is_none() as u32),
            Channel::WR_OUT_INTR_MBOX => Some(chans.out_intr_mbox.is_none() as u32),
            Channel::RD_SIG_NOTIFY1 => Some((chans.signal[0] != 0) as u32),
            Channel::RD_SIG_NOTIFY2 => Some((chans.signal[1] != 0) as u32),
            _ => None,
        }
    }
}
