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

//! Mailboxes and signal-notification registers
//!
//! Every context has three one-word mailboxes: the inbound mailbox written by the host, and the
//! outbound and outbound-interrupt mailboxes written by the SPU. A mailbox holds a single word;
//! writing to a full mailbox either blocks or fails, depending on the requested [`Behavior`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::arch::{self, os, FileKind, SpuFile};
use crate::context::Context;

const WORD: usize = 4;

/// The blocking behavior of mailbox transfers
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Behavior {
    /// Blocks until all words have been transferred
    AllBlocking,
    /// Blocks until at least one word has been transferred
    AnyBlocking,
    /// Transfers as many words as possible without blocking
    AnyNonBlocking,
}

/// The signal-notification registers
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignalReg {
    Sig1,
    Sig2,
}

fn write_words(file: &dyn SpuFile, data: &[u32]) -> Result<usize, Error> {
    let bytes: Vec<u8> = data.iter().flat_map(|w| w.to_ne_bytes()).collect();
    Ok(file.write(&bytes)? / WORD)
}

fn read_words(file: &dyn SpuFile, buf: &mut [u32]) -> Result<usize, Error> {
    let mut bytes = vec![0u8; buf.len() * WORD];
    let words = file.read(&mut bytes)? / WORD;
    for (w, raw) in buf.iter_mut().zip(bytes.chunks_exact(WORD)).take(words) {
        *w = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
    }
    Ok(words)
}

fn nonblocking(res: Result<usize, Error>) -> Result<usize, Error> {
    match res {
        Err(e) if e.code() == Code::WouldBlock => Ok(0),
        r => r,
    }
}

impl Context {
    fn mbox_file(&self, kind: FileKind) -> Result<Arc<dyn SpuFile>, Error> {
        self.inner().file(kind)
    }

    /// Writes `data` into the inbound mailbox and returns the number of written words
    ///
    /// With [`Behavior::AnyNonBlocking`], [`Code::WouldBlock`] is returned if the mailbox is full.
    /// If a blocking write is interrupted by a signal after some words have been written, the
    /// number of written words is returned; otherwise, [`Code::Interrupted`] is returned.
    pub fn in_mbox_write(&self, data: &[u32], behavior: Behavior) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }

        let ctx = self.inner().begin_op()?;
        let written = match behavior {
            Behavior::AnyNonBlocking => write_words(&*ctx.file(FileKind::WboxNb)?, data)?,
            Behavior::AnyBlocking => write_words(&*ctx.file(FileKind::Wbox)?, data)?,
            Behavior::AllBlocking => {
                let file = ctx.file(FileKind::Wbox)?;
                let mut done = 0;
                while done < data.len() {
                    match write_words(&*file, &data[done..]) {
                        Ok(n) => done += n,
                        Err(e) if e.code() == Code::Interrupted && done > 0 => break,
                        Err(e) => return Err(e),
                    }
                }
                done
            },
        };

        log!(
            LogFlags::SpeMbox,
            "{}: wrote {}/{} words to inbound mailbox",
            ctx.path(),
            written,
            data.len()
        );
        match written {
            0 => Err(Error::new(Code::WouldBlock)),
            n => Ok(n),
        }
    }

    /// Returns the number of words that can be written to the inbound mailbox without blocking
    pub fn in_mbox_status(&self) -> Result<u32, Error> {
        arch::read_word(&*self.mbox_file(FileKind::WboxStat)?)
    }

    /// Reads up to `buf.len()` words from the outbound mailbox without blocking
    ///
    /// Returns the number of words read, which is 0 if the mailbox is empty.
    pub fn out_mbox_read(&self, buf: &mut [u32]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let ctx = self.inner().begin_op()?;
        let n = nonblocking(read_words(&*ctx.file(FileKind::Mbox)?, buf))?;
        log!(LogFlags::SpeMbox, "{}: read {} words from outbound mailbox", ctx.path(), n);
        Ok(n)
    }

    /// Returns the number of words in the outbound mailbox
    pub fn out_mbox_status(&self) -> Result<u32, Error> {
        arch::read_word(&*self.mbox_file(FileKind::MboxStat)?)
    }

    /// Reads up to `buf.len()` words from the outbound interrupt mailbox
    ///
    /// Returns the number of words read. With [`Behavior::AnyNonBlocking`], this is 0 if the
    /// mailbox is empty.
    pub fn out_intr_mbox_read(&self, buf: &mut [u32], behavior: Behavior) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let ctx = self.inner().begin_op()?;
        let n = match behavior {
            Behavior::AnyNonBlocking => {
                nonblocking(read_words(&*ctx.file(FileKind::IboxNb)?, buf))?
            },
            Behavior::AnyBlocking => read_words(&*ctx.file(FileKind::Ibox)?, buf)?,
            Behavior::AllBlocking => {
                let file = ctx.file(FileKind::Ibox)?;
                let mut done = 0;
                while done < buf.len() {
                    match read_words(&*file, &mut buf[done..]) {
                        Ok(n) => done += n,
                        Err(e) if e.code() == Code::Interrupted && done > 0 => break,
                        Err(e) => return Err(e),
                    }
                }
                done
            },
        };
        log!(
            LogFlags::SpeMbox,
            "{}: read {} words from outbound interrupt mailbox",
            ctx.path(),
            n
        );
        Ok(n)
    }

    /// Reads up to `buf.len()` words from the outbound interrupt mailbox, waiting at most
    /// `timeout` for the first one
    ///
    /// Fails with [`Code::Timeout`] if no word arrived in time.
    pub fn out_intr_mbox_read_timeout(
        &self,
        buf: &mut [u32],
        timeout: Duration,
    ) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let ctx = self.inner().begin_op()?;
        let file = ctx.file(FileKind::IboxNb)?;
        let (fd, events) = file.poll_fd().ok_or_else(|| Error::new(Code::NotSup))?;
        let deadline = Instant::now() + timeout;
        loop {
            let n = nonblocking(read_words(&*file, buf))?;
            if n > 0 {
                return Ok(n);
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Error::new(Code::Timeout));
            }
            // round up to not spin during the last millisecond
            let ms = left.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32;
            os::poll_one(fd, events, ms)?;
        }
    }

    /// Returns the number of words in the outbound interrupt mailbox
    pub fn out_intr_mbox_status(&self) -> Result<u32, Error> {
        arch::read_word(&*self.mbox_file(FileKind::IboxStat)?)
    }

    /// Writes `val` to the given signal-notification register
    ///
    /// Depending on the creation flags of the context, the value replaces the register content or
    /// is ORed into it.
    pub fn signal_write(&self, reg: SignalReg, val: u32) -> Result<(), Error> {
        let ctx = self.inner().begin_op()?;
        let kind = match reg {
            SignalReg::Sig1 => FileKind::Signal1,
            SignalReg::Sig2 => FileKind::Signal2,
        };
        log!(LogFlags::SpeMbox, "{}: signal {:?} <- {:#x}", ctx.path(), reg, val);
        arch::write_word(&*ctx.file(kind)?, val)
    }
}
