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

//! The files of an emulated context directory

use std::os::fd::RawFd;
use std::sync::Arc;

use base::errors::{Code, Error};

use crate::arch::sim::mfc::Mfc;
use crate::arch::sim::spu::Spu;
use crate::arch::{FileKind, SpuFile};

const WORD: usize = 4;

pub struct SimFile {
    kind: FileKind,
    spu: Arc<Spu>,
    mfc: Option<Arc<Mfc>>,
}

impl SimFile {
    pub fn new(kind: FileKind, spu: Arc<Spu>, mfc: Option<Arc<Mfc>>) -> Self {
        Self { kind, spu, mfc }
    }

    fn mfc(&self) -> Result<&Mfc, Error> {
        self.mfc.as_deref().ok_or_else(|| Error::new(Code::NoSuchFile))
    }

    fn signal_idx(&self) -> usize {
        match self.kind {
            FileKind::Signal1 | FileKind::Signal1Type => 0,
            _ => 1,
        }
    }
}

fn put_word(buf: &mut [u8], val: u32) -> Result<usize, Error> {
    if buf.len() < WORD {
        return Err(Error::new(Code::InvArgs));
    }
    buf[..WORD].copy_from_slice(&val.to_ne_bytes());
    Ok(WORD)
}

fn get_word(buf: &[u8]) -> Result<u32, Error> {
    match buf.get(..WORD) {
        Some(raw) => Ok(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]])),
        None => Err(Error::new(Code::InvArgs)),
    }
}

impl SpuFile for SimFile {
    fn kind(&self) -> FileKind {
        self.kind
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.kind {
            FileKind::Mbox => match self.spu.read_out_mbox() {
                Some(val) => put_word(buf, val),
                None => Err(Error::new(Code::WouldBlock)),
            },
            FileKind::Ibox | FileKind::IboxNb => {
                if buf.len() < WORD {
                    return Err(Error::new(Code::InvArgs));
                }
                let val = self.spu.read_out_intr_mbox(self.kind == FileKind::Ibox)?;
                put_word(buf, val)
            },
            FileKind::MboxStat => put_word(buf, self.spu.out_mbox_count()),
            FileKind::IboxStat => put_word(buf, self.spu.out_intr_mbox_count()),
            FileKind::WboxStat => put_word(buf, self.spu.in_mbox_space()),
            FileKind::Signal1 | FileKind::Signal2 => {
                put_word(buf, self.spu.read_signal(self.signal_idx()))
            },
            FileKind::Signal1Type | FileKind::Signal2Type => {
                let mode = if self.spu.signal_or(self.signal_idx()) { b'1' } else { b'0' };
                match buf.first_mut() {
                    Some(b) => {
                        *b = mode;
                        Ok(1)
                    },
                    None => Err(Error::new(Code::InvArgs)),
                }
            },
            FileKind::Mfc => put_word(buf, self.mfc()?.read_status()),
            _ => Err(Error::new(Code::InvArgs)),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        match self.kind {
            FileKind::Wbox | FileKind::WboxNb => {
                // the first word may block, the remaining ones are only written if there is space
                let mut written = 0;
                for word in buf.chunks_exact(WORD) {
                    let block = written == 0 && self.kind == FileKind::Wbox;
                    match self.spu.write_in_mbox(get_word(word)?, block) {
                        Ok(()) => written += WORD,
                        Err(e) if written == 0 => return Err(e),
                        Err(_) => break,
                    }
                }
                Ok(written)
            },
            FileKind::Signal1 | FileKind::Signal2 => {
                self.spu.write_signal(self.signal_idx(), get_word(buf)?);
                Ok(WORD)
            },
            FileKind::Signal1Type | FileKind::Signal2Type => {
                let mode = std::str::from_utf8(buf)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .ok_or_else(|| Error::new(Code::InvArgs))?;
                self.spu.set_signal_or(self.signal_idx(), mode != 0);
                Ok(buf.len())
            },
            FileKind::Mfc => self.mfc()?.enqueue(buf),
            _ => Err(Error::new(Code::InvArgs)),
        }
    }

    fn sync(&self) -> Result<(), Error> {
        if self.kind == FileKind::Mfc {
            self.mfc()?.sync();
        }
        Ok(())
    }

    fn poll_fd(&self) -> Option<(RawFd, u32)> {
        let bell = match self.kind {
            FileKind::Ibox | FileKind::IboxNb => self.spu.ibox_bell(),
            FileKind::Wbox | FileKind::WboxNb => self.spu.wbox_bell(),
            FileKind::Mfc => self.mfc.as_deref()?.bell(),
            _ => return None,
        };
        Some((bell.raw_fd(), bell.events()))
    }

    fn map_fd(&self) -> Option<RawFd> {
        match self.kind {
            FileKind::Mem => Some(self.spu.ls().raw_fd()),
            _ => None,
        }
    }
}

