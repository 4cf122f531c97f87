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

//! Library callbacks issued by SPU programs
//!
//! An SPU program requests a service from the host by executing a stop instruction with a code in
//! the range 0x2100..=0x21FF, followed by a word with the address of its argument block. The low
//! byte of the stop code selects the handler. [`Context::run`](crate::Context::run) hands these
//! requests to the [`CallbackRegistry`] of the context and resumes the program afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::psmap::PsArea;

/// The largest valid callback opcode
pub const MAX_OPCODE: u32 = 0xFF;

/// The source of callback handlers consulted by [`Context::run`](crate::Context::run)
pub trait CallbackRegistry: Send + Sync {
    /// Executes the handler for `opcode` with the local store of the stopped context and the
    /// argument word following the stop instruction
    ///
    /// Returns `None` if there is no handler for `opcode`.
    fn dispatch(&self, ls: &PsArea<'_>, opcode: u32, arg: u32) -> Option<Result<(), Error>>;
}

/// A callback handler
pub type Handler = Arc<dyn Fn(&PsArea<'_>, u32) -> Result<(), Error> + Send + Sync>;

/// A [`CallbackRegistry`] based on a table indexed by opcode
#[derive(Default)]
pub struct CallbackTable {
    handlers: Mutex<BTreeMap<u32, Handler>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> MutexGuard<'_, BTreeMap<u32, Handler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(opcode: u32) -> Result<(), Error> {
        match opcode > MAX_OPCODE {
            true => Err(Error::new(Code::InvArgs)),
            false => Ok(()),
        }
    }

    /// Registers `handler` for `opcode`, which must not have a handler yet
    pub fn register(&self, opcode: u32, handler: Handler) -> Result<(), Error> {
        Self::check(opcode)?;
        let mut handlers = self.handlers();
        if handlers.contains_key(&opcode) {
            return Err(Error::new(Code::Exists));
        }
        log!(LogFlags::SpeRun, "registered callback {:#x}", opcode);
        handlers.insert(opcode, handler);
        Ok(())
    }

    /// Replaces the existing handler for `opcode`
    pub fn update(&self, opcode: u32, handler: Handler) -> Result<(), Error> {
        Self::check(opcode)?;
        match self.handlers().get_mut(&opcode) {
            Some(h) => {
                *h = handler;
                Ok(())
            },
            None => Err(Error::new(Code::NoSuchFile)),
        }
    }

    /// Removes the handler for `opcode`
    pub fn deregister(&self, opcode: u32) -> Result<(), Error> {
        Self::check(opcode)?;
        match self.handlers().remove(&opcode) {
            Some(_) => Ok(()),
            None => Err(Error::new(Code::NoSuchFile)),
        }
    }

    /// Returns true if there is a handler for `opcode`
    pub fn query(&self, opcode: u32) -> bool {
        self.handlers().contains_key(&opcode)
    }
}

impl CallbackRegistry for CallbackTable {
    fn dispatch(&self, ls: &PsArea<'_>, opcode: u32, arg: u32) -> Option<Result<(), Error>> {
        // don't hold the lock while the handler runs; it might update the table
        let handler = self.handlers().get(&opcode).cloned()?;
        Some(handler(ls, arg))
    }
}
