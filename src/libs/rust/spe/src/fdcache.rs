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

//! The per-context cache of open kernel files
//!
//! Every file of the context directory is opened on first use and kept open until it is released
//! or the context is destroyed. Acquisitions are serialized with the teardown: once
//! [`FdCache::close_all`] has been called, all further acquisitions fail with
//! [`Code::Destroyed`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::arch::{FileKind, SpuDir, SpuFile, FILE_KINDS};

#[derive(Default)]
struct Slots {
    closed: bool,
    files: [Option<Arc<dyn SpuFile>>; FILE_KINDS],
}

/// The cache of open files for one context
#[derive(Default)]
pub struct FdCache {
    slots: Mutex<Slots>,
}

impl FdCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the file of given kind, opening it in `dir` if it is not open yet
    pub fn acquire(&self, dir: &dyn SpuDir, kind: FileKind) -> Result<Arc<dyn SpuFile>, Error> {
        let mut slots = self.slots();
        if slots.closed {
            return Err(Error::new(Code::Destroyed));
        }

        let slot = &mut slots.files[kind as usize];
        if let Some(f) = slot {
            return Ok(f.clone());
        }

        let file = dir.open(kind).map_err(|e| {
            log!(
                LogFlags::SpeFds,
                "{}: unable to open {}: {}",
                dir.path(),
                kind.name(),
                e
            );
            e
        })?;
        log!(LogFlags::SpeFds, "{}: cached {:?}", dir.path(), kind);
        *slot = Some(file.clone());
        Ok(file)
    }

    /// Closes the file of given kind, if it is open
    ///
    /// Users that still hold the file keep it alive until they drop it. Returns true if the file
    /// was open.
    pub fn release(&self, kind: FileKind) -> bool {
        self.slots().files[kind as usize].take().is_some()
    }

    /// Closes all files and refuses further acquisitions
    pub fn close_all(&self) {
        let mut slots = self.slots();
        slots.closed = true;
        for f in slots.files.iter_mut() {
            f.take();
        }
    }
}
