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

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use base::errors::Error;
use base::libc;

use crate::arch::os;

/// A level-triggered readiness indicator based on an eventfd
///
/// The eventfd is readable exactly while the doorbell is set. Callers update it under the lock
/// that protects the state the doorbell reflects.
pub struct Doorbell {
    fd: OwnedFd,
}

impl Doorbell {
    pub fn new(set: bool) -> Result<Self, Error> {
        let bell = Self { fd: os::eventfd()? };
        bell.set(set);
        Ok(bell)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn events(&self) -> u32 {
        libc::EPOLLIN as u32
    }

    pub fn set(&self, ready: bool) {
        if ready {
            os::write(self.raw_fd(), &1u64.to_ne_bytes()).ok();
        }
        else {
            // fails with WouldBlock if the counter is zero already
            let mut buf = [0u8; 8];
            os::read(self.raw_fd(), &mut buf).ok();
        }
    }
}
