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

//! Loadable SPU program images

use crate::kif;

/// A program image produced by a loader
pub trait Image {
    /// Returns the local-store address the image is loaded to
    fn load_addr(&self) -> u32;

    /// Returns the bytes to copy into the local store
    fn bytes(&self) -> &[u8];

    /// Returns the entry point
    fn entry(&self) -> u32;
}

/// A flat image that is copied to the local store as is
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawImage {
    addr: u32,
    data: Vec<u8>,
    entry: u32,
}

impl RawImage {
    /// Creates an image with `data` loaded at `addr`, starting at `entry`
    pub fn new(addr: u32, data: Vec<u8>, entry: u32) -> Self {
        Self { addr, data, entry }
    }

    /// Creates an image from SPU instructions loaded at `addr`, starting at its first instruction
    pub fn from_insns(addr: u32, insns: &[u32]) -> Self {
        Self::new(addr, crate::isa::assemble(insns), addr & kif::LSLR)
    }
}

impl Image for RawImage {
    fn load_addr(&self) -> u32 {
        self.addr
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn entry(&self) -> u32 {
        self.entry
    }
}
