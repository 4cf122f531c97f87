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

//! The host runtime for SPE accelerator contexts.
//!
//! A [`Context`](context::Context) binds one synergistic processing unit (SPU). Contexts can be
//! collected in scheduling [`Group`](group::Group)s, started via
//! [`Context::run`](context::Context::run), fed with data through the DMA engine
//! ([`mfcio`]) and the mailboxes ([`mbox`]), and observed through the event multiplexer
//! ([`event`]).
//!
//! All kernel interaction goes through the traits in [`arch`]. The runtime ships two backends: the
//! Linux spufs interface and an emulated spufs that runs SPU programs in a small interpreter,
//! which is used by the tests and on development hosts without Cell hardware.

#[macro_use]
extern crate base;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate cfg_if;

pub mod arch;
pub mod callback;
pub mod config;
pub mod context;
pub mod event;
pub mod fdcache;
pub mod group;
pub mod image;
pub mod isa;
pub mod kif;
pub mod mbox;
pub mod mfcio;
pub mod psmap;
pub mod trampoline;

pub use base::errors;
pub use base::io::LogFlags;

pub use crate::context::{Affinity, Context, CreateArgs, CreateFlags, StopInfo, DEFAULT_ENTRY};
pub use crate::event::{EventHandler, EventMask, Occurrence, Registration, Target};
pub use crate::group::{Group, GroupArgs, SchedClass, SchedPolicy};
pub use crate::mbox::{Behavior, SignalReg};
pub use crate::mfcio::{TagPolicy, Transfer};
pub use crate::psmap::{PsArea, RegionKind};
pub use crate::trampoline::RegBlock;
