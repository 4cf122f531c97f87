/*
 * Copyright (C) 2018 Nils Asmussen <nils@os.inf.tu-dresden.de>
 * Economic rights: Technische Universitaet Dresden (Germany)
 *
 * Copyright (C) 2019-2024 Nils Asmussen, Barkhausen Institut
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

//! The base library shared by the SPE runtime and its test programs.
//!
//! It contains the error codes, the logger, configuration helpers for environment variables,
//! some integer utilities and the WvTest-style unittest framework.

// Macros
pub use static_assertions::const_assert;

pub use libc;

#[macro_use]
pub mod io;
#[macro_use]
pub mod util;

pub mod env;
pub mod errors;
pub mod math;
