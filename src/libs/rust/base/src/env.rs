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

//! Provides access to the program environment

use std::str::FromStr;

/// Returns the value of the environment variable `name`, if it is set and valid unicode
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Returns the value of the environment variable `name` parsed as `T`, or `def` if the variable
/// is not set or cannot be parsed
///
/// # Examples
///
/// ```
/// let spus: usize = base::env::var_or("SPE_SIM_SPUS", 8);
/// ```
pub fn var_or<T: FromStr>(name: &str, def: T) -> T {
    match var(name) {
        Some(v) => v.trim().parse().unwrap_or(def),
        None => def,
    }
}

/// Returns true if the environment variable `name` is set to a truthy value (`1`, `true`, `yes`,
/// or `on`)
pub fn var_flag(name: &str) -> bool {
    match var(name) {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}
