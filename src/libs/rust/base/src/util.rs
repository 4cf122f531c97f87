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

//! Contains utilities

use std::mem;
use std::slice;

/// Creates a byte slice for the given object
pub fn object_to_bytes<T: Sized>(obj: &T) -> &[u8] {
    let p: *const T = obj;
    let p: *const u8 = p as *const u8;
    unsafe { slice::from_raw_parts(p, mem::size_of::<T>()) }
}

/// Creates an struct where the members can be used as integers, similar to C enums.
///
/// # Examples
///
/// ```
/// int_enum! {
///     /// My enum
///     pub struct Test : u8 {
///        const VAL_1 = 0x0;
///        const VAL_2 = 0x1;
///     }
/// }
/// ```
///
/// Each struct member has the field `val`, which corresponds to its value. The macro implements the
/// traits [`Debug`](std::fmt::Debug) and [`Display`](std::fmt::Display). Furthermore, it allows to
/// convert from the underlying type (here [`u8`]) to the struct.
#[macro_export]
macro_rules! int_enum {
    (
        $(#[$outer:meta])*
        pub struct $Name:ident: $T:ty {
            $(
                $(#[$inner:ident $($args:tt)*])*
                const $Flag:ident = $value:expr;
            )+
        }
    ) => (
        $(#[$outer])*
        #[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash)]
        pub struct $Name {
            pub val: $T,
        }

        int_enum! {
            @enum_impl struct $Name : $T {
                $(
                    $(#[$inner $($args)*])*
                    const $Flag = $value;
                )+
            }
        }
    );

    (
        @enum_impl struct $Name:ident: $T:ty {
            $(
                $(#[$attr:ident $($args:tt)*])*
                const $Flag:ident = $value:expr;
            )+
        }
    ) => (
        impl $Name {
            $(
                $(#[$attr $($args)*])*
                #[allow(dead_code)]
                pub const $Flag: $Name = $Name { val: $value };
            )+

            pub fn print(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                $(
                    if self.val == $value {
                        return f.write_str(stringify!($Flag));
                    }
                )+
                f.write_str("(unknown)")
            }
        }

        impl From<$T> for $Name {
            fn from(val: $T) -> Self {
                $Name { val }
            }
        }

        impl std::fmt::Debug for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}:", self.val)?;
                self.print(f)
            }
        }
        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.print(f)
            }
        }
    )
}
