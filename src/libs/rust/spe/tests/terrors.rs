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

use std::io;

use base::errors::{Code, Error};
use base::libc;
use base::test::WvTester;

pub fn run(t: &mut dyn WvTester) {
    wv_run_test!(t, raw_codes);
    wv_run_test!(t, errno);
}

fn raw_codes(t: &mut dyn WvTester) {
    wv_assert_eq!(t, u32::from(Code::Success), 0);
    wv_assert_eq!(t, u32::from(Code::NotSup), 4);
    wv_assert_eq!(t, Error::from(u32::from(Code::Busy)).code(), Code::Busy);
    wv_assert_eq!(t, Error::from(u32::from(Code::QueueFull)).code(), Code::QueueFull);
    // unknown codes are reported as transport failures
    wv_assert_eq!(t, Error::from(0xFFFF_u32).code(), Code::IoError);

    let res: Result<(), Error> = Code::Success.into();
    wv_assert_eq!(t, res, Ok(()));
    let res: Result<(), Error> = Code::Timeout.into();
    wv_assert_err!(t, res, Code::Timeout);
}

fn errno(t: &mut dyn WvTester) {
    wv_assert_eq!(t, Error::from_errno(libc::EAGAIN).code(), Code::WouldBlock);
    wv_assert_eq!(t, Error::from_errno(libc::EIO).code(), Code::QueueFull);
    wv_assert_eq!(t, Error::from_errno(libc::EINTR).code(), Code::Interrupted);
    wv_assert_eq!(t, Error::from_errno(libc::ENOSYS).code(), Code::NotSup);
    wv_assert_eq!(t, Error::from_errno(libc::EXDEV).code(), Code::IoError);

    let err = io::Error::from(io::ErrorKind::TimedOut);
    wv_assert_eq!(t, Error::from(err).code(), Code::Timeout);
}
