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

//! Contains the error handling types

use std::fmt;
use std::io;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The error codes
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Code {
    // success
    #[default]
    Success = 0,
    /// An argument was invalid (bad region kind, unsupported mask, invalid local-store range)
    InvArgs,
    /// No more contexts, groups, or registration slots
    NoSpace,
    /// The resource exists, but access is denied
    NoPerm,
    /// The operation or flag is not supported by the kernel or hardware
    NotSup,
    /// The resource is in use
    Busy,
    /// The resource has already been destroyed
    Destroyed,
    /// A wait expired
    Timeout,
    /// A genuine transport failure
    IoError,
    /// A non-blocking operation could not make progress
    WouldBlock,
    /// The DMA queue is momentarily full; the caller should retry
    QueueFull,
    /// A blocking call was interrupted by a signal
    Interrupted,
    NoSuchFile,
    OutOfBounds,
    Exists,
}

/// The error struct that is passed around
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    code: Code,
}

impl Error {
    /// Creates a new object for given error code
    pub fn new(code: Code) -> Self {
        Error { code }
    }

    /// Returns the error code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Returns an error for the given errno value
    pub fn from_errno(errno: i32) -> Self {
        Self::new(match errno {
            libc::EAGAIN => Code::WouldBlock,
            libc::EIO => Code::QueueFull,
            libc::EINTR => Code::Interrupted,
            libc::ENOENT => Code::NoSuchFile,
            libc::EACCES | libc::EPERM => Code::NoPerm,
            libc::ENOMEM | libc::ENOSPC | libc::EMFILE | libc::ENFILE => Code::NoSpace,
            libc::EBUSY => Code::Busy,
            libc::EINVAL | libc::EBADF => Code::InvArgs,
            libc::ENOSYS | libc::EOPNOTSUPP | libc::ENODEV => Code::NotSup,
            libc::EEXIST => Code::Exists,
            libc::ETIMEDOUT => Code::Timeout,
            _ => Code::IoError,
        })
    }

    /// Returns an error for the current value of errno
    pub fn last_os_error() -> Self {
        Self::from(io::Error::last_os_error())
    }
}

impl From<Code> for Error {
    fn from(code: Code) -> Self {
        Self::new(code)
    }
}

impl From<Error> for Code {
    fn from(err: Error) -> Self {
        err.code()
    }
}

impl From<Code> for Result<(), Error> {
    fn from(code: Code) -> Self {
        match code {
            Code::Success => Ok(()),
            e => Err(Error::new(e)),
        }
    }
}

impl<T> From<Result<T, Error>> for Code {
    fn from(res: Result<T, Error>) -> Self {
        match res {
            Ok(_) => Code::Success,
            Err(e) => e.code(),
        }
    }
}

impl From<u32> for Error {
    fn from(error: u32) -> Self {
        Self::new(Code::try_from(error).unwrap_or(Code::IoError))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => Self::new(match err.kind() {
                io::ErrorKind::WouldBlock => Code::WouldBlock,
                io::ErrorKind::Interrupted => Code::Interrupted,
                io::ErrorKind::NotFound => Code::NoSuchFile,
                io::ErrorKind::PermissionDenied => Code::NoPerm,
                io::ErrorKind::TimedOut => Code::Timeout,
                io::ErrorKind::InvalidInput => Code::InvArgs,
                _ => Code::IoError,
            }),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code())
    }
}

impl std::error::Error for Error {
}

/// A verbose error type that contains an error message
pub struct VerboseError {
    code: Code,
    msg: String,
}

impl VerboseError {
    /// Creates a new error with given error code and error message
    pub fn new(code: Code, msg: String) -> Self {
        Self { code, msg }
    }

    /// Returns the error code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Returns the error message
    pub fn msg(&self) -> &String {
        &self.msg
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.msg, self.code)
    }
}

impl From<Error> for VerboseError {
    fn from(e: Error) -> Self {
        Self::new(e.code(), String::default())
    }
}

impl fmt::Debug for VerboseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug(f)
    }
}

impl fmt::Display for VerboseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug(f)
    }
}
