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

//! Thin wrappers around the Linux primitives used by the backends and the event multiplexer

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use base::errors::{Code, Error};
use base::libc;

use derivative::Derivative;

fn check(res: libc::c_int) -> Result<libc::c_int, Error> {
    if res == -1 {
        Err(Error::last_os_error())
    }
    else {
        Ok(res)
    }
}

fn owned(res: libc::c_int) -> Result<OwnedFd, Error> {
    let fd = check(res)?;
    // safety: the fd has just been created by the kernel and is owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Reads from `fd` into `buf`
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, Error> {
    let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if res < 0 {
        Err(Error::last_os_error())
    }
    else {
        Ok(res as usize)
    }
}

/// Writes `buf` to `fd`
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, Error> {
    let res = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if res < 0 {
        Err(Error::last_os_error())
    }
    else {
        Ok(res as usize)
    }
}

/// Flushes `fd`
pub fn fsync(fd: RawFd) -> Result<(), Error> {
    check(unsafe { libc::fsync(fd) }).map(|_| ())
}

/// Opens `name` relative to the directory `dir`
pub fn openat(dir: RawFd, name: &str, flags: libc::c_int) -> Result<OwnedFd, Error> {
    let cname = CString::new(name).map_err(|_| Error::new(Code::InvArgs))?;
    owned(unsafe { libc::openat(dir, cname.as_ptr(), flags | libc::O_CLOEXEC) })
}

/// Waits up to `timeout_ms` milliseconds until `fd` reports one of `events`
///
/// A negative timeout waits forever. Returns false if the time expired.
pub fn poll_one(fd: RawFd, events: u32, timeout_ms: i32) -> Result<bool, Error> {
    let mut pfd = libc::pollfd {
        fd,
        events: events as libc::c_short,
        revents: 0,
    };
    let res = check(unsafe { libc::poll(&mut pfd, 1, timeout_ms) })?;
    Ok(res > 0 && (pfd.revents as u32 & events) != 0)
}

/// Creates a non-blocking pipe and returns the read and the write end
pub fn pipe() -> Result<(OwnedFd, OwnedFd), Error> {
    let mut fds = [0 as libc::c_int; 2];
    check(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) })?;
    // safety: both fds have just been created
    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}

/// Creates a non-blocking eventfd with a counter of zero
pub fn eventfd() -> Result<OwnedFd, Error> {
    owned(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })
}

/// Creates an anonymous memory file of `size` bytes
pub fn memfd(name: &str, size: usize) -> Result<OwnedFd, Error> {
    let cname = CString::new(name).map_err(|_| Error::new(Code::InvArgs))?;
    let fd = owned(unsafe { libc::memfd_create(cname.as_ptr(), libc::MFD_CLOEXEC) })?;
    check(unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) })?;
    Ok(fd)
}

/// A shared memory mapping of a file, which is unmapped on drop
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Mapping {
    #[derivative(Debug(format_with = "fmt_addr"))]
    addr: *mut u8,
    size: usize,
}

fn fmt_addr(addr: &*mut u8, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:#x}", *addr as usize)
}

// the mapping is plain shared memory; concurrent accesses are the business of its users
unsafe impl Send for Mapping {
}
unsafe impl Sync for Mapping {
}

impl Mapping {
    /// Maps `size` bytes at `offset` of `fd` readable and writable
    pub fn new(fd: RawFd, offset: usize, size: usize) -> Result<Self, Error> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        Ok(Self {
            addr: addr as *mut u8,
            size,
        })
    }

    /// Returns the start address
    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    /// Returns the size in bytes
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.size);
        }
    }
}

/// An epoll instance
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    /// Creates a new epoll instance
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            fd: owned(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?,
        })
    }

    /// Adds `fd` to the interest list, waiting for `events` and reporting `data` on readiness
    pub fn add(&self, fd: RawFd, events: u32, data: u64) -> Result<(), Error> {
        let mut ev = libc::epoll_event { events, u64: data };
        check(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev) })
            .map(|_| ())
    }

    /// Waits up to `timeout_ms` milliseconds (forever if negative) for ready fds
    ///
    /// Returns the data values of the ready fds. A signal delivered during the wait results in
    /// [`Code::Interrupted`].
    pub fn wait(&self, max: usize, timeout_ms: i32) -> Result<Vec<u64>, Error> {
        let mut evs = vec![libc::epoll_event { events: 0, u64: 0 }; max.max(1)];
        let res = check(unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                evs.as_mut_ptr(),
                evs.len() as libc::c_int,
                timeout_ms,
            )
        })?;
        Ok(evs[..res as usize].iter().map(|ev| ev.u64).collect())
    }
}
