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

//! The Linux spufs backend
//!
//! Contexts and gangs are directories in spufs, created via the `spu_create` system call. The
//! files of a context are opened relative to the directory fd, and `spu_run` executes the context
//! until it stops. The directory vanishes as soon as its fd is closed.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base::errors::{Code, Error};
use base::io::LogFlags;
use base::libc;

use crate::arch::{
    os, CreateRequest, FileKind, GangDir, GangRequest, Kernel, KernelFeatures, SpuDir, SpuFile,
};
use crate::kif::SpuCreateFlags;

cfg_if! {
    if #[cfg(any(target_arch = "powerpc", target_arch = "powerpc64"))] {
        const SYS_SPU_RUN: libc::c_long = 278;
        const SYS_SPU_CREATE: libc::c_long = 279;

        fn spu_create(
            path: &str,
            flags: SpuCreateFlags,
            mode: u32,
            neighbor: Option<RawFd>,
        ) -> Result<OwnedFd, Error> {
            use std::ffi::CString;
            use std::os::fd::FromRawFd;

            let cpath = CString::new(path).map_err(|_| Error::new(Code::InvArgs))?;
            let res = unsafe {
                match neighbor {
                    Some(fd) => libc::syscall(
                        SYS_SPU_CREATE,
                        cpath.as_ptr(),
                        flags.bits() as libc::c_uint,
                        mode as libc::mode_t,
                        fd,
                    ),
                    None => libc::syscall(
                        SYS_SPU_CREATE,
                        cpath.as_ptr(),
                        flags.bits() as libc::c_uint,
                        mode as libc::mode_t,
                    ),
                }
            };
            if res < 0 {
                return Err(Error::last_os_error());
            }
            // safety: the fd has just been created by the kernel
            Ok(unsafe { OwnedFd::from_raw_fd(res as RawFd) })
        }

        fn spu_run(fd: RawFd, npc: &mut u32) -> Result<u32, Error> {
            let mut event: u32 = 0;
            let res = unsafe {
                libc::syscall(SYS_SPU_RUN, fd, npc as *mut u32, &mut event as *mut u32)
            };
            if res < 0 {
                return Err(Error::last_os_error());
            }
            Ok(res as u32)
        }

        const AVAILABLE: bool = true;
    }
    else {
        fn spu_create(
            _path: &str,
            _flags: SpuCreateFlags,
            _mode: u32,
            _neighbor: Option<RawFd>,
        ) -> Result<OwnedFd, Error> {
            Err(Error::new(Code::NotSup))
        }

        fn spu_run(_fd: RawFd, _npc: &mut u32) -> Result<u32, Error> {
            Err(Error::new(Code::NotSup))
        }

        const AVAILABLE: bool = false;
    }
}

/// The spufs kernel backend
pub struct SpufsKernel {
    root: String,
    next_id: AtomicU32,
}

impl SpufsKernel {
    /// Creates a new backend for spufs mounted at `root`
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            next_id: AtomicU32::new(0),
        }
    }

    fn unique_name(&self, name: &str) -> String {
        format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            self.next_id.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl Kernel for SpufsKernel {
    fn name(&self) -> &'static str {
        "spufs"
    }

    fn features(&self) -> KernelFeatures {
        match AVAILABLE {
            true => KernelFeatures::all(),
            false => KernelFeatures::empty(),
        }
    }

    fn create_context(&self, req: &CreateRequest<'_>) -> Result<Box<dyn SpuDir>, Error> {
        let parent: &str = match req.gang {
            Some(g) => g.path(),
            None => &self.root,
        };
        let path = format!("{}/{}", parent, self.unique_name(req.name));
        let neighbor = match req.flags.contains(SpuCreateFlags::AFFINITY_SPU) {
            true => Some(req.neighbor.ok_or_else(|| Error::new(Code::InvArgs))?.raw_fd()),
            false => None,
        };

        let fd = spu_create(&path, req.flags, req.mode, neighbor).map_err(|e| {
            let optional = SpuCreateFlags::ISOLATE
                | SpuCreateFlags::AFFINITY_SPU
                | SpuCreateFlags::AFFINITY_MEM
                | SpuCreateFlags::NOSCHED;
            // older kernels reject unknown flags with EINVAL
            match e.code() {
                Code::InvArgs if req.flags.intersects(optional) => Error::new(Code::NotSup),
                _ => e,
            }
        })?;

        log!(LogFlags::SpeFds, "spu_create({}, {:?}) -> {}", path, req.flags, fd.as_raw_fd());
        Ok(Box::new(SpufsDir { path, fd }))
    }

    fn create_gang(&self, req: &GangRequest<'_>) -> Result<Box<dyn GangDir>, Error> {
        let path = format!("{}/{}", self.root, self.unique_name(req.name));
        let fd = spu_create(&path, SpuCreateFlags::GANG, req.mode, None)?;
        log!(LogFlags::SpeFds, "spu_create({}, GANG) -> {}", path, fd.as_raw_fd());
        Ok(Box::new(SpufsGang { path, _fd: fd }))
    }
}

struct SpufsDir {
    path: String,
    fd: OwnedFd,
}

impl SpuDir for SpufsDir {
    fn path(&self) -> &str {
        &self.path
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn open(&self, kind: FileKind) -> Result<Arc<dyn SpuFile>, Error> {
        let mut flags = match kind {
            FileKind::Mbox
            | FileKind::MboxStat
            | FileKind::Ibox
            | FileKind::IboxNb
            | FileKind::IboxStat
            | FileKind::WboxStat => libc::O_RDONLY,
            FileKind::Wbox | FileKind::WboxNb => libc::O_WRONLY,
            _ => libc::O_RDWR,
        };
        if kind.is_nonblocking() {
            flags |= libc::O_NONBLOCK;
        }

        let fd = os::openat(self.fd.as_raw_fd(), kind.name(), flags)?;
        log!(
            LogFlags::SpeFds,
            "{}: opened {} -> {}",
            self.path,
            kind.name(),
            fd.as_raw_fd()
        );
        Ok(Arc::new(SpufsFile { kind, fd }))
    }

    fn run(&self, npc: &mut u32) -> Result<u32, Error> {
        spu_run(self.fd.as_raw_fd(), npc)
    }
}

struct SpufsGang {
    path: String,
    _fd: OwnedFd,
}

impl GangDir for SpufsGang {
    fn path(&self) -> &str {
        &self.path
    }
}

struct SpufsFile {
    kind: FileKind,
    fd: OwnedFd,
}

impl SpuFile for SpufsFile {
    fn kind(&self) -> FileKind {
        self.kind
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        os::read(self.fd.as_raw_fd(), buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        os::write(self.fd.as_raw_fd(), buf)
    }

    fn sync(&self) -> Result<(), Error> {
        os::fsync(self.fd.as_raw_fd())
    }

    fn poll_fd(&self) -> Option<(RawFd, u32)> {
        let events = match self.kind {
            FileKind::Ibox | FileKind::IboxNb | FileKind::Mfc => libc::EPOLLIN,
            FileKind::Wbox | FileKind::WboxNb => libc::EPOLLOUT,
            _ => return None,
        };
        Some((self.fd.as_raw_fd(), events as u32))
    }

    fn map_fd(&self) -> Option<RawFd> {
        match self.kind {
            FileKind::Mem
            | FileKind::Psmap
            | FileKind::Mss
            | FileKind::Cntl
            | FileKind::Signal1
            | FileKind::Signal2 => Some(self.fd.as_raw_fd()),
            _ => None,
        }
    }
}
