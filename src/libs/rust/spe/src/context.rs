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

//! SPE contexts
//!
//! A [`Context`] binds one SPU. It owns the context directory created by the kernel, the cache of
//! its open files, the table of mapped regions and, if events are enabled, the queue of stop
//! records consumed by the event multiplexer.
//!
//! A context is used by one thread at a time, except for the event multiplexer, which may wait
//! for events of a context concurrently with its owner. Every operation holds a guard while it
//! runs, so that [`Context::destroy`] can refuse to tear down a context that is still in use.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base::errors::{Code, Error};
use base::io::LogFlags;

use derivative::Derivative;

use crate::arch::{self, os, CreateRequest, FileKind, GangDir, Kernel, KernelFeatures};
use crate::arch::{SpuDir, SpuFile};
use crate::callback::CallbackRegistry;
use crate::fdcache::FdCache;
use crate::group::Group;
use crate::image::Image;
use crate::kif::{self, RunStatus, SpuCreateFlags};
use crate::psmap::{PsArea, PsMap, RegionKind};
use crate::trampoline::{self, RegBlock};

/// Passed to [`Context::run`] to start at the entry point of the loaded program
pub const DEFAULT_ENTRY: u32 = u32::MAX;

bitflags! {
    /// The flags for the creation of a context
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct CreateFlags : u32 {
        /// Signal-notification register 1 ORs incoming values instead of overwriting
        const SIGNOTIFY1_OR = 0x0010;
        /// Signal-notification register 2 ORs incoming values instead of overwriting
        const SIGNOTIFY2_OR = 0x0020;
        /// Allow mapping the problem-state areas
        const MAP_PS        = 0x0040;
        /// Run in isolation mode; the local store is not accessible
        const ISOLATE       = 0x0080;
        /// Bind the context to a physical SPU instead of scheduling it
        const NOSCHED       = 0x0200;
        /// Report events to the event multiplexer
        const EVENTS_ENABLE = 0x1000;
    }
}

/// The placement of a new context
#[derive(Copy, Clone, Default)]
pub struct Affinity<'a> {
    /// Place the context on an SPU next to the SPU of this context
    pub neighbor: Option<&'a Context>,
    /// Place the context close to the memory
    pub memory: bool,
}

/// The arguments for [`Context::new_with`]
#[derive(Default)]
pub struct CreateArgs<'a> {
    flags: CreateFlags,
    group: Option<&'a Group>,
    affinity: Option<Affinity<'a>>,
    kernel: Option<Arc<dyn Kernel>>,
    callbacks: Option<Arc<dyn CallbackRegistry>>,
}

impl Default for CreateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> CreateArgs<'a> {
    /// Creates the default arguments: no flags, no group, no affinity and the default kernel
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: CreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Creates the context as a member of `group`
    pub fn group(mut self, group: &'a Group) -> Self {
        self.group = Some(group);
        self
    }

    pub fn affinity(mut self, affinity: Affinity<'a>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    /// Uses the given kernel backend
    ///
    /// By default, the kernel of the group is used or [`arch::default_kernel`] without group.
    pub fn kernel(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Sets the registry for library callbacks of the program
    pub fn callbacks(mut self, reg: Arc<dyn CallbackRegistry>) -> Self {
        self.callbacks = Some(reg);
        self
    }
}

/// The error class of a [`StopInfo::RuntimeError`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RuntimeError {
    Halt,
    SingleStep,
    InvalidInstruction,
    InvalidChannel,
    /// Any other status word
    Other(u32),
}

/// The reason a run ended
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopInfo {
    /// The program exited with given code
    Exit(u32),
    /// The program executed a stop-and-signal with given code
    StopAndSignal(u32),
    /// The SPU stopped due to an error
    RuntimeError(RuntimeError),
    /// The program requested a callback that has no handler or whose handler failed
    CallbackError(u32),
}

impl StopInfo {
    /// Returns true for [`StopInfo::Exit`]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit(_))
    }

    /// Returns the 32-bit value reported with this stop by the event multiplexer
    pub fn payload(&self) -> u32 {
        match *self {
            Self::Exit(code) | Self::StopAndSignal(code) => code,
            Self::CallbackError(op) => kif::STOP_CALLBACK.0 | op,
            Self::RuntimeError(RuntimeError::Halt) => RunStatus::STOPPED_BY_HALT.bits(),
            Self::RuntimeError(RuntimeError::SingleStep) => RunStatus::SINGLE_STEP.bits(),
            Self::RuntimeError(RuntimeError::InvalidInstruction) => {
                RunStatus::INVALID_INSTR.bits()
            },
            Self::RuntimeError(RuntimeError::InvalidChannel) => RunStatus::INVALID_CH.bits(),
            Self::RuntimeError(RuntimeError::Other(status)) => status,
        }
    }
}

enum Decoded {
    Stop(StopInfo),
    Callback(u32),
}

fn decode(status: u32) -> Decoded {
    let rs = RunStatus::from_bits_retain(status);
    if rs.contains(RunStatus::STOPPED_BY_STOP) {
        let code = kif::stop_code(status);
        if (kif::STOP_EXIT.0..=kif::STOP_EXIT.1).contains(&code) {
            Decoded::Stop(StopInfo::Exit(code & 0xFF))
        }
        else if (kif::STOP_CALLBACK.0..=kif::STOP_CALLBACK.1).contains(&code) {
            Decoded::Callback(code & 0xFF)
        }
        else {
            Decoded::Stop(StopInfo::StopAndSignal(code))
        }
    }
    else {
        Decoded::Stop(StopInfo::RuntimeError(
            if rs.contains(RunStatus::STOPPED_BY_HALT) {
                RuntimeError::Halt
            }
            else if rs.contains(RunStatus::INVALID_INSTR) {
                RuntimeError::InvalidInstruction
            }
            else if rs.contains(RunStatus::INVALID_CH) {
                RuntimeError::InvalidChannel
            }
            else if rs.contains(RunStatus::SINGLE_STEP) {
                RuntimeError::SingleStep
            }
            else {
                RuntimeError::Other(status)
            },
        ))
    }
}

/// What to do with the stop record at the head of a [`StopQueue`]
pub(crate) enum Take {
    /// Remove it; it has been delivered
    Deliver,
    /// Remove it; nobody is interested
    Discard,
    /// Leave it for the next wait
    Keep,
}

/// The number of stop records a context keeps for the event multiplexer
///
/// If nobody waits for them, older records are dropped in favor of newer ones.
pub const MAX_STOP_RECORDS: usize = 256;

/// The stop records of a context together with a pipe that is readable while records are queued
///
/// The pipe holds a single byte whenever the queue is not empty.
pub(crate) struct StopQueue {
    records: Mutex<VecDeque<StopInfo>>,
    rd: OwnedFd,
    wr: OwnedFd,
}

impl StopQueue {
    fn new() -> Result<Self, Error> {
        let (rd, wr) = os::pipe()?;
        Ok(Self {
            records: Mutex::new(VecDeque::new()),
            rd,
            wr,
        })
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<StopInfo>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, info: StopInfo) -> Result<(), Error> {
        let mut recs = self.records();
        let was_empty = recs.is_empty();
        if recs.len() >= MAX_STOP_RECORDS {
            if let Some(old) = recs.pop_front() {
                log!(LogFlags::SpeEvents, "stop queue full, dropping {:?}", old);
            }
        }
        recs.push_back(info);

        if was_empty {
            match os::write(self.wr.as_raw_fd(), &[1]) {
                // still readable from an earlier record
                Err(e) if e.code() == Code::WouldBlock => {},
                Err(e) => return Err(e),
                Ok(_) => {},
            }
        }
        Ok(())
    }

    /// The fd that is readable while records are queued
    pub fn raw_fd(&self) -> RawFd {
        self.rd.as_raw_fd()
    }

    /// Hands the queued records to `func` in order until it decides to keep one
    pub fn drain(&self, mut func: impl FnMut(&StopInfo) -> Take) {
        let mut recs = self.records();
        while let Some(rec) = recs.front() {
            if let Take::Keep = func(rec) {
                break;
            }
            recs.pop_front();
        }
        if recs.is_empty() {
            let mut byte = [0u8; 1];
            os::read(self.rd.as_raw_fd(), &mut byte).ok();
        }
    }
}

const DESTROYED: usize = 1 << (usize::BITS - 1);

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct CtxInner {
    id: u32,
    flags: CreateFlags,
    #[derivative(Debug = "ignore")]
    dir: Box<dyn SpuDir>,
    #[derivative(Debug = "ignore")]
    files: FdCache,
    #[derivative(Debug = "ignore")]
    ps: PsMap,
    group: Option<Group>,
    #[derivative(Debug = "ignore")]
    stops: Option<StopQueue>,
    users: AtomicUsize,
    prog_entry: AtomicU32,
    pub(crate) dma_fallback: AtomicBool,
    #[derivative(Debug = "ignore")]
    callbacks: Option<Arc<dyn CallbackRegistry>>,
}

/// Keeps a context from being destroyed while an operation is in flight
pub(crate) struct OpGuard {
    ctx: Arc<CtxInner>,
}

impl std::ops::Deref for OpGuard {
    type Target = Arc<CtxInner>;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.ctx.users.fetch_sub(1, Ordering::Release);
    }
}

impl CtxInner {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn flags(&self) -> CreateFlags {
        self.flags
    }

    pub fn path(&self) -> &str {
        self.dir.path()
    }

    pub fn stops(&self) -> Option<&StopQueue> {
        self.stops.as_ref()
    }

    /// Starts an operation; fails with [`Code::Destroyed`] if the context has been destroyed
    pub fn begin_op(self: &Arc<Self>) -> Result<OpGuard, Error> {
        let prev = self.users.fetch_add(1, Ordering::Acquire);
        if prev & DESTROYED != 0 {
            self.users.fetch_sub(1, Ordering::Release);
            return Err(Error::new(Code::Destroyed));
        }
        Ok(OpGuard { ctx: self.clone() })
    }

    /// Returns the open file of given kind
    pub fn file(&self, kind: FileKind) -> Result<Arc<dyn SpuFile>, Error> {
        self.files.acquire(&*self.dir, kind)
    }

    /// Closes the file of given kind
    pub fn release(&self, kind: FileKind) -> bool {
        self.files.release(kind)
    }

    pub fn ps_area(&self, kind: RegionKind) -> Result<PsArea<'_>, Error> {
        let (addr, size) = self.ps.map(kind, &*self.dir, &self.files, self.flags)?;
        Ok(PsArea::new(kind, addr, size))
    }

    fn mark_destroyed(&self) -> Result<(), Error> {
        match self
            .users
            .compare_exchange(0, DESTROYED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(v) if v & DESTROYED != 0 => Err(Error::new(Code::Destroyed)),
            Err(_) => Err(Error::new(Code::Busy)),
        }
    }

    fn teardown(&self) {
        log!(LogFlags::SpeCtx, "{}: destroying context {}", self.path(), self.id);
        self.ps.unmap_all();
        self.files.close_all();
        if let Some(g) = &self.group {
            g.detach(self.id);
        }
    }

    fn run_until_stop(&self, npc: &mut u32) -> Result<StopInfo, Error> {
        loop {
            log!(LogFlags::SpeRun, "{}: running at {:#x}", self.path(), *npc);
            let status = self.dir.run(npc)?;
            log!(
                LogFlags::SpeRun,
                "{}: stopped at {:#x} with status {:#x}",
                self.path(),
                *npc,
                status
            );

            match decode(status) {
                Decoded::Stop(info) => return Ok(info),
                Decoded::Callback(op) => {
                    if !self.callback(op, *npc)? {
                        return Ok(StopInfo::CallbackError(op));
                    }
                    // skip the argument word
                    *npc = (*npc + 4) & kif::LSLR;
                },
            }
        }
    }

    fn callback(&self, op: u32, npc: u32) -> Result<bool, Error> {
        let reg = match &self.callbacks {
            Some(reg) => reg,
            None => return Ok(false),
        };
        let ls = self.ps_area(RegionKind::LocalStore)?;
        let arg = ls.read_u32((npc & kif::LSLR) as usize)?;
        match reg.dispatch(&ls, op, arg) {
            Some(Ok(())) => Ok(true),
            Some(Err(e)) => {
                log!(LogFlags::Error, "{}: callback {:#x} failed: {}", self.path(), op, e);
                Ok(false)
            },
            None => {
                log!(LogFlags::SpeRun, "{}: no handler for callback {:#x}", self.path(), op);
                Ok(false)
            },
        }
    }
}

/// An SPE context
#[derive(Debug)]
pub struct Context {
    inner: Arc<CtxInner>,
}

impl Context {
    /// Creates a new context with given flags, using the default kernel
    pub fn new(flags: CreateFlags) -> Result<Self, Error> {
        Self::new_with(CreateArgs::new().flags(flags))
    }

    /// Creates a new context with given arguments
    ///
    /// Fails with [`Code::NotSup`] if the kernel does not support isolation or affinity, but it
    /// has been requested, with [`Code::NoSpace`] if no more SPUs are available or the group is
    /// full, and with [`Code::Destroyed`] if the group has already been destroyed.
    pub fn new_with(args: CreateArgs<'_>) -> Result<Self, Error> {
        let CreateArgs {
            flags,
            group,
            affinity,
            kernel,
            callbacks,
        } = args;

        let kernel = match (kernel, group) {
            (Some(k), _) => k,
            (None, Some(g)) => g.kernel(),
            (None, None) => arch::default_kernel()?,
        };
        let sflags = Self::spu_flags(flags, affinity.as_ref(), kernel.features())?;

        if let Some(g) = group {
            g.reserve()?;
        }

        let neighbor = affinity.and_then(|a| a.neighbor).map(|n| &*n.inner.dir);
        match Self::create(&*kernel, flags, sflags, group, neighbor, callbacks) {
            Ok(inner) => {
                if let Some(g) = group {
                    g.attach(inner.id, Arc::downgrade(&inner));
                }
                log!(
                    LogFlags::SpeCtx,
                    "{}: created context {} with {:?}",
                    inner.path(),
                    inner.id,
                    flags
                );
                Ok(Self { inner })
            },
            Err(e) => {
                if let Some(g) = group {
                    g.unreserve();
                }
                log!(LogFlags::SpeCtx, "unable to create context: {}", e);
                Err(e)
            },
        }
    }

    fn spu_flags(
        flags: CreateFlags,
        affinity: Option<&Affinity<'_>>,
        features: KernelFeatures,
    ) -> Result<SpuCreateFlags, Error> {
        let mut sflags = SpuCreateFlags::empty();
        if flags.contains(CreateFlags::EVENTS_ENABLE) {
            sflags |= SpuCreateFlags::EVENTS_ENABLED;
        }
        if flags.contains(CreateFlags::NOSCHED) {
            sflags |= SpuCreateFlags::NOSCHED;
        }
        if flags.contains(CreateFlags::ISOLATE) {
            if !features.contains(KernelFeatures::ISOLATION) {
                return Err(Error::new(Code::NotSup));
            }
            sflags |= SpuCreateFlags::ISOLATE;
        }

        if let Some(aff) = affinity {
            if aff.neighbor.is_some() {
                sflags |= SpuCreateFlags::AFFINITY_SPU;
            }
            if aff.memory {
                sflags |= SpuCreateFlags::AFFINITY_MEM;
            }
            if sflags.intersects(SpuCreateFlags::AFFINITY_SPU | SpuCreateFlags::AFFINITY_MEM)
                && !features.contains(KernelFeatures::AFFINITY)
            {
                return Err(Error::new(Code::NotSup));
            }
        }
        Ok(sflags)
    }

    fn create(
        kernel: &dyn Kernel,
        flags: CreateFlags,
        sflags: SpuCreateFlags,
        group: Option<&Group>,
        neighbor: Option<&dyn SpuDir>,
        callbacks: Option<Arc<dyn CallbackRegistry>>,
    ) -> Result<Arc<CtxInner>, Error> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("spe-{}", id);
        let create_in = |gang: Option<&dyn GangDir>| {
            kernel.create_context(&CreateRequest {
                name: &name,
                flags: sflags,
                mode: 0o755,
                gang,
                neighbor,
            })
        };
        let dir = match group {
            Some(g) => g.with_gang(create_in)?,
            None => create_in(None)?,
        };

        let files = FdCache::new();
        for (flag, kind) in [
            (CreateFlags::SIGNOTIFY1_OR, FileKind::Signal1Type),
            (CreateFlags::SIGNOTIFY2_OR, FileKind::Signal2Type),
        ] {
            if flags.contains(flag) {
                files.acquire(&*dir, kind)?.write(b"1")?;
                files.release(kind);
            }
        }

        let stops = match flags.contains(CreateFlags::EVENTS_ENABLE) {
            true => Some(StopQueue::new()?),
            false => None,
        };

        let inner = Arc::new(CtxInner {
            id,
            flags,
            dir,
            files,
            ps: PsMap::new(),
            group: group.cloned(),
            stops,
            users: AtomicUsize::new(0),
            prog_entry: AtomicU32::new(0),
            dma_fallback: AtomicBool::new(false),
            callbacks,
        });

        // the local store is accessed by nearly every operation; map it right away
        if !flags.contains(CreateFlags::ISOLATE) {
            inner.ps_area(RegionKind::LocalStore)?;
        }
        Ok(inner)
    }

    pub(crate) fn inner(&self) -> &Arc<CtxInner> {
        &self.inner
    }

    /// Returns the unique id of this context
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn flags(&self) -> CreateFlags {
        self.inner.flags
    }

    /// Returns the group this context belongs to
    pub fn group(&self) -> Option<&Group> {
        self.inner.group.as_ref()
    }

    /// Returns the path of the context directory
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    pub fn ls_size(&self) -> usize {
        kif::LS_SIZE
    }

    /// Returns the local store
    ///
    /// Fails with [`Code::NoPerm`] for isolated contexts. Note that the running program might
    /// modify the local store at any time.
    pub fn local_store(&self) -> Result<PsArea<'_>, Error> {
        self.ps_area(RegionKind::LocalStore)
    }

    /// Returns the given mapped region
    ///
    /// The problem-state areas require [`CreateFlags::MAP_PS`]; otherwise, [`Code::NoPerm`] is
    /// returned. A failed mapping is not retried.
    pub fn ps_area(&self, kind: RegionKind) -> Result<PsArea<'_>, Error> {
        self.inner.ps_area(kind)
    }

    /// Copies `img` into the local store and uses its entry point for [`DEFAULT_ENTRY`]
    pub fn program_load(&self, img: &dyn Image) -> Result<(), Error> {
        let ctx = self.inner.begin_op()?;
        let ls = ctx.ps_area(RegionKind::LocalStore)?;
        ls.write(img.load_addr() as usize, img.bytes())?;
        ctx.prog_entry.store(img.entry(), Ordering::Relaxed);
        log!(
            LogFlags::SpeCtx,
            "{}: loaded {} bytes at {:#x}, entry {:#x}",
            ctx.path(),
            img.bytes().len(),
            img.load_addr(),
            img.entry()
        );
        Ok(())
    }

    /// Runs the context until it stops
    ///
    /// The program starts at `*entry` or, for [`DEFAULT_ENTRY`], at the entry point of the loaded
    /// program. If `args` is given, the trampoline is staged to pass the registers to the program
    /// (see [`trampoline`]). Callback requests are handled without returning. Afterwards, `*entry`
    /// contains the program counter at which the SPU stopped, also if the run failed, so that it
    /// can be resumed after an interruption ([`Code::Interrupted`]).
    ///
    /// With [`CreateFlags::EVENTS_ENABLE`], the stop is reported to the event multiplexer as well.
    pub fn run(&self, entry: &mut u32, args: Option<&RegBlock>) -> Result<StopInfo, Error> {
        let ctx = self.inner.begin_op()?;

        let mut npc = match *entry {
            DEFAULT_ENTRY => ctx.prog_entry.load(Ordering::Relaxed),
            e => e,
        };
        if let Some(regs) = args {
            let mut regs = *regs;
            regs.set_entry(npc);
            let ls = ctx.ps_area(RegionKind::LocalStore)?;
            npc = trampoline::stage(&ls, &regs)?;
        }

        let res = ctx.run_until_stop(&mut npc);
        *entry = npc;
        let info = res?;

        log!(LogFlags::SpeRun, "{}: run ended: {:?}", ctx.path(), info);
        if let Some(stops) = ctx.stops() {
            if let Err(e) = stops.post(info) {
                log!(
                    LogFlags::Error,
                    "{}: unable to report {:?} to the event multiplexer: {}",
                    ctx.path(),
                    info,
                    e
                );
            }
        }
        Ok(info)
    }

    /// Destroys this context
    ///
    /// Fails with [`Code::Busy`] if an operation, for example a wait of the event multiplexer, is
    /// still in flight; the context is handed back in this case. On success, all regions are
    /// unmapped, all files are closed and the context has left its group.
    pub fn destroy(self) -> Result<(), (Context, Error)> {
        if let Err(e) = self.inner.mark_destroyed() {
            return Err((self, e));
        }
        self.inner.teardown();
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let prev = self.inner.users.fetch_or(DESTROYED, Ordering::AcqRel);
        if prev & DESTROYED == 0 {
            if prev != 0 {
                log!(
                    LogFlags::SpeCtx,
                    "{}: dropped with {} operations in flight",
                    self.inner.path(),
                    prev
                );
            }
            self.inner.teardown();
        }
    }
}
