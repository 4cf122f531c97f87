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

//! The event multiplexer
//!
//! An [`EventHandler`] waits for events of several contexts at once. Each registration names a
//! context or a group together with the events of interest. A wait reports at most one
//! [`Occurrence`] per registration, containing the context and the subset of the registered
//! events that fired. For a group, the other members' events are left for the next wait.
//!
//! Stop and exit events are produced by [`Context::run`] and queued per context. A stop record
//! that none of the registrations of a wait is interested in is discarded; a record that is of
//! interest, but cannot be reported by the current wait, remains queued for the next one.
//!
//! The readiness of all sources is observed with one epoll instance, so that a wait with a timeout
//! does not spin.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::arch::os::Epoll;
use crate::arch::{self, FileKind, SpuFile};
use crate::context::{Context, CreateFlags, CtxInner, OpGuard, StopInfo, Take};
use crate::group::{Group, GroupState};

/// The maximum number of registrations of an [`EventHandler`]
pub const MAX_REGISTRATIONS: usize = 64;

bitflags! {
    /// The events a registration is interested in
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct EventMask : u32 {
        /// A word arrived in the outbound interrupt mailbox
        const OUT_INTR_MBOX = 0x01;
        /// The inbound mailbox has space
        const IN_MBOX       = 0x02;
        /// A DMA tag group has completed
        const TAG_GROUP     = 0x04;
        /// The program stopped with a stop-and-signal or an error
        const STOP_SIGNAL   = 0x08;
        /// The program exited
        const EXIT          = 0x10;
    }
}

const STOP_EVENTS: EventMask = EventMask::STOP_SIGNAL.union(EventMask::EXIT);

/// The target of a registration: a single context or all members of a group
#[derive(Clone)]
pub struct Target(Kind);

#[derive(Clone)]
enum Kind {
    Context(Weak<CtxInner>),
    Group(Group),
}

impl Target {
    fn same(&self, other: &Target) -> bool {
        match (&self.0, &other.0) {
            (Kind::Context(a), Kind::Context(b)) => Weak::ptr_eq(a, b),
            (Kind::Group(a), Kind::Group(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn contexts(&self) -> Vec<Arc<CtxInner>> {
        match &self.0 {
            Kind::Context(ctx) => ctx.upgrade().into_iter().collect(),
            Kind::Group(g) => g
                .live_members()
                .into_iter()
                .filter(|c| c.flags().contains(CreateFlags::EVENTS_ENABLE))
                .collect(),
        }
    }
}

impl From<&Context> for Target {
    fn from(ctx: &Context) -> Self {
        Self(Kind::Context(Arc::downgrade(ctx.inner())))
    }
}

impl From<&Group> for Target {
    fn from(group: &Group) -> Self {
        Self(Kind::Group(group.clone()))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Kind::Context(ctx) => match ctx.upgrade() {
                Some(c) => write!(f, "Context({})", c.id()),
                None => write!(f, "Context(<destroyed>)"),
            },
            Kind::Group(g) => write!(f, "Group({})", g.id()),
        }
    }
}

/// A registration for events
#[derive(Clone, Debug)]
pub struct Registration {
    target: Target,
    events: EventMask,
    data: u64,
}

impl Registration {
    /// Creates a registration for `events` of `target`
    pub fn new(target: impl Into<Target>, events: EventMask) -> Self {
        Self {
            target: target.into(),
            events,
            data: 0,
        }
    }

    /// Attaches a user value that is reported with every occurrence of this registration
    pub fn data(mut self, data: u64) -> Self {
        self.data = data;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn events(&self) -> EventMask {
        self.events
    }

    fn validate(&self) -> Result<(), Error> {
        if self.events.is_empty() {
            return Err(Error::new(Code::InvArgs));
        }
        match &self.target.0 {
            Kind::Context(ctx) => {
                let ctx = ctx.upgrade().ok_or_else(|| Error::new(Code::Destroyed))?;
                if !ctx.flags().contains(CreateFlags::EVENTS_ENABLE) {
                    return Err(Error::new(Code::NotSup));
                }
            },
            Kind::Group(g) => {
                if g.state_of() == GroupState::Destroyed {
                    return Err(Error::new(Code::Destroyed));
                }
            },
        }
        Ok(())
    }
}

/// An event reported by a wait
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Occurrence {
    /// The id of the context the events occurred at
    pub ctx: u32,
    /// The events that fired
    pub events: EventMask,
    /// The exit or stop code, the completed tag groups or the number of mailbox words
    pub payload: u32,
    /// The stop record for [`EventMask::STOP_SIGNAL`] and [`EventMask::EXIT`]
    pub stop: Option<StopInfo>,
    /// The user value of the registration
    pub data: u64,
}

/// A table of registrations to wait for
#[derive(Debug, Default)]
pub struct EventHandler {
    regs: Vec<Registration>,
}

impl EventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration
    ///
    /// Fails with [`Code::NotSup`] for contexts without [`CreateFlags::EVENTS_ENABLE`] and with
    /// [`Code::NoSpace`] if the table is full.
    pub fn register(&mut self, reg: Registration) -> Result<(), Error> {
        reg.validate()?;
        if self.regs.len() >= MAX_REGISTRATIONS {
            return Err(Error::new(Code::NoSpace));
        }
        log!(LogFlags::SpeEvents, "register {:?} for {:?}", reg.events, reg.target);
        self.regs.push(reg);
        Ok(())
    }

    /// Removes the registration for exactly `events` of `target`
    pub fn deregister(&mut self, target: &Target, events: EventMask) -> Result<(), Error> {
        let idx = self
            .regs
            .iter()
            .position(|r| r.target.same(target) && r.events == events)
            .ok_or_else(|| Error::new(Code::InvArgs))?;
        log!(LogFlags::SpeEvents, "deregister {:?} for {:?}", events, target);
        self.regs.remove(idx);
        Ok(())
    }

    /// Returns the number of registrations
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Waits up to `timeout_ms` milliseconds for events and returns at most `max` occurrences
    ///
    /// A timeout of 0 only polls; a negative timeout waits until an event occurs. An expired
    /// timeout yields an empty result. A signal delivered during the wait results in
    /// [`Code::Interrupted`]; the wait can simply be repeated.
    pub fn wait(&self, max: usize, timeout_ms: i32) -> Result<Vec<Occurrence>, Error> {
        if max == 0 {
            return Err(Error::new(Code::InvArgs));
        }
        Waiter::new(&self.regs, max)?.wait(timeout_ms)
    }
}

/// Waits up to `timeout_ms` milliseconds for the given registrations
///
/// See [`EventHandler::wait`].
pub fn wait(regs: &[Registration], timeout_ms: i32) -> Result<Vec<Occurrence>, Error> {
    if regs.len() > MAX_REGISTRATIONS {
        return Err(Error::new(Code::NoSpace));
    }
    for r in regs {
        r.validate()?;
    }
    Waiter::new(regs, usize::MAX)?.wait(timeout_ms)
}

// one registration applied to one context
struct Slot {
    reg: usize,
    ctx: OpGuard,
}

// one fd in the epoll set
struct Source {
    fd: RawFd,
    events: u32,
    users: Vec<(usize, EventMask)>,
    _file: Option<Arc<dyn SpuFile>>,
}

struct Waiter<'r> {
    regs: &'r [Registration],
    max: usize,
    slots: Vec<Slot>,
    sources: Vec<Source>,
    epoll: Epoll,
}

struct Collector<'w> {
    regs: &'w [Registration],
    slots: &'w [Slot],
    max: usize,
    occs: Vec<Occurrence>,
    // index into `occs` per registration
    fired: Vec<Option<usize>>,
}

impl<'w> Collector<'w> {
    fn full(&self) -> bool {
        self.occs.len() >= self.max
    }

    /// Reports `ev` for the given slot, merging it into the occurrence of its registration
    fn fire(&mut self, slot: usize, ev: EventMask, payload: u32, stop: Option<StopInfo>) {
        let slots = self.slots;
        let Slot { reg, ctx } = &slots[slot];
        match self.fired[*reg] {
            Some(idx) => {
                if self.occs[idx].ctx == ctx.id() {
                    self.occs[idx].events |= ev;
                }
            },
            None => {
                self.fired[*reg] = Some(self.occs.len());
                self.occs.push(Occurrence {
                    ctx: ctx.id(),
                    events: ev,
                    payload,
                    stop,
                    data: self.regs[*reg].data,
                });
            },
        }
    }

    /// Returns true if the slot can report an event carrying its own payload
    fn can_fire_fresh(&self, slot: usize) -> bool {
        self.fired[self.slots[slot].reg].is_none() && !self.full()
    }

    /// Returns true if the slot can report an event, possibly merged into an existing occurrence
    ///
    /// Every registration is reported at most once per wait. Events of other contexts of an
    /// already reported registration stay pending for the next wait.
    fn can_fire(&self, slot: usize) -> bool {
        let Slot { reg, ctx } = &self.slots[slot];
        match self.fired[*reg] {
            Some(idx) => self.occs[idx].ctx == ctx.id(),
            None => !self.full(),
        }
    }

    fn wants(&self, slot: usize, ev: EventMask) -> bool {
        self.regs[self.slots[slot].reg].events.contains(ev)
    }

    fn drain_stops(&mut self, ctx: &Arc<CtxInner>) {
        let stops = match ctx.stops() {
            Some(s) => s,
            None => return,
        };

        let candidates: Vec<usize> = (0..self.slots.len())
            .filter(|&s| Arc::ptr_eq(&*self.slots[s].ctx, ctx))
            .collect();
        stops.drain(|rec| {
            let ev = match rec.is_exit() {
                true => EventMask::EXIT,
                false => EventMask::STOP_SIGNAL,
            };
            let interested: Vec<usize> =
                candidates.iter().copied().filter(|&s| self.wants(s, ev)).collect();
            if interested.is_empty() {
                log!(LogFlags::SpeEvents, "{}: discarding {:?}", ctx.path(), rec);
                return Take::Discard;
            }
            match interested.into_iter().find(|&s| self.can_fire_fresh(s)) {
                Some(s) => {
                    self.fire(s, ev, rec.payload(), Some(*rec));
                    Take::Deliver
                },
                None => Take::Keep,
            }
        });
    }
}

impl<'r> Waiter<'r> {
    fn new(regs: &'r [Registration], max: usize) -> Result<Self, Error> {
        let mut slots = Vec::new();
        for (idx, reg) in regs.iter().enumerate() {
            for ctx in reg.target.contexts() {
                // contexts that are being destroyed do not produce events anymore
                if let Ok(guard) = ctx.begin_op() {
                    slots.push(Slot {
                        reg: idx,
                        ctx: guard,
                    });
                }
            }
        }

        let mut waiter = Self {
            regs,
            max,
            slots,
            sources: Vec::new(),
            epoll: Epoll::new()?,
        };
        waiter.collect_sources()?;
        Ok(waiter)
    }

    fn add_source(
        &mut self,
        slot: usize,
        ev: EventMask,
        (fd, events): (RawFd, u32),
        file: Option<Arc<dyn SpuFile>>,
    ) {
        match self.sources.iter_mut().find(|s| s.fd == fd) {
            Some(src) => {
                src.events |= events;
                src.users.push((slot, ev));
            },
            None => self.sources.push(Source {
                fd,
                events,
                users: vec![(slot, ev)],
                _file: file,
            }),
        }
    }

    fn collect_sources(&mut self) -> Result<(), Error> {
        for slot in 0..self.slots.len() {
            let ctx = self.slots[slot].ctx.clone();
            let mask = self.regs[self.slots[slot].reg].events;
            for ev in mask.iter() {
                if STOP_EVENTS.contains(ev) {
                    if let Some(stops) = ctx.stops() {
                        let src = (stops.raw_fd(), libc::EPOLLIN as u32);
                        self.add_source(slot, ev, src, None);
                    }
                    continue;
                }

                let kind = if ev == EventMask::IN_MBOX {
                    FileKind::WboxNb
                }
                else if ev == EventMask::OUT_INTR_MBOX {
                    FileKind::IboxNb
                }
                else if ctx.has_dma_queue()? {
                    FileKind::Mfc
                }
                else {
                    log!(
                        LogFlags::SpeEvents,
                        "{}: no tag-group events without MFC queue",
                        ctx.path()
                    );
                    continue;
                };
                let file = ctx.file(kind)?;
                if let Some(src) = file.poll_fd() {
                    self.add_source(slot, ev, src, Some(file));
                }
            }
        }

        for (idx, src) in self.sources.iter().enumerate() {
            self.epoll.add(src.fd, src.events, idx as u64)?;
        }
        Ok(())
    }

    fn wait(self, timeout_ms: i32) -> Result<Vec<Occurrence>, Error> {
        if self.slots.is_empty() {
            log!(LogFlags::SpeEvents, "wait: no contexts to wait for");
            return Ok(Vec::new());
        }

        let deadline = match timeout_ms {
            t if t > 0 => Some(Instant::now() + Duration::from_millis(t as u64)),
            _ => None,
        };

        loop {
            let tmo = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    left.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32
                },
                None => timeout_ms,
            };

            let ready = self.epoll.wait(self.sources.len(), tmo)?;
            let occs = self.collect(&ready)?;
            if !occs.is_empty() || timeout_ms == 0 {
                log!(LogFlags::SpeEvents, "wait: {} occurrences", occs.len());
                return Ok(occs);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    log!(LogFlags::SpeEvents, "wait: timeout");
                    return Ok(occs);
                }
            }
        }
    }

    fn collect(&self, ready: &[u64]) -> Result<Vec<Occurrence>, Error> {
        let mut col = Collector {
            regs: self.regs,
            slots: &self.slots,
            max: self.max,
            occs: Vec::new(),
            fired: vec![None; self.regs.len()],
        };

        let users = |pass_data: bool| {
            ready
                .iter()
                .filter_map(|&idx| self.sources.get(idx as usize))
                .flat_map(|src| src.users.iter().copied())
                .filter(move |&(_, ev)| {
                    STOP_EVENTS.union(EventMask::TAG_GROUP).contains(ev) == pass_data
                })
                .collect::<Vec<_>>()
        };

        // events that consume their payload first, so that they do not get merged
        let mut drained: Vec<*const CtxInner> = Vec::new();
        for (slot, ev) in users(true) {
            let ctx: &Arc<CtxInner> = &self.slots[slot].ctx;
            if STOP_EVENTS.contains(ev) {
                if !drained.contains(&Arc::as_ptr(ctx)) {
                    drained.push(Arc::as_ptr(ctx));
                    col.drain_stops(ctx);
                }
            }
            else if col.can_fire_fresh(slot) {
                let tags = ctx.poll_tag_status()?;
                if tags != 0 {
                    col.fire(slot, EventMask::TAG_GROUP, tags, None);
                }
            }
        }

        for (slot, ev) in users(false) {
            if !col.can_fire(slot) {
                continue;
            }
            let ctx = &self.slots[slot].ctx;
            let kind = match ev == EventMask::IN_MBOX {
                true => FileKind::WboxStat,
                false => FileKind::IboxStat,
            };
            let count = arch::read_word(&*ctx.file(kind)?)?;
            if count > 0 {
                col.fire(slot, ev, count, None);
            }
        }

        Ok(col.occs)
    }
}
