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

//! Scheduling groups of contexts
//!
//! A [`Group`] collects contexts that share a scheduling class and policy. With
//! [`SchedPolicy::Gang`], the group is backed by a kernel gang and its members are scheduled
//! together. A group can be destroyed while it still has members; in this case, the destruction
//! is deferred until the last member has been destroyed.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base::errors::{Code, Error};
use base::io::LogFlags;

use crate::arch::{self, GangDir, GangRequest, Kernel, KernelFeatures};
use crate::context::CtxInner;

/// The scheduling class of a group
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedClass {
    /// Time-shared scheduling
    Other,
    /// Real-time round-robin scheduling
    RoundRobin,
    /// Real-time first-in-first-out scheduling
    Fifo,
}

/// The scheduling policy of a group
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedPolicy {
    /// The members are scheduled independently
    Default,
    /// The members are scheduled together as a kernel gang
    Gang,
    /// The group owns a fixed number of units and admits at most that many members
    Fixed(usize),
}

/// The lifecycle state of a group
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GroupState {
    Alive,
    /// Destroyed by the owner, but members remain
    PendingDestroy,
    Destroyed,
}

/// The arguments for [`Group::new`]
pub struct GroupArgs {
    class: SchedClass,
    priority: u32,
    policy: SchedPolicy,
    min_members: usize,
    kernel: Option<Arc<dyn Kernel>>,
}

impl GroupArgs {
    /// Creates the arguments for a group with given class and policy
    pub fn new(class: SchedClass, policy: SchedPolicy) -> Self {
        Self {
            class,
            priority: 0,
            policy,
            min_members: 0,
            kernel: None,
        }
    }

    /// Sets the priority within the scheduling class
    pub fn priority(mut self, prio: u32) -> Self {
        self.priority = prio;
        self
    }

    /// Sets the number of members the group needs before it is scheduled
    pub fn min_members(mut self, num: usize) -> Self {
        self.min_members = num;
        self
    }

    /// Uses the given kernel backend instead of [`arch::default_kernel`]
    pub fn kernel(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

struct Member {
    id: u32,
    ctx: Weak<CtxInner>,
}

struct State {
    status: GroupState,
    members: Vec<Member>,
    reserved: usize,
    gang: Option<Box<dyn GangDir>>,
}

struct GroupInner {
    id: u32,
    class: SchedClass,
    priority: u32,
    policy: SchedPolicy,
    min_members: usize,
    kernel: Arc<dyn Kernel>,
    state: Mutex<State>,
}

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// A scheduling group
///
/// `Group` is a cheap handle; clones refer to the same group. Contexts hold a clone for their
/// membership bookkeeping, whereas the group refers to its members only weakly.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Group {
    /// Creates a new group
    ///
    /// No contexts are created as a side effect. Fails with [`Code::NotSup`] if a gang is
    /// requested but the kernel does not support gangs and with [`Code::InvArgs`] for a fixed
    /// policy without units or with less units than `min_members`.
    pub fn new(args: GroupArgs) -> Result<Self, Error> {
        let kernel = match args.kernel {
            Some(k) => k,
            None => arch::default_kernel()?,
        };

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let gang = match args.policy {
            SchedPolicy::Gang => {
                if !kernel.features().contains(KernelFeatures::GANGS) {
                    return Err(Error::new(Code::NotSup));
                }
                let name = format!("gang-{}", id);
                Some(kernel.create_gang(&GangRequest {
                    name: &name,
                    mode: 0o700,
                })?)
            },
            SchedPolicy::Fixed(n) if n == 0 || n < args.min_members => {
                return Err(Error::new(Code::InvArgs));
            },
            _ => None,
        };

        log!(
            LogFlags::SpeGroup,
            "group {}: created (class={:?}, prio={}, policy={:?}, min={})",
            id,
            args.class,
            args.priority,
            args.policy,
            args.min_members
        );

        Ok(Self {
            inner: Arc::new(GroupInner {
                id,
                class: args.class,
                priority: args.priority,
                policy: args.policy,
                min_members: args.min_members,
                kernel,
                state: Mutex::new(State {
                    status: GroupState::Alive,
                    members: Vec::new(),
                    reserved: 0,
                    gang,
                }),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the unique id of the group
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn class(&self) -> SchedClass {
        self.inner.class
    }

    pub fn priority(&self) -> u32 {
        self.inner.priority
    }

    pub fn policy(&self) -> SchedPolicy {
        self.inner.policy
    }

    pub fn min_members(&self) -> usize {
        self.inner.min_members
    }

    /// Returns the current lifecycle state
    pub fn state_of(&self) -> GroupState {
        self.state().status
    }

    /// Returns the number of current members
    pub fn members(&self) -> usize {
        self.state().members.len()
    }

    /// Returns true if both handles refer to the same group
    pub fn ptr_eq(&self, other: &Group) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Destroys the group
    ///
    /// If the group has no members, it is freed immediately. Otherwise, it is marked for
    /// destruction and freed as soon as the last member is destroyed. In both cases, the group
    /// does not accept new members anymore. Destroying a group again fails with
    /// [`Code::Destroyed`].
    pub fn destroy(&self) -> Result<(), Error> {
        let mut state = self.state();
        if state.status != GroupState::Alive {
            return Err(Error::new(Code::Destroyed));
        }

        if state.members.is_empty() && state.reserved == 0 {
            self.free(&mut state);
        }
        else {
            log!(
                LogFlags::SpeGroup,
                "group {}: destruction deferred ({} members)",
                self.id(),
                state.members.len() + state.reserved
            );
            state.status = GroupState::PendingDestroy;
        }
        Ok(())
    }

    fn free(&self, state: &mut State) {
        log!(LogFlags::SpeGroup, "group {}: destroyed", self.id());
        state.status = GroupState::Destroyed;
        state.gang = None;
    }

    pub(crate) fn kernel(&self) -> Arc<dyn Kernel> {
        self.inner.kernel.clone()
    }

    /// Reserves a member slot for a context that is about to be created
    pub(crate) fn reserve(&self) -> Result<(), Error> {
        let mut state = self.state();
        if state.status != GroupState::Alive {
            return Err(Error::new(Code::Destroyed));
        }
        if let SchedPolicy::Fixed(n) = self.inner.policy {
            if state.members.len() + state.reserved >= n {
                return Err(Error::new(Code::NoSpace));
            }
        }
        state.reserved += 1;
        Ok(())
    }

    /// Gives back a slot obtained by [`Group::reserve`] after a failed creation
    pub(crate) fn unreserve(&self) {
        let mut state = self.state();
        state.reserved -= 1;
        self.maybe_free(&mut state);
    }

    /// Turns a reserved slot into a membership of `ctx`
    pub(crate) fn attach(&self, id: u32, ctx: Weak<CtxInner>) {
        let mut state = self.state();
        state.reserved -= 1;
        state.members.push(Member { id, ctx });
        log!(
            LogFlags::SpeGroup,
            "group {}: context {} joined ({} members)",
            self.id(),
            id,
            state.members.len()
        );
    }

    /// Removes the context with given id and frees the group if it was the last pending member
    pub(crate) fn detach(&self, id: u32) {
        let mut state = self.state();
        state.members.retain(|m| m.id != id);
        log!(
            LogFlags::SpeGroup,
            "group {}: context {} left ({} members)",
            self.id(),
            id,
            state.members.len()
        );
        self.maybe_free(&mut state);
    }

    fn maybe_free(&self, state: &mut State) {
        if state.status == GroupState::PendingDestroy
            && state.members.is_empty()
            && state.reserved == 0
        {
            self.free(state);
        }
    }

    /// Runs `func` with the gang directory of this group, if any
    pub(crate) fn with_gang<R>(&self, func: impl FnOnce(Option<&dyn GangDir>) -> R) -> R {
        let state = self.state();
        func(state.gang.as_deref())
    }

    /// Returns the members that are still alive
    pub(crate) fn live_members(&self) -> Vec<Arc<CtxInner>> {
        self.state()
            .members
            .iter()
            .filter_map(|m| m.ctx.upgrade())
            .collect()
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Group[id={}, policy={:?}, state={:?}]",
            self.id(),
            self.policy(),
            self.state_of()
        )
    }
}
