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

//! The emulated memory flow controller: a bounded proxy command queue, serviced by a worker thread

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use base::errors::{Code, Error};
use base::io::LogFlags;
use base::math;

use crate::arch::sim::doorbell::Doorbell;
use crate::arch::sim::spu::Spu;
use crate::kif::{MfcCmd, LS_SIZE, MAX_DMA_SIZE};
use crate::mfcio::MfcCommand;

/// The number of commands the proxy queue can hold
pub const QUEUE_DEPTH: usize = 16;

const HW_TAGS: usize = 32;

#[derive(Default)]
struct State {
    queue: VecDeque<MfcCommand>,
    pending: [u32; HW_TAGS],
    completed: u32,
    busy: bool,
    stop: bool,
}

struct Shared {
    spu: Arc<Spu>,
    state: Mutex<State>,
    cond: Condvar,
    // readable while at least one tag group has completed
    bell: Doorbell,
}

pub struct Mfc {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Mfc {
    pub fn new(spu: Arc<Spu>) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            spu,
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            bell: Doorbell::new(false)?,
        });

        let wshared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("spu{}-mfc", shared.spu.id()))
            .spawn(move || wshared.run())?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn bell(&self) -> &Doorbell {
        &self.shared.bell
    }

    /// Enqueues the command in `buf`
    ///
    /// Fails with [`Code::QueueFull`] if the queue has no free slot.
    pub fn enqueue(&self, buf: &[u8]) -> Result<usize, Error> {
        let cmd = MfcCommand::from_bytes(buf).ok_or_else(|| Error::new(Code::InvArgs))?;
        let op = MfcCmd::try_from(cmd.cmd).map_err(|_| Error::new(Code::InvArgs))?;
        if cmd.size as usize > MAX_DMA_SIZE
            || !math::in_range(cmd.lsa as usize, cmd.size as usize, LS_SIZE)
        {
            return Err(Error::new(Code::InvArgs));
        }

        let mut state = self.shared.state();
        if state.queue.len() >= QUEUE_DEPTH {
            return Err(Error::new(Code::QueueFull));
        }

        let tag = cmd.tag as usize % HW_TAGS;
        log!(
            LogFlags::SimMfc,
            "spu{}: enqueue {:?} lsa={:#x} ea={:#x} size={:#x} tag={}",
            self.shared.spu.id(),
            op,
            cmd.lsa,
            cmd.ea,
            cmd.size,
            tag
        );
        state.pending[tag] += 1;
        state.completed &= !(1 << tag);
        state.queue.push_back(cmd);
        self.shared.bell.set(state.completed != 0);
        self.shared.cond.notify_all();
        Ok(buf.len())
    }

    /// Returns and clears the mask of completed tag groups
    ///
    /// Blocks until at least one tag group has completed, unless no command is in flight, in
    /// which case 0 is returned.
    pub fn read_status(&self) -> u32 {
        let mut state = self.shared.state();
        loop {
            if state.completed != 0 {
                let mask = std::mem::replace(&mut state.completed, 0);
                self.shared.bell.set(false);
                return mask;
            }
            if state.pending.iter().all(|p| *p == 0) {
                return 0;
            }
            state = self.shared.wait(state);
        }
    }

    /// Waits until all enqueued commands have been executed
    pub fn sync(&self) {
        let mut state = self.shared.state();
        while !state.queue.is_empty() || state.busy {
            state = self.shared.wait(state);
        }
    }
}

impl Drop for Mfc {
    fn drop(&mut self) {
        self.shared.state().stop = true;
        self.shared.cond.notify_all();
        if let Some(w) = self.worker.take() {
            w.join().ok();
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        let mut state = self.state();
        while !state.stop {
            let cmd = match state.queue.pop_front() {
                Some(cmd) => cmd,
                None => {
                    state = self.wait(state);
                    continue;
                },
            };

            state.busy = true;
            drop(state);
            self.execute(&cmd);
            state = self.state();
            state.busy = false;

            let tag = cmd.tag as usize % HW_TAGS;
            state.pending[tag] -= 1;
            if state.pending[tag] == 0 {
                state.completed |= 1 << tag;
            }
            self.bell.set(state.completed != 0);
            self.cond.notify_all();
        }
    }

    fn execute(&self, cmd: &MfcCommand) {
        let ls = self.spu.ls();
        let (lsa, size) = (cmd.lsa as usize, cmd.size as usize);
        // safety: the range within the local store has been checked on enqueue; the validity of
        // the effective address is guaranteed by the issuer until the tag group completes
        unsafe {
            match MfcCmd::try_from(cmd.cmd) {
                Ok(op) if op.is_get() => ls.copy_in(lsa, cmd.ea as usize as *const u8, size),
                Ok(_) => ls.copy_out(lsa, cmd.ea as usize as *mut u8, size),
                Err(_) => {},
            }
        }
    }
}
