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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base::errors::Code;
use base::test::WvTester;

use spe::arch::sim::SimConfig;
use spe::arch::Kernel;
use spe::context::MAX_STOP_RECORDS;
use spe::event::{self, MAX_REGISTRATIONS};
use spe::isa;
use spe::kif::Channel;
use spe::{
    Behavior, Context, CreateArgs, CreateFlags, EventHandler, EventMask, Group, GroupArgs,
    Registration, SchedClass, SchedPolicy, StopInfo, Target,
};

use crate::{load, new_ctx, sim};

pub fn run(t: &mut dyn WvTester) {
    wv_run_test!(t, registration_errors);
    wv_run_test!(t, poll_and_timeout);
    wv_run_test!(t, exit_event);
    wv_run_test!(t, uninteresting_stops);
    wv_run_test!(t, stop_then_exit);
    wv_run_test!(t, unwaited_stops);
    wv_run_test!(t, mailbox_events);
    wv_run_test!(t, merged_events);
    wv_run_test!(t, tag_group);
    wv_run_test!(t, group_exits);
    wv_run_test!(t, group_once_per_wait);
    wv_run_test!(t, destroy_during_wait);
    wv_run_test!(t, destroyed_context);
}

fn events_ctx(kernel: &Arc<spe::arch::sim::SimKernel>) -> Context {
    new_ctx(kernel, CreateFlags::EVENTS_ENABLE)
}

fn run_to_stop(ctx: &Context, entry: &mut u32) -> StopInfo {
    wv_assert_ok!(ctx.run(entry, None))
}

fn registration_errors(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let plain = new_ctx(&kernel, CreateFlags::empty());
    let ctx = events_ctx(&kernel);

    let mut handler = EventHandler::new();
    wv_assert_err!(
        t,
        handler.register(Registration::new(&plain, EventMask::EXIT)),
        Code::NotSup
    );
    wv_assert_err!(
        t,
        handler.register(Registration::new(&ctx, EventMask::empty())),
        Code::InvArgs
    );

    for _ in 0..MAX_REGISTRATIONS {
        wv_assert_ok!(handler.register(Registration::new(&ctx, EventMask::EXIT)));
    }
    wv_assert_eq!(t, handler.len(), MAX_REGISTRATIONS);
    wv_assert_err!(
        t,
        handler.register(Registration::new(&ctx, EventMask::EXIT)),
        Code::NoSpace
    );

    let target = Target::from(&ctx);
    wv_assert_err!(t, handler.deregister(&target, EventMask::IN_MBOX), Code::InvArgs);
    wv_assert_err!(
        t,
        handler.deregister(&Target::from(&plain), EventMask::EXIT),
        Code::InvArgs
    );
    wv_assert_ok!(handler.deregister(&target, EventMask::EXIT));
    wv_assert_eq!(t, handler.len(), MAX_REGISTRATIONS - 1);

    wv_assert_err!(t, handler.wait(0, 0), Code::InvArgs);

    let regs = vec![Registration::new(&ctx, EventMask::EXIT); MAX_REGISTRATIONS + 1];
    wv_assert_err!(t, event::wait(&regs, 0), Code::NoSpace);
    wv_assert_err!(
        t,
        event::wait(&[Registration::new(&plain, EventMask::EXIT)], 0),
        Code::NotSup
    );

    let empty = EventHandler::new();
    wv_assert!(t, empty.is_empty());
    wv_assert_eq!(t, empty.wait(4, -1), Ok(Vec::new()));
}

fn poll_and_timeout(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(
        &ctx,
        EventMask::EXIT | EventMask::OUT_INTR_MBOX
    )));

    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));

    let start = Instant::now();
    wv_assert_eq!(t, handler.wait(8, 50), Ok(Vec::new()));
    wv_assert!(t, start.elapsed() >= Duration::from_millis(50));
}

fn exit_event(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    load(&ctx, 0, &[isa::stop(0x2005)]);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(&ctx, EventMask::EXIT).data(42)));

    let mut entry = 0;
    wv_assert_eq!(t, run_to_stop(&ctx, &mut entry), StopInfo::Exit(5));

    let occs = wv_assert_ok!(handler.wait(8, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].ctx, ctx.id());
    wv_assert_eq!(t, occs[0].events, EventMask::EXIT);
    wv_assert_eq!(t, occs[0].payload, 5);
    wv_assert_eq!(t, occs[0].stop, Some(StopInfo::Exit(5)));
    wv_assert_eq!(t, occs[0].data, 42);

    // the record has been consumed
    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));
}

fn uninteresting_stops(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    load(&ctx, 0, &[isa::stop(0x1234), isa::stop(0x2000)]);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(&ctx, EventMask::EXIT)));

    let mut entry = 0;
    wv_assert_eq!(t, run_to_stop(&ctx, &mut entry), StopInfo::StopAndSignal(0x1234));
    // nobody is interested in the stop-and-signal
    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));

    wv_assert_eq!(t, run_to_stop(&ctx, &mut entry), StopInfo::Exit(0));
    let occs = wv_assert_ok!(handler.wait(8, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].stop, Some(StopInfo::Exit(0)));
}

fn stop_then_exit(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    load(&ctx, 0, &[isa::stop(0x1234), isa::stop(0x2009)]);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(
        &ctx,
        EventMask::STOP_SIGNAL | EventMask::EXIT
    )));

    let mut entry = 0;
    run_to_stop(&ctx, &mut entry);
    run_to_stop(&ctx, &mut entry);

    // one occurrence per registration and wait; the exit stays queued
    let occs = wv_assert_ok!(handler.wait(8, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::STOP_SIGNAL);
    wv_assert_eq!(t, occs[0].payload, 0x1234);

    let occs = wv_assert_ok!(handler.wait(8, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::EXIT);
    wv_assert_eq!(t, occs[0].payload, 9);

    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));
}

fn unwaited_stops(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    load(&ctx, 0, &[isa::stop(0x1234), isa::stop(0x2005)]);

    // more stops than a pipe can buffer, without anybody waiting
    let runs = 70_000;
    let stopped = (0..runs)
        .filter(|_| {
            let mut entry = 0;
            ctx.run(&mut entry, None) == Ok(StopInfo::StopAndSignal(0x1234))
        })
        .count();
    wv_assert_eq!(t, stopped, runs);
    let mut entry = 4;
    wv_assert_eq!(t, ctx.run(&mut entry, None), Ok(StopInfo::Exit(5)));

    // only the newest records are kept
    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(
        &ctx,
        EventMask::STOP_SIGNAL | EventMask::EXIT
    )));
    let mut last = None;
    let mut count = 0;
    while count <= MAX_STOP_RECORDS {
        let occs = wv_assert_ok!(handler.wait(8, 0));
        match occs.first() {
            Some(occ) => last = occ.stop,
            None => break,
        }
        count += occs.len();
    }
    wv_assert_eq!(t, count, MAX_STOP_RECORDS);
    wv_assert_eq!(t, last, Some(StopInfo::Exit(5)));
}

fn mailbox_events(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);

    // the inbound mailbox is empty, so there is space
    let regs = [Registration::new(&ctx, EventMask::IN_MBOX).data(1)];
    let occs = wv_assert_ok!(event::wait(&regs, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::IN_MBOX);
    wv_assert_eq!(t, occs[0].payload, 1);
    wv_assert_eq!(t, occs[0].data, 1);

    wv_assert_ok!(ctx.in_mbox_write(&[1], Behavior::AnyNonBlocking));
    wv_assert_eq!(t, event::wait(&regs, 0), Ok(Vec::new()));

    let regs = [Registration::new(&ctx, EventMask::OUT_INTR_MBOX).data(2)];
    wv_assert_eq!(t, event::wait(&regs, 0), Ok(Vec::new()));

    load(&ctx, 0, &[
        isa::rdch(3, Channel::RD_IN_MBOX.val),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 3),
        isa::stop(0x2000),
    ]);
    let mut entry = 0;
    run_to_stop(&ctx, &mut entry);

    let occs = wv_assert_ok!(event::wait(&regs, 1000));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::OUT_INTR_MBOX);
    wv_assert_eq!(t, occs[0].payload, 1);
    wv_assert_eq!(t, occs[0].data, 2);

    // reporting does not consume the word
    let mut buf = [0u32; 1];
    wv_assert_eq!(t, ctx.out_intr_mbox_read(&mut buf, Behavior::AnyNonBlocking), Ok(1));
    wv_assert_eq!(t, buf[0], 1);
    wv_assert_eq!(t, event::wait(&regs, 0), Ok(Vec::new()));
}

fn merged_events(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    load(&ctx, 0, &[
        isa::il(3, 0x55),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 3),
        isa::stop(0x2003),
    ]);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(
        &ctx,
        EventMask::EXIT | EventMask::OUT_INTR_MBOX
    )));

    let mut entry = 0;
    run_to_stop(&ctx, &mut entry);

    // both events are reported in one occurrence with the exit code as payload
    let occs = wv_assert_ok!(handler.wait(8, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::EXIT | EventMask::OUT_INTR_MBOX);
    wv_assert_eq!(t, occs[0].payload, 3);

    // the mailbox word is still there, the exit is gone
    let occs = wv_assert_ok!(handler.wait(8, 0));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::OUT_INTR_MBOX);
    wv_assert_eq!(t, occs[0].stop, None);
}

fn tag_group(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);

    let regs = [Registration::new(&ctx, EventMask::TAG_GROUP)];
    wv_assert_eq!(t, event::wait(&regs, 0), Ok(Vec::new()));

    let src = [0x5Au8; 128];
    unsafe {
        wv_assert_ok!(ctx.get(0x400, src.as_ptr() as u64, src.len(), 2, 0, 0));
    }
    let occs = wv_assert_ok!(event::wait(&regs, 1000));
    wv_assert_eq!(t, occs.len(), 1);
    wv_assert_eq!(t, occs[0].events, EventMask::TAG_GROUP);
    wv_assert_eq!(t, occs[0].payload, 1 << 2);
    // the completion has been consumed by the wait
    wv_assert_eq!(t, event::wait(&regs, 0), Ok(Vec::new()));

    // without MFC queue, there are no tag-group events
    let kernel = sim(SimConfig::default().dma_queue(false));
    let ctx = events_ctx(&kernel);
    unsafe {
        wv_assert_ok!(ctx.get(0x400, src.as_ptr() as u64, src.len(), 2, 0, 0));
    }
    let regs = [Registration::new(&ctx, EventMask::TAG_GROUP)];
    wv_assert_eq!(t, event::wait(&regs, 0), Ok(Vec::new()));
}

fn group_exits(t: &mut dyn WvTester) {
    let kernel: Arc<dyn Kernel> = sim(SimConfig::default());
    let group = wv_assert_ok!(Group::new(
        GroupArgs::new(SchedClass::Other, SchedPolicy::Gang)
            .min_members(2)
            .kernel(kernel)
    ));
    let join = |flags| {
        wv_assert_ok!(Context::new_with(
            CreateArgs::new().flags(flags).group(&group)
        ))
    };
    let a = join(CreateFlags::EVENTS_ENABLE);
    let b = join(CreateFlags::EVENTS_ENABLE);
    // members without events are not observed
    let quiet = join(CreateFlags::empty());

    load(&a, 0, &[isa::stop(0x2001)]);
    load(&b, 0, &[isa::stop(0x2002)]);
    load(&quiet, 0, &[isa::stop(0x2003)]);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(&group, EventMask::EXIT).data(7)));

    let res = thread::scope(|s| {
        let threads = [&a, &b, &quiet].map(|ctx| {
            s.spawn(move || {
                let mut entry = 0;
                ctx.run(&mut entry, None)
            })
        });
        threads.map(|th| th.join().map_err(|_| ()))
    });
    for r in res {
        wv_assert!(t, matches!(r, Ok(Ok(StopInfo::Exit(_)))));
    }

    // one occurrence per wait, until both exits have been reported
    let mut seen = BTreeSet::new();
    for _ in 0..2 {
        let occs = wv_assert_ok!(handler.wait(1, 0));
        wv_assert_eq!(t, occs.len(), 1);
        wv_assert_eq!(t, occs[0].data, 7);
        wv_assert_eq!(t, occs[0].stop, Some(StopInfo::Exit(occs[0].payload)));
        seen.insert((occs[0].ctx, occs[0].payload));
    }
    wv_assert_eq!(t, seen, BTreeSet::from([(a.id(), 1), (b.id(), 2)]));
    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));
}

fn group_once_per_wait(t: &mut dyn WvTester) {
    let kernel: Arc<dyn Kernel> = sim(SimConfig::default());
    let group = wv_assert_ok!(Group::new(
        GroupArgs::new(SchedClass::Other, SchedPolicy::Default).kernel(kernel)
    ));
    let join = || {
        wv_assert_ok!(Context::new_with(
            CreateArgs::new()
                .flags(CreateFlags::EVENTS_ENABLE)
                .group(&group)
        ))
    };
    let a = join();
    let b = join();
    load(&a, 0, &[isa::stop(0x2001)]);
    load(&b, 0, &[isa::stop(0x2002)]);

    let mut entry = 0;
    wv_assert_eq!(t, run_to_stop(&a, &mut entry), StopInfo::Exit(1));
    entry = 0;
    wv_assert_eq!(t, run_to_stop(&b, &mut entry), StopInfo::Exit(2));

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(&group, EventMask::EXIT).data(7)));

    // both members exited, but the registration is reported once per wait
    let mut seen = BTreeSet::new();
    for _ in 0..2 {
        let occs = wv_assert_ok!(handler.wait(8, 0));
        wv_assert_eq!(t, occs.len(), 1);
        wv_assert_eq!(t, occs[0].data, 7);
        seen.insert((occs[0].ctx, occs[0].payload));
    }
    wv_assert_eq!(t, seen, BTreeSet::from([(a.id(), 1), (b.id(), 2)]));
    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));

    // separate registrations for the members are reported in the same wait
    entry = 0;
    wv_assert_eq!(t, run_to_stop(&a, &mut entry), StopInfo::Exit(1));
    entry = 0;
    wv_assert_eq!(t, run_to_stop(&b, &mut entry), StopInfo::Exit(2));
    let regs = [
        Registration::new(&a, EventMask::EXIT),
        Registration::new(&b, EventMask::EXIT),
    ];
    let occs = wv_assert_ok!(event::wait(&regs, 0));
    let ctxs: BTreeSet<u32> = occs.iter().map(|o| o.ctx).collect();
    wv_assert_eq!(t, ctxs, BTreeSet::from([a.id(), b.id()]));
}

fn destroy_during_wait(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    load(&ctx, 0, &[
        isa::il(3, 0x66),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 3),
        isa::stop(0x2000),
    ]);

    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(&ctx, EventMask::OUT_INTR_MBOX)));

    let ctx = thread::scope(|s| {
        let waiter = s.spawn(|| handler.wait(8, -1));

        // give the waiter time to enter the wait
        thread::sleep(Duration::from_millis(200));
        let ctx = match ctx.destroy() {
            Err((c, e)) => {
                wv_assert_eq!(t, e.code(), Code::Busy);
                c
            },
            Ok(()) => panic!("context destroyed during a wait"),
        };

        // wake up the waiter
        let mut entry = 0;
        wv_assert_eq!(t, ctx.run(&mut entry, None), Ok(StopInfo::Exit(0)));
        let occs = wv_assert_ok!(wv_assert_ok!(waiter.join().map_err(|_| ())));
        wv_assert_eq!(t, occs.len(), 1);
        wv_assert_eq!(t, occs[0].events, EventMask::OUT_INTR_MBOX);
        ctx
    });

    wv_assert!(t, ctx.destroy().is_ok());
}

fn destroyed_context(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = events_ctx(&kernel);
    let other = events_ctx(&kernel);
    load(&ctx, 0, &[isa::stop(0x2000)]);

    let target = Target::from(&ctx);
    let mut handler = EventHandler::new();
    wv_assert_ok!(handler.register(Registration::new(target.clone(), EventMask::EXIT)));
    wv_assert_ok!(handler.register(Registration::new(&other, EventMask::EXIT)));

    let mut entry = 0;
    run_to_stop(&ctx, &mut entry);
    wv_assert!(t, ctx.destroy().is_ok());

    // the queued exit is gone with the context
    wv_assert_eq!(t, handler.wait(8, 0), Ok(Vec::new()));
    wv_assert_err!(
        t,
        handler.register(Registration::new(target, EventMask::EXIT)),
        Code::Destroyed
    );
}
