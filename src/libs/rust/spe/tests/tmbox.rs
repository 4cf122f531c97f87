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

use std::thread;
use std::time::{Duration, Instant};

use base::errors::Code;
use base::test::WvTester;

use spe::arch::sim::SimConfig;
use spe::isa;
use spe::kif::Channel;
use spe::{Behavior, CreateFlags, StopInfo};

use crate::{load, new_ctx, sim};

pub fn run(t: &mut dyn WvTester) {
    wv_run_test!(t, inbound);
    wv_run_test!(t, outbound);
    wv_run_test!(t, interrupt_empty);
    wv_run_test!(t, interrupt_timeout);
    wv_run_test!(t, blocking_exchange);
    wv_run_test!(t, empty_buffers);
}

// reads one word from the inbound mailbox and echoes it to the outbound mailbox
fn echo_program() -> [u32; 3] {
    [
        isa::rdch(3, Channel::RD_IN_MBOX.val),
        isa::wrch(Channel::WR_OUT_MBOX.val, 3),
        isa::stop(0x2000),
    ]
}

fn inbound(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());

    wv_assert_eq!(t, ctx.in_mbox_status(), Ok(1));
    // the mailbox has a single slot
    wv_assert_eq!(t, ctx.in_mbox_write(&[7, 8], Behavior::AnyNonBlocking), Ok(1));
    wv_assert_eq!(t, ctx.in_mbox_status(), Ok(0));
    wv_assert_err!(
        t,
        ctx.in_mbox_write(&[9], Behavior::AnyNonBlocking),
        Code::WouldBlock
    );

    // the SPU still receives the first word
    load(&ctx, 0, &echo_program());
    let mut entry = 0;
    wv_assert_eq!(t, ctx.run(&mut entry, None), Ok(StopInfo::Exit(0)));
    wv_assert_eq!(t, ctx.in_mbox_status(), Ok(1));

    let mut buf = [0u32; 1];
    wv_assert_eq!(t, ctx.out_mbox_read(&mut buf), Ok(1));
    wv_assert_eq!(t, buf[0], 7);

    // a blocking write into an empty mailbox returns immediately
    wv_assert_eq!(t, ctx.in_mbox_write(&[10], Behavior::AnyBlocking), Ok(1));
    wv_assert_eq!(t, ctx.in_mbox_status(), Ok(0));
}

fn outbound(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());

    let mut buf = [0u32; 4];
    wv_assert_eq!(t, ctx.out_mbox_status(), Ok(0));
    wv_assert_eq!(t, ctx.out_mbox_read(&mut buf), Ok(0));

    wv_assert_ok!(ctx.in_mbox_write(&[0xCAFE], Behavior::AllBlocking));
    load(&ctx, 0, &echo_program());
    let mut entry = 0;
    wv_assert_eq!(t, ctx.run(&mut entry, None), Ok(StopInfo::Exit(0)));

    wv_assert_eq!(t, ctx.out_mbox_status(), Ok(1));
    wv_assert_eq!(t, ctx.out_mbox_read(&mut buf), Ok(1));
    wv_assert_eq!(t, buf[0], 0xCAFE);
    // the word is consumed exactly once
    wv_assert_eq!(t, ctx.out_mbox_status(), Ok(0));
    wv_assert_eq!(t, ctx.out_mbox_read(&mut buf), Ok(0));
}

fn interrupt_empty(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());

    let mut buf = [0u32; 2];
    wv_assert_eq!(t, ctx.out_intr_mbox_status(), Ok(0));
    wv_assert_eq!(t, ctx.out_intr_mbox_read(&mut buf, Behavior::AnyNonBlocking), Ok(0));

    load(&ctx, 0, &[
        isa::il(5, 0x77),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 5),
        isa::stop(0x2000),
    ]);
    let mut entry = 0;
    wv_assert_eq!(t, ctx.run(&mut entry, None), Ok(StopInfo::Exit(0)));

    wv_assert_eq!(t, ctx.out_intr_mbox_status(), Ok(1));
    wv_assert_eq!(t, ctx.out_intr_mbox_read(&mut buf, Behavior::AnyNonBlocking), Ok(1));
    wv_assert_eq!(t, buf[0], 0x77);
    wv_assert_eq!(t, ctx.out_intr_mbox_status(), Ok(0));
}

fn interrupt_timeout(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());

    let mut buf = [0u32; 1];
    let start = Instant::now();
    wv_assert_err!(
        t,
        ctx.out_intr_mbox_read_timeout(&mut buf, Duration::from_millis(30)),
        Code::Timeout
    );
    wv_assert!(t, start.elapsed() >= Duration::from_millis(30));

    // a word that is already there is returned without waiting
    load(&ctx, 0, &[
        isa::il(5, 0x31),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 5),
        isa::stop(0x2000),
    ]);
    let mut entry = 0;
    wv_assert_ok!(ctx.run(&mut entry, None));
    wv_assert_eq!(
        t,
        ctx.out_intr_mbox_read_timeout(&mut buf, Duration::from_secs(5)),
        Ok(1)
    );
    wv_assert_eq!(t, buf[0], 0x31);
}

fn blocking_exchange(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());

    // forwards two inbound words to the interrupt mailbox
    load(&ctx, 0, &[
        isa::rdch(3, Channel::RD_IN_MBOX.val),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 3),
        isa::rdch(4, Channel::RD_IN_MBOX.val),
        isa::wrch(Channel::WR_OUT_INTR_MBOX.val, 4),
        isa::stop(0x2001),
    ]);

    let mut buf = [0u32; 2];
    let res = thread::scope(|s| {
        let spu = s.spawn(|| {
            let mut entry = 0;
            ctx.run(&mut entry, None)
        });

        wv_assert_eq!(t, ctx.in_mbox_write(&[0x11, 0x22], Behavior::AllBlocking), Ok(2));
        wv_assert_eq!(t, ctx.out_intr_mbox_read(&mut buf, Behavior::AllBlocking), Ok(2));
        spu.join()
    });

    wv_assert_eq!(t, wv_assert_ok!(res), Ok(StopInfo::Exit(1)));
    wv_assert_eq!(t, buf, [0x11, 0x22]);
}

fn empty_buffers(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());

    wv_assert_eq!(t, ctx.in_mbox_write(&[], Behavior::AllBlocking), Ok(0));
    wv_assert_eq!(t, ctx.out_mbox_read(&mut []), Ok(0));
    wv_assert_eq!(t, ctx.out_intr_mbox_read(&mut [], Behavior::AllBlocking), Ok(0));
    wv_assert_eq!(
        t,
        ctx.out_intr_mbox_read_timeout(&mut [], Duration::from_millis(1)),
        Ok(0)
    );
}
