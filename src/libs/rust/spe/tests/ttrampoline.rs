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

use base::test::WvTester;

use spe::arch::sim::SimConfig;
use spe::isa;
use spe::kif::Channel;
use spe::trampoline::{
    self, BACKCHAIN_OFF, CODE, CODE_OFF, ENTRY_OFF, REGBLOCK_OFF, STACK_PTR,
};
use spe::{CreateFlags, RegBlock, StopInfo};

use crate::{load, new_ctx, sim};

pub fn run(t: &mut dyn WvTester) {
    wv_run_test!(t, layout);
    wv_run_test!(t, regblock_bytes);
    wv_run_test!(t, launch_with_args);
    wv_run_test!(t, return_through_stub);
    wv_run_test!(t, explicit_setup);
}

fn layout(t: &mut dyn WvTester) {
    wv_assert_eq!(t, REGBLOCK_OFF, 0x3FF80);
    wv_assert_eq!(t, ENTRY_OFF, 0x3FFC0);
    wv_assert_eq!(t, CODE_OFF, 0x3FFD0);
    wv_assert_eq!(t, BACKCHAIN_OFF, ENTRY_OFF);
    wv_assert_eq!(t, STACK_PTR, 0);

    // the loads of the stub refer to the register block
    wv_assert_eq!(t, CODE[0], isa::lqa(3, REGBLOCK_OFF));
    wv_assert_eq!(t, CODE[4], isa::lqa(7, ENTRY_OFF));
    wv_assert_eq!(t, CODE[5], isa::il(isa::SP, 0));
    wv_assert_eq!(t, CODE[6], isa::il(2, 0));
    wv_assert_eq!(t, CODE[7], isa::stqa(2, BACKCHAIN_OFF));
    wv_assert_eq!(t, CODE[8], isa::bisl(isa::LR, 7));
}

fn regblock_bytes(t: &mut dyn WvTester) {
    let mut regs = RegBlock::with_words(1, 2, 3, 4);
    regs.set_entry(0x100);
    let bytes = regs.to_bytes();
    wv_assert_eq!(t, bytes.len(), 80);
    wv_assert_eq!(t, bytes[0..4], [0, 0, 0, 1]);
    wv_assert_eq!(t, bytes[16..20], [0, 0, 0, 2]);
    wv_assert_eq!(t, bytes[48..52], [0, 0, 0, 4]);
    wv_assert_eq!(t, bytes[64..68], [0, 0, 1, 0]);
    wv_assert!(t, bytes[68..80].iter().all(|b| *b == 0));
}

fn launch_with_args(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());
    load(&ctx, 0x100, &[
        isa::wrch(Channel::WR_OUT_MBOX.val, 4),
        isa::stop(0x2042),
    ]);

    let regs = RegBlock::with_words(0x11, 0x22, 0x33, 0x44);
    let mut entry = 0x100;
    wv_assert_eq!(t, ctx.run(&mut entry, Some(&regs)), Ok(StopInfo::Exit(0x42)));

    let mut val = [0u32; 1];
    wv_assert_eq!(t, ctx.out_mbox_read(&mut val), Ok(1));
    wv_assert_eq!(t, val[0], 0x22);

    let ls = wv_assert_ok!(ctx.local_store());
    // the consumed entry quadword holds the null backchain
    wv_assert_eq!(t, ls.read_u32(ENTRY_OFF as usize), Ok(0));
    wv_assert_eq!(t, ls.read_u32(REGBLOCK_OFF as usize), Ok(0x11));
    wv_assert_eq!(t, ls.read_u32(CODE_OFF as usize), Ok(CODE[0]));
}

fn return_through_stub(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());
    load(&ctx, 0x200, &[isa::wrch(Channel::WR_OUT_MBOX.val, isa::SP), isa::bi(isa::LR)]);

    let ls = wv_assert_ok!(ctx.local_store());
    wv_assert_ok!(ls.write_u32(0, 0xFFFF_FFFF));

    let mut entry = 0x200;
    let regs = RegBlock::default();
    wv_assert_eq!(t, ctx.run(&mut entry, Some(&regs)), Ok(StopInfo::Exit(0)));
    // the stop of the stub is the tenth instruction
    wv_assert_eq!(t, entry, CODE_OFF + 10 * 4);

    let mut val = [0u32; 1];
    wv_assert_eq!(t, ctx.out_mbox_read(&mut val), Ok(1));
    // the program starts without a custom stack
    wv_assert_eq!(t, val[0], 0);
    // the backchain has been terminated within the region, not at address 0
    for off in (0..16).step_by(4) {
        wv_assert_eq!(t, ls.read_u32(BACKCHAIN_OFF as usize + off), Ok(0));
    }
    wv_assert_eq!(t, ls.read_u32(0), Ok(0xFFFF_FFFF));
}

fn explicit_setup(t: &mut dyn WvTester) {
    let kernel = sim(SimConfig::default());
    let ctx = new_ctx(&kernel, CreateFlags::empty());
    load(&ctx, 0x300, &[isa::wrch(Channel::WR_OUT_MBOX.val, 3), isa::stop(0x2001)]);

    let mut regs = RegBlock::with_words(0x77, 0, 0, 0);
    regs.set_entry(0x300);
    let mut entry = wv_assert_ok!(trampoline::setup(&ctx, &regs));
    wv_assert_eq!(t, entry, CODE_OFF);
    wv_assert_eq!(t, ctx.run(&mut entry, None), Ok(StopInfo::Exit(1)));

    let mut val = [0u32; 1];
    wv_assert_eq!(t, ctx.out_mbox_read(&mut val), Ok(1));
    wv_assert_eq!(t, val[0], 0x77);
}
