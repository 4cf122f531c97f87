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

use std::env;

use base::errors::Code;
use base::test::WvTester;

use spe::config::{Config, Platform, DEF_SIM_SPUS, DEF_SPUFS_ROOT};

pub fn run(t: &mut dyn WvTester) {
    wv_run_test!(t, defaults);
    wv_run_test!(t, emulator);
    wv_run_test!(t, invalid);
}

const VARS: [&str; 5] = [
    "SPE_PLATFORM",
    "SPE_SPUFS_ROOT",
    "SPE_SIM_SPUS",
    "SPE_SIM_NO_DMA",
    "SPE_SIM_ISOLATION",
];

fn clear() {
    for v in VARS {
        env::remove_var(v);
    }
}

fn defaults(t: &mut dyn WvTester) {
    clear();
    let cfg = wv_assert_ok!(Config::from_env());
    wv_assert_eq!(t, cfg.platform(), Platform::Spufs);
    wv_assert_eq!(t, cfg.spufs_root(), DEF_SPUFS_ROOT);
    wv_assert_eq!(t, cfg.sim().unit_count(), DEF_SIM_SPUS);
    wv_assert!(t, cfg.sim().has_dma_queue());
}

fn emulator(t: &mut dyn WvTester) {
    clear();
    env::set_var("SPE_PLATFORM", "sim");
    env::set_var("SPE_SPUFS_ROOT", "/mnt/spu");
    env::set_var("SPE_SIM_SPUS", " 3 ");
    env::set_var("SPE_SIM_NO_DMA", "yes");

    let cfg = wv_assert_ok!(Config::from_env());
    wv_assert_eq!(t, cfg.platform(), Platform::Sim);
    wv_assert_eq!(t, cfg.spufs_root(), "/mnt/spu");
    wv_assert_eq!(t, cfg.sim().unit_count(), 3);
    wv_assert!(t, !cfg.sim().has_dma_queue());

    // unparsable numbers fall back to the default
    env::set_var("SPE_SIM_SPUS", "many");
    let cfg = wv_assert_ok!(Config::from_env());
    wv_assert_eq!(t, cfg.sim().unit_count(), DEF_SIM_SPUS);
    clear();
}

fn invalid(t: &mut dyn WvTester) {
    clear();
    env::set_var("SPE_PLATFORM", "cell-blade");
    wv_assert_err!(t, Config::from_env(), Code::InvArgs);

    env::set_var("SPE_PLATFORM", "sim");
    env::set_var("SPE_SIM_SPUS", "0");
    wv_assert_err!(t, Config::from_env(), Code::InvArgs);
    clear();
}
