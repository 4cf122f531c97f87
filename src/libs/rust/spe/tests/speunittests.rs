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

//! The unit tests of the SPE runtime, running against the emulated spufs

#[macro_use]
extern crate base;

mod tconfig;
mod terrors;
mod tevent;
mod tgroup;
mod tmbox;
mod ttrampoline;

use std::process;
use std::sync::Arc;

use base::test::{DefaultWvTester, WvTester};

use spe::arch::sim::{SimConfig, SimKernel};
use spe::arch::Kernel;
use spe::image::RawImage;
use spe::{Context, CreateArgs, CreateFlags};

/// Creates an emulated kernel with given configuration
pub fn sim(cfg: SimConfig) -> Arc<SimKernel> {
    SimKernel::new(cfg)
}

/// Creates a context on `kernel`
pub fn new_ctx(kernel: &Arc<SimKernel>, flags: CreateFlags) -> Context {
    let kernel: Arc<dyn Kernel> = kernel.clone();
    wv_assert_ok!(Context::new_with(CreateArgs::new().flags(flags).kernel(kernel)))
}

/// Loads the given instructions to `addr`
pub fn load(ctx: &Context, addr: u32, insns: &[u32]) {
    wv_assert_ok!(ctx.program_load(&RawImage::from_insns(addr, insns)));
}

fn main() {
    base::io::init("speunittests");

    let mut tester = DefaultWvTester::default();
    wv_run_suite!(tester, terrors::run);
    wv_run_suite!(tester, tconfig::run);
    wv_run_suite!(tester, tcontext::run);
    wv_run_suite!(tester, tgroup::run);
    wv_run_suite!(tester, ttrampoline::run);
    wv_run_suite!(tester, tdma::run);
    wv_run_suite!(tester, tmbox::run);
    wv_run_suite!(tester, tevent::run);

    println!(
        "{} tests, {} succeeded, {} failed",
        tester.tests(),
        tester.successes(),
        tester.failures()
    );
    if tester.failures() > 0 {
        process::exit(1);
    }
}
