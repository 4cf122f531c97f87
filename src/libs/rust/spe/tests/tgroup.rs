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

use std::sync::Arc;

use base::errors::Code;
use base::test::WvTester;

use spe::arch::sim::SimConfig;
use spe::arch::Kernel;
use spe::group::GroupState;
use spe::{Context, CreateArgs, CreateFlags, Group, GroupArgs, SchedClass, SchedPolicy};

use crate::sim;

pub fn run(t: &mut dyn WvTester) {
    wv_run_test!(t, create);
    wv_run_test!(t, immediate_destroy);
    wv_run_test!(t, deferred_destroy);
    wv_run_test!(t, fixed_units);
    wv_run_test!(t, gang);
    wv_run_test!(t, drop_leaves_group);
}

fn new_group(policy: SchedPolicy) -> Group {
    let kernel: Arc<dyn Kernel> = sim(SimConfig::default());
    wv_assert_ok!(Group::new(
        GroupArgs::new(SchedClass::Other, policy).kernel(kernel)
    ))
}

fn join(group: &Group) -> Result<Context, base::errors::Error> {
    Context::new_with(CreateArgs::new().group(group))
}

fn create(t: &mut dyn WvTester) {
    let kernel: Arc<dyn Kernel> = sim(SimConfig::default());
    let group = wv_assert_ok!(Group::new(
        GroupArgs::new(SchedClass::RoundRobin, SchedPolicy::Default)
            .priority(10)
            .min_members(2)
            .kernel(kernel)
    ));
    wv_assert_eq!(t, group.class(), SchedClass::RoundRobin);
    wv_assert_eq!(t, group.priority(), 10);
    wv_assert_eq!(t, group.policy(), SchedPolicy::Default);
    wv_assert_eq!(t, group.min_members(), 2);
    // no contexts are created along with the group
    wv_assert_eq!(t, group.members(), 0);
    wv_assert_eq!(t, group.state_of(), GroupState::Alive);
}

fn immediate_destroy(t: &mut dyn WvTester) {
    let group = new_group(SchedPolicy::Default);
    wv_assert_ok!(group.destroy());
    wv_assert_eq!(t, group.state_of(), GroupState::Destroyed);
    wv_assert_err!(t, group.destroy(), Code::Destroyed);
    wv_assert_err!(t, join(&group), Code::Destroyed);
}

fn deferred_destroy(t: &mut dyn WvTester) {
    let group = new_group(SchedPolicy::Default);
    let a = wv_assert_ok!(join(&group));
    let b = wv_assert_ok!(join(&group));
    wv_assert_eq!(t, group.members(), 2);
    wv_assert!(t, wv_assert_some!(a.group()).ptr_eq(&group));

    wv_assert_ok!(group.destroy());
    wv_assert_eq!(t, group.state_of(), GroupState::PendingDestroy);
    wv_assert_err!(t, join(&group), Code::Destroyed);
    wv_assert_err!(t, group.destroy(), Code::Destroyed);

    wv_assert!(t, a.destroy().is_ok());
    wv_assert_eq!(t, group.state_of(), GroupState::PendingDestroy);
    wv_assert!(t, b.destroy().is_ok());
    wv_assert_eq!(t, group.state_of(), GroupState::Destroyed);
    wv_assert_eq!(t, group.members(), 0);
    wv_assert_err!(t, group.destroy(), Code::Destroyed);
}

fn fixed_units(t: &mut dyn WvTester) {
    let group = new_group(SchedPolicy::Fixed(2));
    let a = wv_assert_ok!(join(&group));
    let _b = wv_assert_ok!(join(&group));
    wv_assert_err!(t, join(&group), Code::NoSpace);
    wv_assert!(t, a.destroy().is_ok());
    wv_assert!(t, join(&group).is_ok());

    let kernel: Arc<dyn Kernel> = sim(SimConfig::default());
    wv_assert_err!(
        t,
        Group::new(GroupArgs::new(SchedClass::Fifo, SchedPolicy::Fixed(0)).kernel(kernel.clone())),
        Code::InvArgs
    );
    wv_assert_err!(
        t,
        Group::new(
            GroupArgs::new(SchedClass::Fifo, SchedPolicy::Fixed(1))
                .min_members(2)
                .kernel(kernel)
        ),
        Code::InvArgs
    );
}

fn gang(t: &mut dyn WvTester) {
    let group = new_group(SchedPolicy::Gang);
    let ctx = wv_assert_ok!(join(&group));
    wv_assert!(t, ctx.path().starts_with(&format!("/sim/gang-{}/", group.id())));

    // a context of another group is not part of the gang
    let flags = CreateFlags::empty();
    let other = wv_assert_ok!(Context::new_with(
        CreateArgs::new().flags(flags).kernel(sim(SimConfig::default()))
    ));
    wv_assert!(t, !other.path().contains("gang"));
}

fn drop_leaves_group(t: &mut dyn WvTester) {
    let group = new_group(SchedPolicy::Default);
    {
        let _ctx = wv_assert_ok!(join(&group));
        wv_assert_eq!(t, group.members(), 1);
    }
    wv_assert_eq!(t, group.members(), 0);
}
