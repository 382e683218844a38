// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clock tree for the STM32MP13 RCC.
//!
//! The tree itself is described in `clock-tree.toml` and turned into a
//! `clk_core::ClockTable` at build time; this crate adds the board bring-up
//! that moves the SoC from its reset clocking onto the PLLs. Set
//! `CLOCK_TREE_CONFIG` to build against a different description.
//!
//! Typical use is [`init`] followed by [`board::bring_up`] with [`BOARD`].

#![cfg_attr(target_os = "none", no_std)]

use clk_core::{ClockTree, RegisterBank, Timebase};

pub mod board;

include!(concat!(env!("OUT_DIR"), "/clock_tree.rs"));

/// HSI configuration register, holding HSIDIV in its low bits.
const RCC_HSICFGR: u32 = 0x0c;
/// Oscillator ready register.
const RCC_OCRDYR: u32 = 0x808;

const HSIDIV_MASK: u32 = 0x3;
const HSIDIVRDY: u32 = 1 << 2;

/// HSI's undivided output.
const MAX_HSI_HZ: u32 = 64_000_000;

/// Builds the MP13 clock tree on top of `regs`. Oscillator frequencies come
/// from the board section of the tree description.
pub fn init<R: RegisterBank, T: Timebase>(
    regs: R,
    time: T,
    refs: &'static mut [u32; NUM_CLOCKS],
) -> ClockTree<'static, R, T> {
    ClockTree::init(&CLOCK_TABLE, regs, time, refs, oscillator_frequency)
}
