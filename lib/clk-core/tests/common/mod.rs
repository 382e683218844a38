// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small clock tree shared by the integration tests.
//!
//! ```text
//!   hse (24 MHz osc) ──┬── a (gate) ── b (divider)
//!                      ├── p1 (gate) ──┐
//!   hsi (64 MHz) ──────┼── p2 (gate) ──┼─[mux 0]── d (gate)
//!                      │           a ──┘
//!                      ├── c (gate, critical)
//!   hse, hsi ──[mux 1]── e (mux only) ── f (÷2)
//! ```

#![allow(dead_code)]

use clk_core::fakes::{FakeRcc, FakeTime};
use clk_core::*;

pub const HSE: ClockId = ClockId(0);
pub const HSI: ClockId = ClockId(1);
pub const A: ClockId = ClockId(2);
pub const B: ClockId = ClockId(3);
pub const C: ClockId = ClockId(4);
pub const P1: ClockId = ClockId(5);
pub const P2: ClockId = ClockId(6);
pub const D: ClockId = ClockId(7);
pub const E: ClockId = ClockId(8);
pub const F: ClockId = ClockId(9);

pub const HSE_ON: u32 = 0x00;
pub const HSE_RDY: u32 = 0x04;
pub const SET: u32 = 0x10;
pub const CLR: u32 = 0x14;
pub const DIV_B: u32 = 0x20;
pub const GATES: u32 = 0x30;
pub const MUX_D: u32 = 0x40;
pub const MUX_E: u32 = 0x44;

pub const MUX_READY: u8 = 31;

const fn gate(offset: u32, bit: u8, set_clr: bool) -> Gate {
    Gate {
        offset,
        bit,
        set_clr,
    }
}

const fn node(
    name: &'static str,
    binding: Option<u32>,
    parent: Parent,
    kind: Kind,
) -> Clock<'static> {
    Clock {
        name,
        binding,
        parent,
        flags: ClockFlags::empty(),
        kind,
    }
}

static GATE_TABLE: [Gate; 7] = [
    gate(HSE_ON, 0, false),
    gate(HSE_RDY, 0, false),
    gate(SET, 0, true),
    gate(SET, 1, true),
    gate(GATES, 0, false),
    gate(GATES, 1, false),
    gate(GATES, 2, false),
];

static DIVIDERS: [Divider<'static>; 1] = [Divider {
    offset: DIV_B,
    shift: 0,
    width: 3,
    flags: DivFlags::empty(),
    table: None,
    ready_bit: None,
}];

static D_PARENTS: [ClockId; 3] = [P1, P2, A];
static E_PARENTS: [ClockId; 2] = [HSE, HSI];

static MUXES: [Mux<'static>; 2] = [
    Mux {
        parents: &D_PARENTS,
        offset: MUX_D,
        shift: 0,
        width: 2,
        ready_bit: Some(MUX_READY),
    },
    Mux {
        parents: &E_PARENTS,
        offset: MUX_E,
        shift: 0,
        width: 1,
        ready_bit: None,
    },
];

static OSCILLATORS: [Oscillator<'static>; 1] = [Oscillator {
    name: "clk-hse",
    gate: Some(0),
    ready: Some(1),
    bypass: None,
    css: None,
    drive: None,
}];

static CLOCKS: [Clock<'static>; 10] = [
    node(
        "hse",
        Some(1),
        Parent::Root,
        Kind::Osc(Osc {
            osc: 0,
            gated: true,
        }),
    ),
    node(
        "hsi",
        Some(2),
        Parent::Root,
        Kind::FixedRate(FixedRate { hz: 64_000_000 }),
    ),
    node("a", Some(100), Parent::Clock(HSE), Kind::Gate(GateClock { gate: 2 })),
    node("b", Some(101), Parent::Clock(A), Kind::Divider(DivClock { div: 0 })),
    Clock {
        flags: ClockFlags::CRITICAL,
        ..node("c", Some(102), Parent::Clock(HSI), Kind::Gate(GateClock {
            gate: 3,
        }))
    },
    node("p1", None, Parent::Clock(HSE), Kind::Gate(GateClock { gate: 4 })),
    node("p2", None, Parent::Clock(HSI), Kind::Gate(GateClock { gate: 5 })),
    node("d", Some(103), Parent::Mux(0), Kind::Gate(GateClock { gate: 6 })),
    node("e", Some(104), Parent::Mux(1), Kind::Mux),
    node(
        "f",
        Some(105),
        Parent::Clock(E),
        Kind::FixedFactor(FixedFactor { mult: 1, div: 2 }),
    ),
];

pub static TABLE: ClockTable<'static> = ClockTable {
    clocks: &CLOCKS,
    muxes: &MUXES,
    dividers: &DIVIDERS,
    gates: &GATE_TABLE,
    oscillators: &OSCILLATORS,
    clear_offset: CLR - SET,
};

/// RCC where the oscillator comes up when asked and mux 0 switches.
pub fn rcc() -> FakeRcc {
    FakeRcc::new()
        .set_clr(SET, CLR)
        .mirror(HSE_ON, 0, HSE_RDY, 0)
        .ready(MUX_D, MUX_READY)
}

/// As `rcc`, but mux 0 never reports a switch.
pub fn stuck_mux_rcc() -> FakeRcc {
    FakeRcc::new()
        .set_clr(SET, CLR)
        .mirror(HSE_ON, 0, HSE_RDY, 0)
        .stuck(MUX_D, MUX_READY)
}

pub fn tree(rcc: &FakeRcc) -> ClockTree<'static, FakeRcc, FakeTime> {
    // b divides by three.
    rcc.poke(DIV_B, 2);
    let refs = Box::leak(vec![0; CLOCKS.len()].into_boxed_slice());
    ClockTree::init(&TABLE, rcc.clone(), FakeTime::default(), refs, |name| {
        (name == "clk-hse").then_some(24_000_000)
    })
}

/// Every counted clock's current parent is counted too.
pub fn parents_counted<R: RegisterBank, T: Timebase>(
    tree: &ClockTree<'_, R, T>,
) -> Result<(), String> {
    for i in 0..tree.len() {
        let id = ClockId(i as u16);
        if tree.refcount(id) == 0 {
            continue;
        }
        if let Ok(Some(p)) = tree.get_parent(id) {
            if tree.refcount(p) == 0 {
                return Err(format!(
                    "{} is counted but its parent {} is not",
                    tree.name(id),
                    tree.name(p)
                ));
            }
        }
    }
    Ok(())
}
