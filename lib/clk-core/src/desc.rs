// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static description of a clock tree.
//!
//! A [`ClockTable`] is built once (normally by code generated from the
//! board's clock-tree TOML) and never changes afterwards. Nodes refer to
//! muxes, dividers, gates and oscillators by their index in the table's
//! corresponding slice, which keeps each entry small and `Copy`.

use crate::pll::Pll;
use crate::regs::field_mask;

/// Index of a node in [`ClockTable::clocks`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClockId(pub u16);

impl ClockId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parent {
    Root,
    Clock(ClockId),
    /// Parent is chosen at runtime by the mux with this index.
    Mux(u16),
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct ClockFlags: u8 {
        /// Once enabled, `disable` never takes this clock's count to zero.
        const CRITICAL = 1 << 0;
        /// May be found running at boot without anyone holding a reference.
        const IGNORE_UNUSED = 1 << 1;
        /// Rate requests should be passed on to the parent.
        const SET_RATE_PARENT = 1 << 2;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct DivFlags: u8 {
        /// The field holds the divisor itself.
        const ONE_BASED = 1 << 0;
        /// The field holds log2 of the divisor.
        const POWER_OF_TWO = 1 << 1;
        /// Firmware must not reprogram this divider.
        const READ_ONLY = 1 << 5;
        /// Zero encodes the largest divisor the field can't otherwise hold.
        const MAX_AT_ZERO = 1 << 6;
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Clock<'a> {
    pub name: &'a str,
    /// Identifier consumers use to find this clock; `None` for internal
    /// nodes nobody outside the tree refers to.
    pub binding: Option<u32>,
    pub parent: Parent,
    pub flags: ClockFlags,
    pub kind: Kind,
}

/// What a node does to the rate and gating of the clock flowing through it.
#[derive(Copy, Clone, Debug)]
pub enum Kind {
    FixedRate(FixedRate),
    Osc(Osc),
    Pll(Pll),
    /// Selects a parent and does nothing else.
    Mux,
    Divider(DivClock),
    Gate(GateClock),
    FixedFactor(FixedFactor),
    Composite(Composite),
    Timer(Timer),
}

#[derive(Copy, Clone, Debug)]
pub struct FixedRate {
    pub hz: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct Osc {
    /// Index into [`ClockTable::oscillators`].
    pub osc: u16,
    /// False for external inputs we can neither start nor stop.
    pub gated: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct DivClock {
    pub div: u16,
}

#[derive(Copy, Clone, Debug)]
pub struct GateClock {
    pub gate: u16,
}

#[derive(Copy, Clone, Debug)]
pub struct FixedFactor {
    pub mult: u32,
    pub div: u32,
}

/// A divider and a gate acting as one node.
#[derive(Copy, Clone, Debug)]
pub struct Composite {
    pub gate: u16,
    pub div: u16,
}

/// Timer kernel clock, doubled (or quadrupled) behind a prescaled APB.
#[derive(Copy, Clone, Debug)]
pub struct Timer {
    /// Offset of the APB divider register feeding the timers.
    pub apbdiv: u32,
    /// Offset of the timer prescaler selection register.
    pub timpre: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct Mux<'a> {
    /// Candidate parents in selector order.
    pub parents: &'a [ClockId],
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
    /// Bit in the same register that rises once a new selection is active.
    pub ready_bit: Option<u8>,
}

impl Mux<'_> {
    pub const fn mask(&self) -> u32 {
        field_mask(self.shift, self.width)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DivEntry {
    pub val: u32,
    pub div: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct Divider<'a> {
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
    pub flags: DivFlags,
    pub table: Option<&'a [DivEntry]>,
    /// Bit in the same register that rises once a new ratio is active.
    pub ready_bit: Option<u8>,
}

impl Divider<'_> {
    pub const fn mask(&self) -> u32 {
        field_mask(self.shift, self.width)
    }

    /// Turns a raw field value into a divisor. Zero means "unknown
    /// encoding", which callers treat as a pass-through.
    pub fn divisor(&self, val: u32) -> u32 {
        if self.flags.contains(DivFlags::ONE_BASED) {
            val
        } else if self.flags.contains(DivFlags::POWER_OF_TWO) {
            1u32.checked_shl(val).unwrap_or(0)
        } else if self.flags.contains(DivFlags::MAX_AT_ZERO) {
            if val != 0 {
                val
            } else {
                1u32.checked_shl(self.width.into()).unwrap_or(0)
            }
        } else if let Some(table) = self.table {
            table
                .iter()
                .find(|e| e.val == val)
                .map(|e| e.div)
                .unwrap_or(0)
        } else {
            val + 1
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Gate {
    pub offset: u32,
    pub bit: u8,
    /// The gate lives in a set/clear register pair: writing a one to
    /// `offset` sets the bit, writing a one to `offset` plus the table's
    /// clear delta clears it.
    pub set_clr: bool,
}

impl Gate {
    pub const fn mask(&self) -> u32 {
        1 << self.bit
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Oscillator<'a> {
    /// Name the board configuration knows this oscillator by.
    pub name: &'a str,
    pub gate: Option<u16>,
    pub ready: Option<u16>,
    pub bypass: Option<Bypass>,
    pub css: Option<Css>,
    pub drive: Option<Drive>,
}

#[derive(Copy, Clone, Debug)]
pub struct Bypass {
    pub offset: u32,
    pub bypass_bit: u8,
    pub digital_bit: u8,
}

/// Clock security system enable.
#[derive(Copy, Clone, Debug)]
pub struct Css {
    pub offset: u32,
    pub bit: u8,
}

#[derive(Copy, Clone, Debug)]
pub struct Drive {
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
    pub default: u8,
}

#[derive(Copy, Clone, Debug)]
pub struct ClockTable<'a> {
    pub clocks: &'a [Clock<'a>],
    pub muxes: &'a [Mux<'a>],
    pub dividers: &'a [Divider<'a>],
    pub gates: &'a [Gate],
    pub oscillators: &'a [Oscillator<'a>],
    /// Distance from a set register to its clear twin.
    pub clear_offset: u32,
}

impl ClockTable<'_> {
    /// Checks every cross-reference in the table, panicking on the first one
    /// that points nowhere. A table that fails here is a build problem, not
    /// something a running system can work around.
    pub fn validate(&self) {
        assert!(
            self.clocks.len() <= usize::from(u16::MAX),
            "clock table too large"
        );

        let fits = |shift: u8, width: u8| {
            width > 0 && u32::from(shift) + u32::from(width) <= 32
        };
        for g in self.gates {
            assert!(g.bit < 32, "gate at {:#x} has bit {}", g.offset, g.bit);
        }
        for d in self.dividers {
            assert!(
                fits(d.shift, d.width),
                "divider at {:#x} overflows its register",
                d.offset
            );
        }

        for mux in self.muxes {
            assert!(
                fits(mux.shift, mux.width),
                "mux at {:#x} overflows its register",
                mux.offset
            );
            assert!(
                mux.parents.len() as u64 <= 1u64 << mux.width,
                "mux at {:#x} cannot encode {} parents",
                mux.offset,
                mux.parents.len()
            );
            for p in mux.parents {
                assert!(
                    p.index() < self.clocks.len(),
                    "mux at {:#x} names missing clock {}",
                    mux.offset,
                    p.0
                );
            }
        }

        for osc in self.oscillators {
            for g in [osc.gate, osc.ready].into_iter().flatten() {
                assert!(
                    usize::from(g) < self.gates.len(),
                    "oscillator {} names missing gate {g}",
                    osc.name
                );
            }
        }

        for c in self.clocks {
            match c.parent {
                Parent::Root => (),
                Parent::Clock(p) => assert!(
                    p.index() < self.clocks.len(),
                    "clock {} has missing parent {}",
                    c.name,
                    p.0
                ),
                Parent::Mux(m) => assert!(
                    usize::from(m) < self.muxes.len(),
                    "clock {} names missing mux {m}",
                    c.name
                ),
            }
            self.validate_kind(c);
        }
    }

    fn validate_kind(&self, c: &Clock<'_>) {
        let gate_ok = |g: u16| usize::from(g) < self.gates.len();
        let div_ok = |d: u16| usize::from(d) < self.dividers.len();

        let ok = match c.kind {
            Kind::FixedRate(_) | Kind::Mux | Kind::Timer(_) | Kind::Pll(_) => {
                true
            }
            Kind::Osc(o) => match self.oscillators.get(usize::from(o.osc)) {
                Some(data) => {
                    !o.gated || (data.gate.is_some() && data.ready.is_some())
                }
                None => false,
            },
            Kind::Divider(d) => div_ok(d.div),
            Kind::Gate(g) => gate_ok(g.gate),
            Kind::Composite(cg) => gate_ok(cg.gate) && div_ok(cg.div),
            Kind::FixedFactor(ff) => {
                assert!(ff.div != 0, "clock {}: division by zero", c.name);
                true
            }
        };
        assert!(ok, "clock {} refers to a missing table entry", c.name);
    }
}
