// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-kind clock operations, and the gate, divider and mux primitives they
//! are built from.

use crate::desc::{
    Composite, DivClock, DivFlags, FixedFactor, FixedRate, GateClock, Kind,
    Timer,
};
use crate::regs::{RegisterBank, Timebase, CLKSRC_TIMEOUT_US};
use crate::{
    ClkError, ClockId, ClockTable, ClockTree, Trace, MAX_OSCILLATORS,
};

/// State handed to each node's `init` while the tree is being built.
pub struct InitContext<'t, 'a> {
    pub table: &'t ClockTable<'a>,
    pub osc_hz: &'t mut [u32; MAX_OSCILLATORS],
    pub frequency_of: &'t dyn Fn(&str) -> Option<u32>,
}

/// What a node kind can do. Every operation is optional; the defaults are
/// what the tree assumes for a kind that doesn't have it.
pub trait ClockOps {
    /// Rate of this node given its parent's. `None` means the node passes
    /// its parent's rate through unchanged.
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        _tree: &ClockTree<'_, R, T>,
        _parent_hz: u32,
    ) -> Option<u32> {
        None
    }

    fn enable<R: RegisterBank, T: Timebase>(
        &self,
        _tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        Ok(())
    }

    fn disable<R: RegisterBank, T: Timebase>(
        &self,
        _tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        Ok(())
    }

    /// Hardware's view of whether the node is running. `None` means the
    /// hardware can't say, and the reference count is authoritative.
    fn is_enabled<R: RegisterBank, T: Timebase>(
        &self,
        _tree: &ClockTree<'_, R, T>,
    ) -> Option<bool> {
        None
    }

    fn init(&self, _cx: &mut InitContext<'_, '_>) {}
}

/// Expands `$body` once per kind that carries data, with `$k` bound to that
/// data; `Kind::Mux` gets `$mux`.
macro_rules! each_kind {
    ($kind:expr, $k:ident => $body:expr, $mux:expr) => {
        match $kind {
            Kind::FixedRate($k) => $body,
            Kind::Osc($k) => $body,
            Kind::Pll($k) => $body,
            Kind::Divider($k) => $body,
            Kind::Gate($k) => $body,
            Kind::FixedFactor($k) => $body,
            Kind::Composite($k) => $body,
            Kind::Timer($k) => $body,
            Kind::Mux => $mux,
        }
    };
}

impl ClockOps for Kind {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
        parent_hz: u32,
    ) -> Option<u32> {
        each_kind!(self, k => k.recalc_rate(tree, parent_hz), None)
    }

    fn enable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        each_kind!(self, k => k.enable(tree), Ok(()))
    }

    fn disable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        each_kind!(self, k => k.disable(tree), Ok(()))
    }

    fn is_enabled<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Option<bool> {
        each_kind!(self, k => k.is_enabled(tree), None)
    }

    fn init(&self, cx: &mut InitContext<'_, '_>) {
        each_kind!(self, k => k.init(cx), ())
    }
}

////////////////////////////////////////////////////////////////////////////

impl ClockOps for FixedRate {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        _tree: &ClockTree<'_, R, T>,
        _parent_hz: u32,
    ) -> Option<u32> {
        Some(self.hz)
    }
}

impl ClockOps for FixedFactor {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        _tree: &ClockTree<'_, R, T>,
        parent_hz: u32,
    ) -> Option<u32> {
        // Zero divisors are rejected when the table is validated.
        assert!(self.div != 0);
        let hz = u64::from(parent_hz) * u64::from(self.mult)
            / u64::from(self.div);
        Some(saturate(hz))
    }
}

impl ClockOps for DivClock {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
        parent_hz: u32,
    ) -> Option<u32> {
        Some(tree.divider_rate(self.div, parent_hz))
    }
}

impl ClockOps for GateClock {
    fn enable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        tree.gate_enable(self.gate);
        Ok(())
    }

    fn disable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        tree.gate_disable(self.gate);
        Ok(())
    }

    fn is_enabled<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Option<bool> {
        Some(tree.gate_is_enabled(self.gate))
    }
}

impl ClockOps for Composite {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
        parent_hz: u32,
    ) -> Option<u32> {
        Some(tree.divider_rate(self.div, parent_hz))
    }

    fn enable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        tree.gate_enable(self.gate);
        Ok(())
    }

    fn disable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        tree.gate_disable(self.gate);
        Ok(())
    }

    fn is_enabled<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Option<bool> {
        Some(tree.gate_is_enabled(self.gate))
    }
}

const APBDIV_MASK: u32 = 0x7;
const TIMPRE: u32 = 1 << 0;

impl ClockOps for Timer {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
        parent_hz: u32,
    ) -> Option<u32> {
        let prescaler = tree.read(self.apbdiv) & APBDIV_MASK;
        let timpre = tree.read(self.timpre) & TIMPRE;

        if prescaler == 0 {
            return Some(parent_hz);
        }
        let hz = u64::from(parent_hz) * u64::from(timpre + 1) * 2;
        Some(saturate(hz))
    }
}

pub(crate) fn saturate(hz: u64) -> u32 {
    u32::try_from(hz).unwrap_or(u32::MAX)
}

////////////////////////////////////////////////////////////////////////////
// Primitives, addressed by their index in the table.

impl<R: RegisterBank, T: Timebase> ClockTree<'_, R, T> {
    pub fn gate_enable(&self, gate: u16) {
        let g = self.table.gates[usize::from(gate)];
        if g.set_clr {
            self.write(g.offset, g.mask());
        } else {
            self.modify(g.offset, 0, g.mask());
        }
    }

    pub fn gate_disable(&self, gate: u16) {
        let g = self.table.gates[usize::from(gate)];
        if g.set_clr {
            self.write(g.offset + self.table.clear_offset, g.mask());
        } else {
            self.modify(g.offset, g.mask(), 0);
        }
    }

    pub fn gate_is_enabled(&self, gate: u16) -> bool {
        let g = self.table.gates[usize::from(gate)];
        self.read(g.offset) & g.mask() != 0
    }

    /// Waits for a gate (typically a ready flag) to read as `on`.
    pub fn gate_wait_ready(
        &self,
        gate: u16,
        on: bool,
        timeout_us: u64,
    ) -> Result<(), ClkError> {
        let g = self.table.gates[usize::from(gate)];
        let expected = if on { g.mask() } else { 0 };
        self.wait_bits(g.offset, g.mask(), expected, timeout_us)
    }

    /// Raw value of a divider's field.
    pub fn divider_value(&self, div: u16) -> u32 {
        let d = self.table.dividers[usize::from(div)];
        (self.read(d.offset) & d.mask()) >> d.shift
    }

    /// `parent_hz` divided by the divider's current setting, rounding up.
    /// Encodings the divider doesn't recognize pass the parent through.
    pub fn divider_rate(&self, div: u16, parent_hz: u32) -> u32 {
        let d = self.table.dividers[usize::from(div)];
        let divisor = d.divisor(self.divider_value(div));
        if divisor == 0 {
            return parent_hz;
        }
        u64::from(parent_hz).div_ceil(u64::from(divisor)) as u32
    }

    /// Programs a divider with a raw field value and waits for the hardware
    /// to take it.
    pub fn set_div(&self, div: u16, value: u32) -> Result<(), ClkError> {
        let r = self.set_div_inner(div, value);
        self.note(r)
    }

    fn set_div_inner(&self, div: u16, value: u32) -> Result<(), ClkError> {
        let d = self
            .table
            .dividers
            .get(usize::from(div))
            .ok_or(ClkError::InvalidIndex)?;
        if d.flags.contains(DivFlags::READ_ONLY) {
            return Err(ClkError::InvalidOperation);
        }
        if value > d.mask() >> d.shift {
            return Err(ClkError::OutOfRange);
        }

        self.modify(d.offset, d.mask(), value << d.shift);
        if let Some(bit) = d.ready_bit {
            let rdy = 1 << bit;
            self.wait_bits(d.offset, rdy, rdy, CLKSRC_TIMEOUT_US)?;
        }

        self.trace_event(Trace::DividerSet { div, value });
        Ok(())
    }

    /// Raw value of a mux's selector field.
    pub fn mux_value(&self, mux: u16) -> u32 {
        let m = self.table.muxes[usize::from(mux)];
        (self.read(m.offset) & m.mask()) >> m.shift
    }

    /// Writes a mux selector and waits for the mux to report the switch.
    /// Reference counts are not touched.
    pub fn set_mux(&self, mux: u16, sel: u32) -> Result<(), ClkError> {
        let r = self.set_mux_inner(mux, sel);
        self.note(r)
    }

    fn set_mux_inner(&self, mux: u16, sel: u32) -> Result<(), ClkError> {
        let m = self
            .table
            .muxes
            .get(usize::from(mux))
            .ok_or(ClkError::InvalidIndex)?;
        if sel as usize >= m.parents.len() {
            return Err(ClkError::InvalidIndex);
        }
        self.write_mux(mux, sel)
    }

    /// Selector write plus ready poll; `sel` is assumed in range.
    pub(crate) fn write_mux(&self, mux: u16, sel: u32) -> Result<(), ClkError> {
        let m = self.table.muxes[usize::from(mux)];
        self.modify(m.offset, m.mask(), (sel << m.shift) & m.mask());
        match m.ready_bit {
            Some(bit) => {
                let rdy = 1 << bit;
                self.wait_bits(m.offset, rdy, rdy, CLKSRC_TIMEOUT_US)
            }
            None => Ok(()),
        }
    }

    /// Candidate parents of a muxed clock, or `None` for a clock whose
    /// parent is fixed.
    pub(crate) fn mux_of(&self, id: ClockId) -> Option<u16> {
        match self.clock(id).parent {
            crate::Parent::Mux(m) => Some(m),
            _ => None,
        }
    }
}
