// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Oscillators: the roots of the tree.

use crate::desc::{Kind, Osc, Oscillator};
use crate::ops::{ClockOps, InitContext};
use crate::regs::{field_mask, RegisterBank, Timebase, OSCRDY_TIMEOUT_US};
use crate::{ClkError, ClockId, ClockTree};

impl ClockOps for Osc {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
        _parent_hz: u32,
    ) -> Option<u32> {
        Some(tree.oscillator_hz(self.osc))
    }

    fn enable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        let Some((gate, ready)) = self.gates(tree) else {
            return Ok(());
        };
        // Already switched on is not the same as running yet.
        if !tree.gate_is_enabled(gate) {
            tree.gate_enable(gate);
        }
        tree.gate_wait_ready(ready, true, OSCRDY_TIMEOUT_US)
    }

    fn disable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        let Some((gate, ready)) = self.gates(tree) else {
            return Ok(());
        };
        if !tree.gate_is_enabled(gate) {
            return Ok(());
        }
        tree.gate_disable(gate);
        tree.gate_wait_ready(ready, false, OSCRDY_TIMEOUT_US)
    }

    fn is_enabled<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Option<bool> {
        self.gates(tree).map(|(gate, _)| tree.gate_is_enabled(gate))
    }

    fn init(&self, cx: &mut InitContext<'_, '_>) {
        let data = &cx.table.oscillators[usize::from(self.osc)];
        // An oscillator the board doesn't mention isn't fitted.
        let hz = (cx.frequency_of)(data.name).unwrap_or(0);
        cx.osc_hz[usize::from(self.osc)] = hz;
    }
}

impl Osc {
    /// Control and ready gates, for oscillators we can start and stop.
    fn gates<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Option<(u16, u16)> {
        if !self.gated {
            return None;
        }
        let data = tree.oscillator(self.osc);
        Some((data.gate?, data.ready?))
    }
}

impl<'a, R: RegisterBank, T: Timebase> ClockTree<'a, R, T> {
    pub fn oscillator(&self, osc: u16) -> &'a Oscillator<'a> {
        &self.table.oscillators[usize::from(osc)]
    }

    /// Frequency the board reported for an oscillator, zero if none.
    pub fn oscillator_hz(&self, osc: u16) -> u32 {
        self.osc_hz[usize::from(osc)]
    }

    fn oscillator_of(&self, id: ClockId) -> Result<&'a Oscillator<'a>, ClkError> {
        match self.clock(id).kind {
            Kind::Osc(o) => Ok(self.oscillator(o.osc)),
            _ => Err(ClkError::InvalidOperation),
        }
    }

    /// Puts an oscillator in bypass. `digital` selects the digital bypass,
    /// which implies analog bypass too. Neither bit is ever cleared here;
    /// bypass is chosen once, with the oscillator off.
    pub fn set_oscillator_bypass(
        &self,
        id: ClockId,
        digital: bool,
        bypass: bool,
    ) -> Result<(), ClkError> {
        let Some(b) = self.oscillator_of(id)?.bypass else {
            return Ok(());
        };
        if digital {
            self.modify(b.offset, 0, 1 << b.digital_bit);
        }
        if bypass || digital {
            self.modify(b.offset, 0, 1 << b.bypass_bit);
        }
        Ok(())
    }

    /// Arms the clock security system. It can't be disarmed short of a reset,
    /// so `false` leaves it as it is.
    pub fn set_oscillator_css(
        &self,
        id: ClockId,
        css: bool,
    ) -> Result<(), ClkError> {
        let Some(c) = self.oscillator_of(id)?.css else {
            return Ok(());
        };
        if css {
            self.modify(c.offset, 0, 1 << c.bit);
        }
        Ok(())
    }

    /// Moves the drive level to `level`, one step at a time. Jumping straight
    /// between the strongest and weakest settings is not allowed.
    pub fn set_oscillator_drive(
        &self,
        id: ClockId,
        level: u8,
    ) -> Result<(), ClkError> {
        let Some(d) = self.oscillator_of(id)?.drive else {
            return Ok(());
        };
        let mask = field_mask(d.shift, d.width);
        let target = u32::from(level);
        if target > mask >> d.shift {
            return Err(ClkError::OutOfRange);
        }

        let mut value = (self.read(d.offset) & mask) >> d.shift;
        while value != target {
            if value > target {
                value -= 1;
            } else {
                value += 1;
            }
            self.modify(d.offset, mask, value << d.shift);
        }
        Ok(())
    }

    /// Waits for an oscillator's ready flag to read as `on`.
    pub fn wait_oscillator_ready(
        &self,
        id: ClockId,
        on: bool,
    ) -> Result<(), ClkError> {
        let osc = self.oscillator_of(id)?;
        let ready = osc.ready.ok_or(ClkError::InvalidOperation)?;
        let r = self.gate_wait_ready(ready, on, OSCRDY_TIMEOUT_US);
        self.note(r)
    }
}
