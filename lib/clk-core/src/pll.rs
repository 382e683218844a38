// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! STM32MP1-family PLLs.
//!
//! Each PLL has a block of five registers starting at its control register:
//!
//! | offset | register | contents                                   |
//! |--------|----------|--------------------------------------------|
//! | +0     | CR       | on/ready, spread spectrum, output enables  |
//! | +4     | CFGR1    | DIVN, DIVM, IFRGE                          |
//! | +8     | CFGR2    | DIVP, DIVQ, DIVR                           |
//! | +12    | FRACR    | FRACV and its latch enable                 |
//! | +16    | CSGR     | spread-spectrum modulation                 |
//!
//! The VCO runs at `Fref * ((DIVN + 1) + FRACV / 2^13) / (DIVM + 1)`, with the
//! fractional part only taking effect once FRACLE is set.

use crate::ops::{saturate, ClockOps};
use crate::regs::{field_mask, RegisterBank, Timebase, PLLRDY_TIMEOUT_US};
use crate::{ClkError, ClockId, ClockTree, Kind, Trace};

pub const CR: u32 = 0;
pub const CFGR1: u32 = 4;
pub const CFGR2: u32 = 8;
pub const FRACR: u32 = 12;
pub const CSGR: u32 = 16;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct PllCr: u32 {
        const PLLON = 1 << 0;
        const PLLRDY = 1 << 1;
        const SSCG_CTRL = 1 << 2;
        const DIVPEN = 1 << 4;
        const DIVQEN = 1 << 5;
        const DIVREN = 1 << 6;
    }
}

const OUTPUTS: PllCr =
    PllCr::DIVPEN.union(PllCr::DIVQEN).union(PllCr::DIVREN);

const DIVN_MASK: u32 = field_mask(0, 9);
const DIVM_SHIFT: u8 = 16;
const DIVM_MASK: u32 = field_mask(DIVM_SHIFT, 6);
const IFRGE: u32 = 1 << 24;

const DIVQ_SHIFT: u8 = 8;
const DIVR_SHIFT: u8 = 16;
const DIVPQR_WIDTH: u8 = 7;

const FRACV_SHIFT: u8 = 3;
const FRACV_MASK: u32 = field_mask(FRACV_SHIFT, 13);
const FRACLE: u32 = 1 << 16;

const MOD_PER_MASK: u32 = field_mask(0, 13);
const SSCG_MODE_SHIFT: u8 = 15;
const SSCG_MODE_MASK: u32 = field_mask(SSCG_MODE_SHIFT, 1);
const INC_STEP_SHIFT: u8 = 16;
const INC_STEP_MASK: u32 = field_mask(INC_STEP_SHIFT, 15);

static_assertions::const_assert_eq!(FRACV_MASK, 0x0000_fff8);
static_assertions::const_assert_eq!(INC_STEP_MASK, 0x7fff_0000);

/// PLL flavors, named for their maximum VCO frequency in MHz. They differ in
/// the reference frequency they accept.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PllKind {
    Pll800,
    Pll1600,
    Pll2000,
}

impl PllKind {
    /// Accepted reference clock window, in Hz, inclusive.
    pub const fn refclk_range(self) -> (u32, u32) {
        match self {
            PllKind::Pll800 => (4_000_000, 16_000_000),
            PllKind::Pll1600 | PllKind::Pll2000 => (8_000_000, 16_000_000),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Pll {
    pub kind: PllKind,
    /// Offset of this PLL's CR register.
    pub base: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Csg {
    pub mod_per: u32,
    pub inc_step: u32,
    pub sscg_mode: u32,
}

/// Board-supplied settings for one PLL.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PllConfig {
    /// Selector index of the reference clock in the PLL's source mux.
    pub source: u32,
    pub divm: u32,
    pub divn: u32,
    pub frac: u32,
    /// P, Q and R output dividers, as register values.
    pub outputs: [u32; 3],
    pub csg: Option<Csg>,
}

impl Pll {
    fn is_on<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> bool {
        PllCr::from_bits_retain(tree.read(self.base + CR))
            .contains(PllCr::PLLON)
    }

    fn start<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        if self.is_on(tree) {
            return Ok(());
        }

        // Outputs stay off until the caller asks for them; SSCG_CTRL is left
        // as configured.
        tree.modify(self.base + CR, OUTPUTS.bits(), PllCr::PLLON.bits());
        tree.wait_bits(
            self.base + CR,
            PllCr::PLLRDY.bits(),
            PllCr::PLLRDY.bits(),
            PLLRDY_TIMEOUT_US,
        )
    }

    fn stop<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        if !self.is_on(tree) {
            return Ok(());
        }

        tree.modify(self.base + CR, OUTPUTS.bits(), 0);
        tree.modify(self.base + CR, PllCr::PLLON.bits(), 0);
        tree.wait_bits(
            self.base + CR,
            PllCr::PLLRDY.bits(),
            0,
            PLLRDY_TIMEOUT_US,
        )
    }

    /// Computes the CFGR1 value for `cfg` given the reference frequency,
    /// checking that the divided reference is in range for this PLL.
    pub fn cfgr1(&self, parent_hz: u32, cfg: &PllConfig) -> Result<u32, ClkError> {
        let refclk = parent_hz / (cfg.divm + 1);
        let (min, max) = self.kind.refclk_range();
        if refclk < min || refclk > max {
            return Err(ClkError::OutOfRange);
        }

        let mut value = 0;
        if self.kind == PllKind::Pll800 && refclk >= 8_000_000 {
            value |= IFRGE;
        }
        value |= cfg.divn & DIVN_MASK;
        value |= (cfg.divm << DIVM_SHIFT) & DIVM_MASK;
        Ok(value)
    }

    pub fn cfgr2(cfg: &PllConfig) -> u32 {
        let [p, q, r] = cfg.outputs;
        (p & field_mask(0, DIVPQR_WIDTH))
            | ((q << DIVQ_SHIFT) & field_mask(DIVQ_SHIFT, DIVPQR_WIDTH))
            | ((r << DIVR_SHIFT) & field_mask(DIVR_SHIFT, DIVPQR_WIDTH))
    }

    pub fn csgr(csg: &Csg) -> u32 {
        (csg.mod_per & MOD_PER_MASK)
            | ((csg.inc_step << INC_STEP_SHIFT) & INC_STEP_MASK)
            | ((csg.sscg_mode << SSCG_MODE_SHIFT) & SSCG_MODE_MASK)
    }
}

/// VCO frequency for the given register contents.
pub fn vco_hz(parent_hz: u32, cfgr1: u32, fracr: u32) -> u32 {
    let divm = u64::from((cfgr1 & DIVM_MASK) >> DIVM_SHIFT);
    let divn = u64::from(cfgr1 & DIVN_MASK);
    let prate = u64::from(parent_hz);

    let hz = if fracr & FRACLE != 0 {
        let fracv = u64::from((fracr & FRACV_MASK) >> FRACV_SHIFT);
        let numerator = prate * (((divn + 1) << 13) + fracv);
        numerator / ((divm + 1) << 13)
    } else {
        prate * (divn + 1) / (divm + 1)
    };
    saturate(hz)
}

impl ClockOps for Pll {
    fn recalc_rate<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
        parent_hz: u32,
    ) -> Option<u32> {
        let cfgr1 = tree.read(self.base + CFGR1);
        let fracr = tree.read(self.base + FRACR);
        Some(vco_hz(parent_hz, cfgr1, fracr))
    }

    fn enable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        self.start(tree)
    }

    fn disable<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Result<(), ClkError> {
        self.stop(tree)
    }

    fn is_enabled<R: RegisterBank, T: Timebase>(
        &self,
        tree: &ClockTree<'_, R, T>,
    ) -> Option<bool> {
        Some(self.is_on(tree))
    }
}

impl<R: RegisterBank, T: Timebase> ClockTree<'_, R, T> {
    /// Reprograms a PLL from scratch: source, VCO, outputs, optional spread
    /// spectrum, then locks it and turns on its P, Q and R outputs.
    ///
    /// This goes straight to the hardware and does not touch reference
    /// counts; it is meant for bring-up, before consumers hold references.
    pub fn configure_pll(
        &self,
        id: ClockId,
        cfg: &PllConfig,
    ) -> Result<(), ClkError> {
        let r = self.configure_pll_inner(id, cfg);
        self.note(r)
    }

    fn configure_pll_inner(
        &self,
        id: ClockId,
        cfg: &PllConfig,
    ) -> Result<(), ClkError> {
        let Kind::Pll(pll) = self.clock(id).kind else {
            return Err(ClkError::InvalidOperation);
        };

        self.set_parent_by_index(id, cfg.source)?;
        pll.stop(self)?;

        let cfgr1 = pll.cfgr1(self.get_parent_rate(id)?, cfg)?;
        self.write(pll.base + CFGR1, cfgr1);

        // The fractional value must be loaded before it is latched in.
        self.write(pll.base + FRACR, 0);
        self.write(pll.base + FRACR, (cfg.frac << FRACV_SHIFT) & FRACV_MASK);
        self.modify(pll.base + FRACR, 0, FRACLE);

        self.write(pll.base + CFGR2, Pll::cfgr2(cfg));

        if let Some(csg) = &cfg.csg {
            self.write(pll.base + CSGR, Pll::csgr(csg));
            self.modify(pll.base + CR, 0, PllCr::SSCG_CTRL.bits());
        }

        pll.start(self)?;
        self.modify(pll.base + CR, 0, OUTPUTS.bits());

        self.trace_event(Trace::PllConfigured(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_vco() {
        // 24 MHz / 2 * 81
        let cfgr1 = (1 << DIVM_SHIFT) | 80;
        assert_eq!(vco_hz(24_000_000, cfgr1, 0), 972_000_000);
    }

    #[test]
    fn fractional_vco() {
        // Half a step of DIVN on top: 24 MHz / 2 * 81.5
        let cfgr1 = (1 << DIVM_SHIFT) | 80;
        let fracr = FRACLE | (4096 << FRACV_SHIFT);
        assert_eq!(vco_hz(24_000_000, cfgr1, fracr), 978_000_000);
    }

    #[test]
    fn fraction_ignored_until_latched() {
        let cfgr1 = (1 << DIVM_SHIFT) | 80;
        let fracr = 4096 << FRACV_SHIFT;
        assert_eq!(vco_hz(24_000_000, cfgr1, fracr), 972_000_000);
    }

    #[test]
    fn wide_intermediate() {
        // prate * ((divn + 1) << 13) overflows 32 bits long before the
        // result does.
        let cfgr1 = DIVN_MASK;
        assert_eq!(vco_hz(8_000_000, cfgr1, FRACLE), 8_000_000 * 512);
    }

    #[test]
    fn vco_saturates() {
        // 48 MHz * 512 doesn't fit in 32 bits; it must not wrap.
        assert_eq!(vco_hz(48_000_000, DIVN_MASK, 0), u32::MAX);
        assert_eq!(vco_hz(u32::MAX, DIVN_MASK, FRACLE), u32::MAX);
    }

    #[test]
    fn refclk_window() {
        let pll = Pll {
            kind: PllKind::Pll1600,
            base: 0,
        };
        let cfg = PllConfig {
            divm: 3,
            divn: 50,
            ..Default::default()
        };
        // 24 MHz / 4 = 6 MHz, too slow for this PLL type.
        assert_eq!(pll.cfgr1(24_000_000, &cfg), Err(ClkError::OutOfRange));

        let small = Pll {
            kind: PllKind::Pll800,
            ..pll
        };
        assert_eq!(
            small.cfgr1(24_000_000, &cfg),
            Ok((3 << DIVM_SHIFT) | 50)
        );
    }

    #[test]
    fn ifrge_for_fast_reference() {
        let pll = Pll {
            kind: PllKind::Pll800,
            base: 0,
        };
        let cfg = PllConfig {
            divm: 1,
            divn: 40,
            ..Default::default()
        };
        let v = pll.cfgr1(24_000_000, &cfg).unwrap();
        assert_ne!(v & IFRGE, 0);
    }

    #[test]
    fn output_packing() {
        let cfg = PllConfig {
            outputs: [1, 2, 3],
            ..Default::default()
        };
        assert_eq!(Pll::cfgr2(&cfg), 1 | (2 << 8) | (3 << 16));
    }
}
