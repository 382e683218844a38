// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board bring-up.
//!
//! Out of reset the MP13 runs everything from HSI. [`bring_up`] starts the
//! board's oscillators, parks the bus clocks on HSI while the dividers and
//! PLLs are reprogrammed underneath them, then applies the board's source
//! selections and turns on every critical clock.

use clk_core::{ClkError, ClockId, ClockOps, ClockTree, PllConfig};
use clk_core::{RegisterBank, Timebase, CLKSRC_TIMEOUT_US};

use crate::{clk, HSIDIVRDY, HSIDIV_MASK, MAX_HSI_HZ, RCC_HSICFGR, RCC_OCRDYR};

/// A board's clock settings, generated from the `board` section of the tree
/// description.
pub struct Board {
    pub oscillators: &'static [OscSettings],
    /// Divider index and raw field value.
    pub dividers: &'static [(u16, u32)],
    pub plls: &'static [(ClockId, PllConfig)],
    pub sources: &'static [Source],
}

#[derive(Copy, Clone, Debug)]
pub struct OscSettings {
    pub clock: ClockId,
    pub bypass: bool,
    pub digital_bypass: bool,
    pub css: bool,
    /// Drive level; `None` leaves the oscillator's default.
    pub drive: Option<u8>,
}

#[derive(Copy, Clone, Debug)]
pub struct Source {
    pub target: Target,
    /// Selector value to program.
    pub sel: u32,
    /// Applied after all the other entries.
    pub deferred: bool,
}

#[derive(Copy, Clone, Debug)]
pub enum Target {
    /// A mux with no clock of its own in the tree.
    Mux(u16),
    /// A muxed clock, which is switched and then started or stopped.
    Clock {
        clock: ClockId,
        enable: bool,
        skip_if_enabled: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, counters::Count)]
enum Step {
    Oscillators,
    BusOnHsi,
    HsiDiv,
    Dividers,
    Plls,
    Sources,
    SourceSkipped,
    Critical,
    Done,
}

counters::counters!(STEPS, Step);

impl Board {
    fn oscillator(&self, clock: ClockId) -> Option<&OscSettings> {
        self.oscillators.iter().find(|o| o.clock == clock)
    }
}

/// Moves the SoC from reset clocking onto `board`'s configuration.
///
/// Stops at the first failure; whatever was programmed up to that point
/// stays programmed.
pub fn bring_up<R: RegisterBank, T: Timebase>(
    tree: &ClockTree<'_, R, T>,
    board: &Board,
) -> Result<(), ClkError> {
    counters::count!(STEPS, Step::Oscillators);
    start_oscillators(tree, board)?;

    // Nothing below the bus clocks may depend on a PLL while it's being
    // reprogrammed.
    counters::count!(STEPS, Step::BusOnHsi);
    for bus in [clk::CK_MPU, clk::CK_AXI, clk::CK_MLAHB] {
        tree.set_parent(bus, clk::CK_HSI)?;
    }

    counters::count!(STEPS, Step::HsiDiv);
    set_hsidiv(tree, tree.get_rate(clk::CK_HSI)?)?;

    counters::count!(STEPS, Step::Dividers);
    for &(div, value) in board.dividers {
        tree.set_div(div, value)?;
    }

    counters::count!(STEPS, Step::Plls);
    for (pll, cfg) in board.plls {
        tree.configure_pll(*pll, cfg)?;
    }

    // LSE was started without waiting; it has had the PLL lock times to
    // come up.
    if tree.get_rate(clk::CK_LSE)? != 0 {
        tree.wait_oscillator_ready(clk::CK_LSE, true)?;
    }

    counters::count!(STEPS, Step::Sources);
    let now = board.sources.iter().filter(|s| !s.deferred);
    let later = board.sources.iter().filter(|s| s.deferred);
    for s in now.chain(later) {
        apply_source(tree, s)?;
    }

    if let Some(lse) = board.oscillator(clk::CK_LSE) {
        tree.set_oscillator_css(clk::CK_LSE, lse.css)?;
    }

    counters::count!(STEPS, Step::Critical);
    tree.enable_critical_clocks()?;

    counters::count!(STEPS, Step::Done);
    Ok(())
}

fn start_oscillators<R: RegisterBank, T: Timebase>(
    tree: &ClockTree<'_, R, T>,
    board: &Board,
) -> Result<(), ClkError> {
    if tree.get_rate(clk::CK_HSE)? != 0 {
        if let Some(hse) = board.oscillator(clk::CK_HSE) {
            tree.set_oscillator_bypass(
                clk::CK_HSE,
                hse.digital_bypass,
                hse.bypass,
            )?;
        }
        tree.enable(clk::CK_HSE)?;
        if let Some(hse) = board.oscillator(clk::CK_HSE) {
            tree.set_oscillator_css(clk::CK_HSE, hse.css)?;
        }
    }

    // LSE sits in the backup domain and may have survived the reset, in
    // which case its bypass and drive can no longer be changed.
    if tree.get_rate(clk::CK_LSE)? != 0 && !tree.is_enabled(clk::CK_LSE) {
        let desc = tree.oscillator(crate::osc::CLK_LSE);
        if let Some(lse) = board.oscillator(clk::CK_LSE) {
            tree.set_oscillator_bypass(
                clk::CK_LSE,
                lse.digital_bypass,
                lse.bypass,
            )?;
            let drive = lse.drive.or(desc.drive.map(|d| d.default));
            if let Some(level) = drive {
                tree.set_oscillator_drive(clk::CK_LSE, level)?;
            }
        }
        if let Some(gate) = desc.gate {
            tree.gate_enable(gate);
        }
    }

    tree.enable(clk::CK_LSI)?;
    tree.enable(clk::CK_CSI)?;
    Ok(())
}

/// Programs HSIDIV so HSI runs at `hz`, which has to be one of the
/// power-of-two fractions of 64 MHz the divider offers.
fn set_hsidiv<R: RegisterBank, T: Timebase>(
    tree: &ClockTree<'_, R, T>,
    hz: u32,
) -> Result<(), ClkError> {
    let div = (0..=HSIDIV_MASK)
        .find(|&n| MAX_HSI_HZ >> n == hz)
        .ok_or(ClkError::OutOfRange)?;
    if tree.read(RCC_HSICFGR) & HSIDIV_MASK == div {
        return Ok(());
    }
    tree.modify(RCC_HSICFGR, HSIDIV_MASK, div);
    tree.wait_bits(RCC_OCRDYR, HSIDIVRDY, HSIDIVRDY, CLKSRC_TIMEOUT_US)
}

fn apply_source<R: RegisterBank, T: Timebase>(
    tree: &ClockTree<'_, R, T>,
    source: &Source,
) -> Result<(), ClkError> {
    match source.target {
        Target::Mux(mux) => tree.set_mux(mux, source.sel),
        Target::Clock {
            clock,
            enable,
            skip_if_enabled,
        } => {
            if skip_if_enabled && tree.is_enabled(clock) {
                counters::count!(STEPS, Step::SourceSkipped);
                return Ok(());
            }
            tree.set_parent_by_index(clock, source.sel)?;
            let kind = tree.clock(clock).kind;
            if enable {
                kind.enable(tree)
            } else {
                kind.disable(tree)
            }
        }
    }
}
