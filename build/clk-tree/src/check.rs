// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-checks on a parsed tree. Anything the runtime table validation
//! would panic on should be caught here first, with a better message.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

use crate::{DivFlag, KindConfig, TreeConfig};

/// Matches `clk_core::MAX_OSCILLATORS`.
const MAX_OSCILLATORS: usize = 8;

fn check_field(what: &str, shift: u8, width: u8) -> Result<()> {
    if width == 0 || u32::from(shift) + u32::from(width) > 32 {
        bail!("{what}: field at bit {shift}, width {width} doesn't fit in 32 bits");
    }
    Ok(())
}

fn check_bit(what: &str, bit: u8) -> Result<()> {
    if bit >= 32 {
        bail!("{what}: bit {bit} out of range");
    }
    Ok(())
}

/// Rejects `value` if it needs more than `width` bits.
fn check_value(what: &str, value: u32, width: u8) -> Result<()> {
    if u64::from(value) >= 1u64 << width {
        bail!("{what}: {value} doesn't fit in {width} bits");
    }
    Ok(())
}

impl TreeConfig {
    pub(crate) fn check(&self) -> Result<()> {
        if self.clocks.len() > usize::from(u16::MAX) {
            bail!("too many clocks ({})", self.clocks.len());
        }
        if self.oscillators.len() > MAX_OSCILLATORS {
            bail!(
                "{} oscillators, at most {MAX_OSCILLATORS} are supported",
                self.oscillators.len()
            );
        }

        for (name, g) in &self.gates {
            check_bit(&format!("gate {name}"), g.bit)?;
        }
        for (name, t) in &self.div_tables {
            if t.is_empty() {
                bail!("divider table {name} is empty");
            }
        }
        for (name, d) in &self.dividers {
            let what = format!("divider {name}");
            check_field(&what, d.shift, d.width)?;
            if let Some(b) = d.ready_bit {
                check_bit(&what, b)?;
            }
            if let Some(t) = &d.table {
                if !self.div_tables.contains_key(t) {
                    bail!("{what}: unknown divider table {t}");
                }
            }
        }
        for (name, m) in &self.muxes {
            self.check_mux(name, m)?;
        }
        for (name, o) in &self.oscillators {
            let what = format!("oscillator {name}");
            if let Some(g) = &o.gate {
                self.gate_index(g).context(what.clone())?;
                if o.ready.is_none() {
                    bail!("{what}: gated oscillators need a ready flag");
                }
            }
            if let Some(g) = &o.ready {
                self.gate_index(g).context(what.clone())?;
            }
            if let Some(b) = o.bypass {
                check_bit(&what, b.bypass_bit)?;
                check_bit(&what, b.digital_bit)?;
            }
            if let Some(c) = o.css {
                check_bit(&what, c.bit)?;
            }
            if let Some(d) = o.drive {
                check_field(&what, d.shift, d.width)?;
                check_value(&what, d.default.into(), d.width)?;
            }
        }

        let mut bindings = BTreeMap::new();
        let mut driven = BTreeMap::new();
        for (name, c) in &self.clocks {
            let what = format!("clock {name}");
            if let Some(b) = c.binding {
                if let Some(other) = bindings.insert(b, name) {
                    bail!("{what}: binding {b} already used by {other}");
                }
            }
            if let KindConfig::Osc(o) = &c.kind {
                if let Some(other) = driven.insert(o, name) {
                    bail!("{what}: oscillator {o} already drives {other}");
                }
            }
            self.check_clock(c).context(what)?;
        }

        self.check_cycles()?;
        self.check_board().context("board")?;
        Ok(())
    }

    fn check_mux(&self, name: &str, m: &crate::MuxConfig) -> Result<()> {
        let what = format!("mux {name}");
        check_field(&what, m.shift, m.width)?;
        if let Some(b) = m.ready_bit {
            check_bit(&what, b)?;
        }
        if m.parents.is_empty() {
            bail!("{what} has no parents");
        }
        if m.parents.len() as u64 > 1u64 << m.width {
            bail!(
                "{what}: {} parents can't be selected with {} bits",
                m.parents.len(),
                m.width
            );
        }
        for p in &m.parents {
            self.clock_index(p).context(what.clone())?;
        }
        Ok(())
    }

    fn check_clock(&self, c: &crate::ClockConfig) -> Result<()> {
        match (&c.parent, &c.mux) {
            (Some(_), Some(_)) => bail!("has both a parent and a mux"),
            (Some(p), None) => {
                self.clock_index(p)?;
            }
            (None, Some(m)) => {
                self.mux_index(m)?;
            }
            (None, None) if !c.kind.is_root() => {
                bail!("needs a parent or a mux")
            }
            (None, None) => (),
        }
        if c.kind.is_root() && (c.parent.is_some() || c.mux.is_some()) {
            bail!("is a root and can't have a parent");
        }

        match &c.kind {
            KindConfig::FixedRate(_) | KindConfig::Timer { .. } => (),
            KindConfig::Osc(o) => {
                self.oscillator_index(o)?;
            }
            KindConfig::Pll { .. } | KindConfig::Mux => {
                if c.mux.is_none() {
                    bail!("selects its input and needs a mux");
                }
            }
            KindConfig::Divider(d) => {
                self.divider_index(d)?;
            }
            KindConfig::Gate(g) => {
                self.gate_index(g)?;
            }
            KindConfig::FixedFactor { div, .. } => {
                if *div == 0 {
                    bail!("division by zero");
                }
            }
            KindConfig::Composite { gate, div } => {
                self.gate_index(gate)?;
                self.divider_index(div)?;
            }
        }
        Ok(())
    }

    /// Every clock `i` can be fed from, fixed or through its mux.
    fn upstream(&self, i: usize) -> Vec<usize> {
        let Some((_, c)) = self.clocks.get_index(i) else {
            return vec![];
        };
        if let Some(p) = &c.parent {
            self.clocks.get_full(p).map(|(j, _, _)| j).into_iter().collect()
        } else if let Some(m) = c.mux.as_ref().and_then(|m| self.muxes.get(m)) {
            m.parents
                .iter()
                .filter_map(|p| self.clocks.get_full(p).map(|(j, _, _)| j))
                .collect()
        } else {
            vec![]
        }
    }

    /// Depth-first search over every parent a clock could ever have.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Copy, Clone, Eq, PartialEq)]
        enum Mark {
            New,
            Open,
            Done,
        }

        fn visit(
            tree: &TreeConfig,
            i: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Result<()> {
            match marks[i] {
                Mark::Done => return Ok(()),
                Mark::Open => {
                    let start =
                        path.iter().position(|&j| j == i).unwrap_or_default();
                    let names: Vec<&str> = path[start..]
                        .iter()
                        .chain(std::iter::once(&i))
                        .filter_map(|&j| tree.clocks.get_index(j))
                        .map(|(n, _)| n.as_str())
                        .collect();
                    bail!("clock cycle: {}", names.join(" <- "));
                }
                Mark::New => (),
            }
            marks[i] = Mark::Open;
            path.push(i);
            for j in tree.upstream(i) {
                visit(tree, j, marks, path)?;
            }
            path.pop();
            marks[i] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.clocks.len()];
        let mut path = vec![];
        for i in 0..self.clocks.len() {
            visit(self, i, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn check_board(&self) -> Result<()> {
        let board = &self.board;

        for (name, o) in &board.oscillators {
            let what = format!("oscillator {name}");
            self.oscillator_clock(name)?;
            if let Some(level) = o.drive {
                let drive = self.oscillators.get(name).and_then(|o| o.drive);
                let Some(d) = drive else {
                    bail!("{what} has no drive control");
                };
                check_value(&what, level.into(), d.width)?;
            }
        }

        for (name, &value) in &board.dividers {
            let what = format!("divider {name}");
            let d = self
                .dividers
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("unknown {what}"))?;
            if d.flags.contains(&DivFlag::ReadOnly) {
                bail!("{what} is read-only");
            }
            check_value(&what, value, d.width)?;
        }

        for (name, p) in &board.plls {
            let what = format!("pll {name}");
            let c = self
                .clocks
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("unknown {what}"))?;
            if !matches!(c.kind, KindConfig::Pll { .. }) {
                bail!("{what} is not a PLL");
            }
            let mux = c.mux.as_deref().unwrap_or_default();
            self.selector(mux, &p.source).context(what.clone())?;
            check_value(&what, p.divm, 6)?;
            check_value(&what, p.divn, 9)?;
            check_value(&what, p.frac, 13)?;
            for o in p.outputs {
                check_value(&what, o, 7)?;
            }
            if let Some(csg) = p.csg {
                check_value(&what, csg.mod_per, 13)?;
                check_value(&what, csg.inc_step, 15)?;
                check_value(&what, csg.sscg_mode, 1)?;
            }
        }

        for (n, s) in board.sources.iter().enumerate() {
            let what = format!("source {n}");
            match (&s.mux, &s.clock) {
                (Some(m), None) => {
                    self.selector(m, &s.parent).context(what)?;
                }
                (None, Some(name)) => {
                    let c = self
                        .clocks
                        .get(name)
                        .ok_or_else(|| anyhow::anyhow!("{what}: unknown clock {name}"))?;
                    let Some(m) = &c.mux else {
                        bail!("{what}: clock {name} has no mux");
                    };
                    self.selector(m, &s.parent).context(what)?;
                }
                _ => bail!("{what} needs exactly one of mux and clock"),
            }
        }
        Ok(())
    }
}
