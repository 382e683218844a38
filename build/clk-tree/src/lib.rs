// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time support for clock trees written down in TOML.
//!
//! A driver's `build.rs` hands its `clock-tree.toml` to [`TreeConfig::load`],
//! which parses and cross-checks it, then writes out the result of
//! [`TreeConfig::render`]: a Rust file holding the `clk_core::ClockTable`
//! statics, id constants for every named thing in the table, and the board's
//! bring-up plan. The driver `include!`s that file.
//!
//! Everything in the file is referred to by name; indices are assigned in
//! file order.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

mod check;
mod codegen;

/// Environment variable that points a build at a different clock-tree file.
pub const CONFIG_ENV: &str = "CLOCK_TREE_CONFIG";

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TreeConfig {
    /// Distance from a set register to its clear twin.
    #[serde(default = "default_clear_offset")]
    pub clear_offset: u32,
    #[serde(default)]
    pub oscillators: IndexMap<String, OscillatorConfig>,
    #[serde(default)]
    pub gates: IndexMap<String, GateConfig>,
    /// Divider lookup tables, as `[value, divisor]` pairs.
    #[serde(default)]
    pub div_tables: IndexMap<String, Vec<(u32, u32)>>,
    #[serde(default)]
    pub dividers: IndexMap<String, DividerConfig>,
    #[serde(default)]
    pub muxes: IndexMap<String, MuxConfig>,
    pub clocks: IndexMap<String, ClockConfig>,
    #[serde(default)]
    pub board: BoardConfig,
}

fn default_clear_offset() -> u32 {
    4
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OscillatorConfig {
    pub gate: Option<String>,
    pub ready: Option<String>,
    pub bypass: Option<BypassConfig>,
    pub css: Option<CssConfig>,
    pub drive: Option<DriveConfig>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BypassConfig {
    pub offset: u32,
    pub bypass_bit: u8,
    pub digital_bit: u8,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CssConfig {
    pub offset: u32,
    pub bit: u8,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DriveConfig {
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
    pub default: u8,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GateConfig {
    pub offset: u32,
    pub bit: u8,
    #[serde(default)]
    pub set_clr: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DividerConfig {
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
    #[serde(default)]
    pub flags: Vec<DivFlag>,
    pub table: Option<String>,
    pub ready_bit: Option<u8>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DivFlag {
    OneBased,
    PowerOfTwo,
    ReadOnly,
    MaxAtZero,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MuxConfig {
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
    /// Candidate clocks, in selector order.
    pub parents: Vec<String>,
    pub ready_bit: Option<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClockConfig {
    pub binding: Option<u32>,
    /// Fixed parent clock.
    pub parent: Option<String>,
    /// Mux choosing the parent at runtime.
    pub mux: Option<String>,
    #[serde(default)]
    pub flags: Vec<ClockFlag>,
    pub kind: KindConfig,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockFlag {
    Critical,
    IgnoreUnused,
    SetRateParent,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub enum KindConfig {
    FixedRate(u32),
    /// Names an entry in `oscillators`.
    Osc(String),
    Pll { model: PllModel, base: u32 },
    Mux,
    Divider(String),
    Gate(String),
    FixedFactor { mult: u32, div: u32 },
    Composite { gate: String, div: String },
    Timer { apbdiv: u32, timpre: u32 },
}

impl KindConfig {
    /// Root kinds produce a clock; everything else needs one from upstream.
    pub fn is_root(&self) -> bool {
        matches!(self, KindConfig::FixedRate(_) | KindConfig::Osc(_))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PllModel {
    Pll800,
    Pll1600,
    Pll2000,
}

///////////////////////////////////////////////////////////////////////////////
// Board bring-up settings.

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BoardConfig {
    /// Keyed by oscillator name.
    #[serde(default)]
    pub oscillators: IndexMap<String, BoardOscConfig>,
    /// Divider name to raw field value.
    #[serde(default)]
    pub dividers: IndexMap<String, u32>,
    /// Keyed by PLL clock name.
    #[serde(default)]
    pub plls: IndexMap<String, BoardPllConfig>,
    /// Applied in order, except that deferred entries go last.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BoardOscConfig {
    pub frequency: u32,
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub digital_bypass: bool,
    #[serde(default)]
    pub css: bool,
    pub drive: Option<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BoardPllConfig {
    /// Reference clock, by name; must be a candidate of the PLL's mux.
    pub source: String,
    pub divm: u32,
    pub divn: u32,
    #[serde(default)]
    pub frac: u32,
    /// P, Q and R divider field values.
    pub outputs: [u32; 3],
    pub csg: Option<CsgConfig>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CsgConfig {
    pub mod_per: u32,
    pub inc_step: u32,
    pub sscg_mode: u32,
}

/// One source selection. Exactly one of `mux` and `clock` is given.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SourceConfig {
    pub mux: Option<String>,
    pub clock: Option<String>,
    /// The candidate to select.
    pub parent: String,
    /// For clock entries: leave the clock running afterwards, or stop it.
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// For clock entries: leave the clock alone if it's already running.
    #[serde(default)]
    pub skip_if_enabled: bool,
    /// Apply after every non-deferred entry, so downstream clocks have been
    /// moved off this source before it changes.
    #[serde(default)]
    pub deferred: bool,
}

fn default_enable() -> bool {
    true
}

///////////////////////////////////////////////////////////////////////////////

impl TreeConfig {
    /// Parses and checks a clock tree.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("loading {}", path.display()))
    }

    /// Produces the formatted Rust source for this tree.
    pub fn render(&self) -> Result<String> {
        let tokens = self.generate()?;
        let file = syn::parse2::<syn::File>(tokens)
            .context("generated code does not parse")?;
        Ok(prettyplease::unparse(&file))
    }

    pub(crate) fn clock_index(&self, name: &str) -> Result<u16> {
        index_of(&self.clocks, "clock", name)
    }

    pub(crate) fn mux_index(&self, name: &str) -> Result<u16> {
        index_of(&self.muxes, "mux", name)
    }

    pub(crate) fn divider_index(&self, name: &str) -> Result<u16> {
        index_of(&self.dividers, "divider", name)
    }

    pub(crate) fn gate_index(&self, name: &str) -> Result<u16> {
        index_of(&self.gates, "gate", name)
    }

    pub(crate) fn oscillator_index(&self, name: &str) -> Result<u16> {
        index_of(&self.oscillators, "oscillator", name)
    }

    /// The clock driven by oscillator `name`.
    pub(crate) fn oscillator_clock(&self, name: &str) -> Result<u16> {
        let i = self
            .clocks
            .values()
            .position(|c| matches!(&c.kind, KindConfig::Osc(o) if o == name))
            .ok_or_else(|| {
                anyhow::anyhow!("no clock is driven by oscillator {name}")
            })?;
        Ok(i as u16)
    }

    /// Position of `parent` among the candidates of mux `mux`.
    pub(crate) fn selector(&self, mux: &str, parent: &str) -> Result<u32> {
        let m = self
            .muxes
            .get(mux)
            .ok_or_else(|| anyhow::anyhow!("unknown mux {mux}"))?;
        let sel = m.parents.iter().position(|p| p == parent).ok_or_else(
            || anyhow::anyhow!("{parent} is not a candidate of mux {mux}"),
        )?;
        Ok(sel as u32)
    }
}

fn index_of<T>(map: &IndexMap<String, T>, what: &str, name: &str) -> Result<u16> {
    match map.get_full(name) {
        Some((i, _, _)) => Ok(i as u16),
        None => anyhow::bail!("unknown {what} {name}"),
    }
}
