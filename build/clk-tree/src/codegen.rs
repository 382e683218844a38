// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code generation.
//!
//! Config types that stand alone implement `quote::ToTokens` directly. The
//! ones that refer to other entries by name need the whole tree to resolve
//! those names to indices, so they're turned into tokens by methods on
//! `TreeConfig` instead.
//!
//! The generated code names core types by their full `clk_core::` path and
//! the board types by `crate::board::`, so it can be included anywhere in a
//! driver crate.

use anyhow::{Context, Result};
use convert_case::{Case, Casing};
use proc_macro2::TokenStream;
use quote::{format_ident, quote, ToTokens, TokenStreamExt};
use std::collections::BTreeSet;

use crate::{
    BypassConfig, ClockConfig, ClockFlag, CssConfig, CsgConfig, DivFlag,
    DriveConfig, GateConfig, KindConfig, PllModel, TreeConfig,
};

/// `clk-hse` becomes `CLK_HSE`, `pll1-p` becomes `PLL1_P`. Only dashes
/// separate words.
pub(crate) fn const_ident(name: &str) -> Result<syn::Ident> {
    let s = name.from_case(Case::Kebab).to_case(Case::UpperSnake);
    syn::parse_str(&s).with_context(|| format!("{name} can't be a Rust name"))
}

fn opt<T: ToTokens>(v: Option<T>) -> TokenStream {
    match v {
        Some(v) => quote! { Some(#v) },
        None => quote! { None },
    }
}

/// `pub mod #module { pub const NAME: #ty = #ty(index); ... }`, one entry per
/// name, in order.
fn id_module<'a>(
    module: &str,
    names: impl Iterator<Item = &'a String>,
    value: impl Fn(u16) -> TokenStream,
    ty: TokenStream,
) -> Result<TokenStream> {
    let module = format_ident!("{}", module);
    let mut seen = BTreeSet::new();
    let mut consts = vec![];
    for (i, name) in names.enumerate() {
        let ident = const_ident(name)?;
        if !seen.insert(ident.to_string()) {
            anyhow::bail!("{module}: {name} clashes with another name");
        }
        let v = value(i as u16);
        consts.push(quote! { pub const #ident: #ty = #v; });
    }
    Ok(quote! {
        #[allow(dead_code)]
        pub mod #module {
            #( #consts )*
        }
    })
}

impl ToTokens for ClockFlag {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let f = match self {
            ClockFlag::Critical => quote!(CRITICAL),
            ClockFlag::IgnoreUnused => quote!(IGNORE_UNUSED),
            ClockFlag::SetRateParent => quote!(SET_RATE_PARENT),
        };
        tokens.append_all(quote! { clk_core::ClockFlags::#f });
    }
}

impl ToTokens for DivFlag {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let f = match self {
            DivFlag::OneBased => quote!(ONE_BASED),
            DivFlag::PowerOfTwo => quote!(POWER_OF_TWO),
            DivFlag::ReadOnly => quote!(READ_ONLY),
            DivFlag::MaxAtZero => quote!(MAX_AT_ZERO),
        };
        tokens.append_all(quote! { clk_core::DivFlags::#f });
    }
}

impl ToTokens for PllModel {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let m = match self {
            PllModel::Pll800 => quote!(Pll800),
            PllModel::Pll1600 => quote!(Pll1600),
            PllModel::Pll2000 => quote!(Pll2000),
        };
        tokens.append_all(quote! { clk_core::PllKind::#m });
    }
}

impl ToTokens for GateConfig {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let GateConfig {
            offset,
            bit,
            set_clr,
        } = self;
        tokens.append_all(quote! {
            clk_core::Gate {
                offset: #offset,
                bit: #bit,
                set_clr: #set_clr,
            }
        });
    }
}

impl ToTokens for BypassConfig {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let BypassConfig {
            offset,
            bypass_bit,
            digital_bit,
        } = self;
        tokens.append_all(quote! {
            clk_core::Bypass {
                offset: #offset,
                bypass_bit: #bypass_bit,
                digital_bit: #digital_bit,
            }
        });
    }
}

impl ToTokens for CssConfig {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let CssConfig { offset, bit } = self;
        tokens.append_all(quote! {
            clk_core::Css { offset: #offset, bit: #bit }
        });
    }
}

impl ToTokens for DriveConfig {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let DriveConfig {
            offset,
            shift,
            width,
            default,
        } = self;
        tokens.append_all(quote! {
            clk_core::Drive {
                offset: #offset,
                shift: #shift,
                width: #width,
                default: #default,
            }
        });
    }
}

impl ToTokens for CsgConfig {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let CsgConfig {
            mod_per,
            inc_step,
            sscg_mode,
        } = self;
        tokens.append_all(quote! {
            clk_core::Csg {
                mod_per: #mod_per,
                inc_step: #inc_step,
                sscg_mode: #sscg_mode,
            }
        });
    }
}

fn clock_id(i: u16) -> TokenStream {
    quote! { clk_core::ClockId(#i) }
}

impl TreeConfig {
    pub(crate) fn generate(&self) -> Result<TokenStream> {
        let num_clocks = self.clocks.len();

        let ids = [
            id_module(
                "clk",
                self.clocks.keys(),
                clock_id,
                quote!(clk_core::ClockId),
            )?,
            id_module("mux", self.muxes.keys(), |i| quote!(#i), quote!(u16))?,
            id_module("div", self.dividers.keys(), |i| quote!(#i), quote!(u16))?,
            id_module("gate", self.gates.keys(), |i| quote!(#i), quote!(u16))?,
            id_module(
                "osc",
                self.oscillators.keys(),
                |i| quote!(#i),
                quote!(u16),
            )?,
        ];

        let mut bindings = vec![];
        for (name, c) in &self.clocks {
            if let Some(b) = c.binding {
                let ident = const_ident(name)?;
                bindings.push(quote! { pub const #ident: u32 = #b; });
            }
        }

        let mut tables = vec![];
        for (name, entries) in &self.div_tables {
            let ident = format_ident!("DIV_TABLE_{}", const_ident(name)?);
            let len = entries.len();
            let entries = entries.iter().map(|(val, div)| {
                quote! { clk_core::DivEntry { val: #val, div: #div } }
            });
            tables.push(quote! {
                static #ident: [clk_core::DivEntry; #len] = [ #( #entries ),* ];
            });
        }

        let mut muxes = vec![];
        for (name, m) in &self.muxes {
            let ident = format_ident!("MUX_PARENTS_{}", const_ident(name)?);
            let len = m.parents.len();
            let parents = m
                .parents
                .iter()
                .map(|p| Ok(clock_id(self.clock_index(p)?)))
                .collect::<Result<Vec<_>>>()?;
            tables.push(quote! {
                static #ident: [clk_core::ClockId; #len] = [ #( #parents ),* ];
            });

            let (offset, shift, width) = (m.offset, m.shift, m.width);
            let ready_bit = opt(m.ready_bit);
            muxes.push(quote! {
                clk_core::Mux {
                    parents: &#ident,
                    offset: #offset,
                    shift: #shift,
                    width: #width,
                    ready_bit: #ready_bit,
                }
            });
        }

        let mut dividers = vec![];
        for d in self.dividers.values() {
            let (offset, shift, width) = (d.offset, d.shift, d.width);
            let flags = &d.flags;
            let table = match &d.table {
                Some(t) => {
                    let ident = format_ident!("DIV_TABLE_{}", const_ident(t)?);
                    quote! { Some(&#ident) }
                }
                None => quote! { None },
            };
            let ready_bit = opt(d.ready_bit);
            dividers.push(quote! {
                clk_core::Divider {
                    offset: #offset,
                    shift: #shift,
                    width: #width,
                    flags: clk_core::DivFlags::empty() #( .union(#flags) )*,
                    table: #table,
                    ready_bit: #ready_bit,
                }
            });
        }

        let gates = self.gates.values();

        let mut oscillators = vec![];
        for (name, o) in &self.oscillators {
            let gate = opt(o.gate.as_deref().map(|g| self.gate_index(g)).transpose()?);
            let ready =
                opt(o.ready.as_deref().map(|g| self.gate_index(g)).transpose()?);
            let (bypass, css, drive) = (opt(o.bypass), opt(o.css), opt(o.drive));
            oscillators.push(quote! {
                clk_core::Oscillator {
                    name: #name,
                    gate: #gate,
                    ready: #ready,
                    bypass: #bypass,
                    css: #css,
                    drive: #drive,
                }
            });
        }

        let clocks = self
            .clocks
            .iter()
            .map(|(name, c)| {
                self.clock_tokens(name, c)
                    .with_context(|| format!("clock {name}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let (num_muxes, num_dividers, num_gates, num_oscillators) = (
            self.muxes.len(),
            self.dividers.len(),
            self.gates.len(),
            self.oscillators.len(),
        );
        let clear_offset = self.clear_offset;
        let board = self.board_tokens().context("board")?;

        Ok(quote! {
            pub const NUM_CLOCKS: usize = #num_clocks;

            #( #ids )*

            /// Binding ids of the clocks consumers can look up.
            #[allow(dead_code)]
            pub mod binding {
                #( #bindings )*
            }

            #( #tables )*

            static CLOCKS: [clk_core::Clock<'static>; #num_clocks] = [
                #( #clocks ),*
            ];
            static MUXES: [clk_core::Mux<'static>; #num_muxes] = [
                #( #muxes ),*
            ];
            static DIVIDERS: [clk_core::Divider<'static>; #num_dividers] = [
                #( #dividers ),*
            ];
            static GATES: [clk_core::Gate; #num_gates] = [
                #( #gates ),*
            ];
            static OSCILLATORS: [clk_core::Oscillator<'static>; #num_oscillators] = [
                #( #oscillators ),*
            ];

            pub static CLOCK_TABLE: clk_core::ClockTable<'static> =
                clk_core::ClockTable {
                    clocks: &CLOCKS,
                    muxes: &MUXES,
                    dividers: &DIVIDERS,
                    gates: &GATES,
                    oscillators: &OSCILLATORS,
                    clear_offset: #clear_offset,
                };

            #board
        })
    }

    fn clock_tokens(&self, name: &str, c: &ClockConfig) -> Result<TokenStream> {
        let binding = opt(c.binding);
        let parent = match (&c.parent, &c.mux) {
            (Some(p), _) => {
                let id = clock_id(self.clock_index(p)?);
                quote! { clk_core::Parent::Clock(#id) }
            }
            (None, Some(m)) => {
                let m = self.mux_index(m)?;
                quote! { clk_core::Parent::Mux(#m) }
            }
            (None, None) => quote! { clk_core::Parent::Root },
        };
        let flags = &c.flags;

        let kind = match &c.kind {
            KindConfig::FixedRate(hz) => quote! {
                clk_core::Kind::FixedRate(clk_core::FixedRate { hz: #hz })
            },
            KindConfig::Osc(o) => {
                let osc = self.oscillator_index(o)?;
                let gated = self
                    .oscillators
                    .get(o)
                    .is_some_and(|o| o.gate.is_some());
                quote! {
                    clk_core::Kind::Osc(clk_core::Osc { osc: #osc, gated: #gated })
                }
            }
            KindConfig::Pll { model, base } => quote! {
                clk_core::Kind::Pll(clk_core::Pll { kind: #model, base: #base })
            },
            KindConfig::Mux => quote! { clk_core::Kind::Mux },
            KindConfig::Divider(d) => {
                let div = self.divider_index(d)?;
                quote! {
                    clk_core::Kind::Divider(clk_core::DivClock { div: #div })
                }
            }
            KindConfig::Gate(g) => {
                let gate = self.gate_index(g)?;
                quote! {
                    clk_core::Kind::Gate(clk_core::GateClock { gate: #gate })
                }
            }
            KindConfig::FixedFactor { mult, div } => quote! {
                clk_core::Kind::FixedFactor(
                    clk_core::FixedFactor { mult: #mult, div: #div }
                )
            },
            KindConfig::Composite { gate, div } => {
                let gate = self.gate_index(gate)?;
                let div = self.divider_index(div)?;
                quote! {
                    clk_core::Kind::Composite(
                        clk_core::Composite { gate: #gate, div: #div }
                    )
                }
            }
            KindConfig::Timer { apbdiv, timpre } => quote! {
                clk_core::Kind::Timer(
                    clk_core::Timer { apbdiv: #apbdiv, timpre: #timpre }
                )
            },
        };

        Ok(quote! {
            clk_core::Clock {
                name: #name,
                binding: #binding,
                parent: #parent,
                flags: clk_core::ClockFlags::empty() #( .union(#flags) )*,
                kind: #kind,
            }
        })
    }

    /// The board's bring-up plan, plus the oscillator frequency lookup the
    /// tree is initialized with.
    fn board_tokens(&self) -> Result<TokenStream> {
        let board = &self.board;

        let mut freq_arms = vec![];
        let mut oscillators = vec![];
        for (name, o) in &board.oscillators {
            let hz = o.frequency;
            freq_arms.push(quote! { #name => Some(#hz), });

            let clock = clock_id(self.oscillator_clock(name)?);
            let (bypass, digital_bypass, css) =
                (o.bypass, o.digital_bypass, o.css);
            let drive = opt(o.drive);
            oscillators.push(quote! {
                crate::board::OscSettings {
                    clock: #clock,
                    bypass: #bypass,
                    digital_bypass: #digital_bypass,
                    css: #css,
                    drive: #drive,
                }
            });
        }

        let mut dividers = vec![];
        for (name, &value) in &board.dividers {
            let div = self.divider_index(name)?;
            dividers.push(quote! { (#div, #value) });
        }

        let mut plls = vec![];
        for (name, p) in &board.plls {
            let clock = clock_id(self.clock_index(name)?);
            let mux = self
                .clocks
                .get(name)
                .and_then(|c| c.mux.as_deref())
                .unwrap_or_default();
            let source = self.selector(mux, &p.source)?;
            let (divm, divn, frac) = (p.divm, p.divn, p.frac);
            let [po, qo, ro] = p.outputs;
            let csg = opt(p.csg);
            plls.push(quote! {
                (#clock, clk_core::PllConfig {
                    source: #source,
                    divm: #divm,
                    divn: #divn,
                    frac: #frac,
                    outputs: [#po, #qo, #ro],
                    csg: #csg,
                })
            });
        }

        let mut sources = vec![];
        for s in &board.sources {
            let deferred = s.deferred;
            let (target, sel) = match (&s.mux, &s.clock) {
                (Some(m), _) => {
                    let mux = self.mux_index(m)?;
                    (
                        quote! { crate::board::Target::Mux(#mux) },
                        self.selector(m, &s.parent)?,
                    )
                }
                (None, Some(name)) => {
                    let clock = clock_id(self.clock_index(name)?);
                    let mux = self
                        .clocks
                        .get(name)
                        .and_then(|c| c.mux.as_deref())
                        .unwrap_or_default();
                    let (enable, skip_if_enabled) =
                        (s.enable, s.skip_if_enabled);
                    (
                        quote! {
                            crate::board::Target::Clock {
                                clock: #clock,
                                enable: #enable,
                                skip_if_enabled: #skip_if_enabled,
                            }
                        },
                        self.selector(mux, &s.parent)?,
                    )
                }
                (None, None) => anyhow::bail!("source without a target"),
            };
            sources.push(quote! {
                crate::board::Source {
                    target: #target,
                    sel: #sel,
                    deferred: #deferred,
                }
            });
        }

        let (n_osc, n_div, n_pll, n_src) = (
            oscillators.len(),
            dividers.len(),
            plls.len(),
            sources.len(),
        );

        Ok(quote! {
            /// Frequency the board runs oscillator `name` at, if it's used.
            pub fn oscillator_frequency(name: &str) -> Option<u32> {
                match name {
                    #( #freq_arms )*
                    _ => None,
                }
            }

            static BOARD_OSCILLATORS: [crate::board::OscSettings; #n_osc] = [
                #( #oscillators ),*
            ];
            static BOARD_DIVIDERS: [(u16, u32); #n_div] = [
                #( #dividers ),*
            ];
            static BOARD_PLLS: [(clk_core::ClockId, clk_core::PllConfig); #n_pll] = [
                #( #plls ),*
            ];
            static BOARD_SOURCES: [crate::board::Source; #n_src] = [
                #( #sources ),*
            ];

            pub static BOARD: crate::board::Board = crate::board::Board {
                oscillators: &BOARD_OSCILLATORS,
                dividers: &BOARD_DIVIDERS,
                plls: &BOARD_PLLS,
                sources: &BOARD_SOURCES,
            };
        })
    }
}
