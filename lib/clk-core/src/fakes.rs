// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-ins for the RCC and a microsecond clock.
//!
//! `FakeRcc` is plain memory with a few behaviors layered on top: set/clear
//! register pairs, status bits that follow a control bit, status bits that
//! are always or never set. Every write is logged along with the register
//! contents just before it, so tests can check what the hardware looked
//! like at the moment of a particular write.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::regs::{RegisterBank, Timebase};

#[derive(Clone, Debug)]
pub struct Write {
    pub offset: u32,
    pub value: u32,
    /// Raw register contents before this write landed.
    pub before: BTreeMap<u32, u32>,
}

impl Write {
    /// Bit `bit` of `offset` as it was before this write.
    pub fn bit_before(&self, offset: u32, bit: u8) -> bool {
        self.before.get(&offset).copied().unwrap_or(0) & (1 << bit) != 0
    }
}

#[derive(Copy, Clone, Debug)]
struct Mirror {
    src: (u32, u8),
    dst: (u32, u8),
}

#[derive(Default)]
struct State {
    regs: BTreeMap<u32, u32>,
    /// Clear register to the set register it clears.
    clears: BTreeMap<u32, u32>,
    sets: Vec<u32>,
    mirrors: Vec<Mirror>,
    always: Vec<(u32, u8)>,
    never: Vec<(u32, u8)>,
    writes: Vec<Write>,
}

impl State {
    fn read(&self, offset: u32) -> u32 {
        let raw = |o: u32| self.regs.get(&o).copied().unwrap_or(0);
        let mut v = raw(offset);

        for m in self.mirrors.iter().filter(|m| m.dst.0 == offset) {
            let on = raw(m.src.0) & (1 << m.src.1) != 0;
            if on {
                v |= 1 << m.dst.1;
            } else {
                v &= !(1 << m.dst.1);
            }
        }
        for &(_, bit) in self.always.iter().filter(|(o, _)| *o == offset) {
            v |= 1 << bit;
        }
        for &(_, bit) in self.never.iter().filter(|(o, _)| *o == offset) {
            v &= !(1 << bit);
        }
        v
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.writes.push(Write {
            offset,
            value,
            before: self.regs.clone(),
        });

        if self.sets.contains(&offset) {
            *self.regs.entry(offset).or_default() |= value;
        } else if let Some(&set) = self.clears.get(&offset) {
            *self.regs.entry(set).or_default() &= !value;
        } else {
            self.regs.insert(offset, value);
        }
    }
}

/// Cloning gives another handle on the same registers, so a test can keep
/// one while the tree owns the other.
#[derive(Clone, Default)]
pub struct FakeRcc {
    state: Arc<Mutex<State>>,
}

impl FakeRcc {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes to `set` OR into it; writes to `clr` clear the same bits of
    /// `set`.
    pub fn set_clr(self, set: u32, clr: u32) -> Self {
        {
            let mut s = self.state();
            s.sets.push(set);
            s.clears.insert(clr, set);
        }
        self
    }

    /// Bit `dst_bit` of `dst` reads as whatever bit `src_bit` of `src`
    /// holds, the way a ready flag follows its enable.
    pub fn mirror(self, src: u32, src_bit: u8, dst: u32, dst_bit: u8) -> Self {
        self.state().mirrors.push(Mirror {
            src: (src, src_bit),
            dst: (dst, dst_bit),
        });
        self
    }

    /// Bit always reads as one.
    pub fn ready(self, offset: u32, bit: u8) -> Self {
        self.state().always.push((offset, bit));
        self
    }

    /// Bit always reads as zero.
    pub fn stuck(self, offset: u32, bit: u8) -> Self {
        self.state().never.push((offset, bit));
        self
    }

    /// Sets raw register contents without logging a write.
    pub fn poke(&self, offset: u32, value: u32) {
        self.state().regs.insert(offset, value);
    }

    /// Reads a register the way the tree would see it.
    pub fn peek(&self, offset: u32) -> u32 {
        self.state().read(offset)
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

impl RegisterBank for FakeRcc {
    fn read(&self, offset: u32) -> u32 {
        self.state().read(offset)
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.state().write(offset, value)
    }
}

/// A clock that moves forward by `step` microseconds every time it's read,
/// so polls that never succeed still time out.
pub struct FakeTime {
    now: AtomicU64,
    step: u64,
}

impl FakeTime {
    pub fn with_step(step: u64) -> Self {
        Self {
            now: AtomicU64::new(0),
            step,
        }
    }

    pub fn elapsed(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

impl Default for FakeTime {
    fn default() -> Self {
        Self::with_step(1_000)
    }
}

impl Timebase for FakeTime {
    fn now_us(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}
