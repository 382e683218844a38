// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clock tree core for STM32MP1-family RCC blocks.
//!
//! A [`ClockTree`] combines a static [`ClockTable`] describing every node in
//! the SoC's clock distribution network with the two pieces of mutable state
//! the network needs at runtime: the RCC registers themselves, and one
//! reference count per node.
//!
//! Nodes are enabled parent-first and disabled child-first, so at every
//! instant the set of counted nodes is closed under "parent of". Muxed nodes
//! can be switched between their candidate parents without the output ever
//! losing its source (see [`ClockTree::set_parent`]).
//!
//! # Locking
//!
//! There are two locks, both spin locks, and they are always taken in the
//! same order:
//!
//! 1. The count lock, guarding reference counts and the trace buffer. It is
//!    held for the whole of an `enable`, `disable` or `set_parent`, including
//!    the walk along the parent chain; the walk is a loop, so nothing ever
//!    tries to take it twice.
//! 2. The register lock, guarding the register bank. It is held for a single
//!    access or read-modify-write and never across a poll.
//!
//! Nothing that holds the register lock calls back into the tree.

#![cfg_attr(target_os = "none", no_std)]

mod desc;
mod ops;
mod osc;
mod pll;
mod regs;

#[cfg(not(target_os = "none"))]
pub mod fakes;

pub use desc::{
    Bypass, Clock, ClockFlags, ClockId, ClockTable, Composite, Css, DivClock,
    DivEntry, DivFlags, Divider, Drive, FixedFactor, FixedRate, Gate,
    GateClock, Kind, Mux, Osc, Oscillator, Parent, Timer,
};
pub use ops::{ClockOps, InitContext};
pub use pll::{Csg, Pll, PllConfig, PllKind};
pub use regs::{
    field_mask, poll_until, Mmio, RegisterBank, Timebase, CLKSRC_TIMEOUT_US,
    OSCRDY_TIMEOUT_US, PLLRDY_TIMEOUT_US,
};

use ringbuf::{Ringbuf, RingbufEntry};

/// Longest parent chain the tree will walk. A longer one means the table
/// has a cycle.
pub const MAX_DEPTH: usize = 32;

pub const MAX_OSCILLATORS: usize = 8;

pub const TRACE_DEPTH: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, counters::Count)]
pub enum ClkError {
    /// No clock has the requested binding id.
    NotFound,
    /// The clock can't do that, e.g. `set_parent` on a clock with a fixed
    /// parent.
    InvalidOperation,
    /// A selector or parent that isn't among a mux's candidates.
    InvalidIndex,
    /// Hardware never reported ready.
    Timeout,
    /// The hardware can't be configured that way.
    OutOfRange,
}

#[derive(Copy, Clone, Debug, PartialEq, counters::Count)]
pub enum Trace {
    #[count(skip)]
    None,
    Init {
        clocks: u16,
    },
    /// Hardware enable, on the count going from zero to one.
    Enabled(ClockId),
    /// Hardware disable, on the count going from one to zero.
    Disabled(ClockId),
    /// Disable refused for a critical clock.
    CriticalHeld(ClockId),
    /// Uncounted clock found running and turned off.
    StrayDisabled(ClockId),
    AlreadyOff(ClockId),
    Switched {
        clock: ClockId,
        from: ClockId,
        to: ClockId,
    },
    /// Mux never reported ready; previous selection restored.
    SwitchTimedOut {
        clock: ClockId,
    },
    DividerSet {
        div: u16,
        value: u32,
    },
    PllConfigured(ClockId),
}

/// Appends to the trace. Only usable with the count lock held, which is
/// what serializes access to the ring.
macro_rules! record {
    ($tree:expr, $counts:expr, $ev:expr) => {{
        let ev = $ev;
        counters::Count::count(&ev, &$tree.trace_counts);
        $counts.trace.entry(line!() as u16, ev);
    }};
}

struct Counts<'a> {
    refs: &'a mut [u32],
    trace: Ringbuf<Trace, TRACE_DEPTH>,
}

/// How a clock's parent is chosen, in raw form.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParentIndex {
    Root,
    Fixed(ClockId),
    /// Current selector value of the clock's mux.
    Selector(u32),
}

pub struct ClockTree<'a, R, T> {
    table: &'a ClockTable<'a>,
    regs: spin::Mutex<R>,
    time: T,
    osc_hz: [u32; MAX_OSCILLATORS],
    counts: spin::Mutex<Counts<'a>>,
    trace_counts: <Trace as counters::Count>::Counters,
    error_counts: <ClkError as counters::Count>::Counters,
}

impl<'a, R: RegisterBank, T: Timebase> ClockTree<'a, R, T> {
    /// Builds the tree and runs every node's init step, which is where
    /// oscillators learn their frequency through `frequency_of`.
    ///
    /// `refs` provides the reference counts, one per clock, and is zeroed
    /// here.
    ///
    /// # Panics
    ///
    /// If the table is malformed or `refs` has the wrong length.
    pub fn init(
        table: &'a ClockTable<'a>,
        regs: R,
        time: T,
        refs: &'a mut [u32],
        frequency_of: impl Fn(&str) -> Option<u32>,
    ) -> Self {
        table.validate();
        assert_eq!(
            refs.len(),
            table.clocks.len(),
            "need one reference count per clock"
        );
        assert!(
            table.oscillators.len() <= MAX_OSCILLATORS,
            "too many oscillators"
        );
        refs.fill(0);

        let mut osc_hz = [0; MAX_OSCILLATORS];
        let mut cx = InitContext {
            table,
            osc_hz: &mut osc_hz,
            frequency_of: &frequency_of,
        };
        for clock in table.clocks {
            clock.kind.init(&mut cx);
        }

        let tree = Self {
            table,
            regs: spin::Mutex::new(regs),
            time,
            osc_hz,
            counts: spin::Mutex::new(Counts {
                refs,
                trace: Ringbuf {
                    last: None,
                    buffer: [RingbufEntry {
                        line: 0,
                        generation: 0,
                        count: 0,
                        payload: Trace::None,
                    }; TRACE_DEPTH],
                },
            }),
            trace_counts: <Trace as counters::Count>::NEW_COUNTERS,
            error_counts: <ClkError as counters::Count>::NEW_COUNTERS,
        };
        tree.trace_event(Trace::Init {
            clocks: table.clocks.len() as u16,
        });
        tree
    }

    pub fn table(&self) -> &'a ClockTable<'a> {
        self.table
    }

    pub fn len(&self) -> usize {
        self.table.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.clocks.is_empty()
    }

    pub fn clock(&self, id: ClockId) -> &'a Clock<'a> {
        &self.table.clocks[id.index()]
    }

    pub fn name(&self, id: ClockId) -> &'a str {
        self.clock(id).name
    }

    pub fn flags(&self, id: ClockId) -> ClockFlags {
        self.clock(id).flags
    }

    pub fn refcount(&self, id: ClockId) -> u32 {
        self.counts.lock().refs[id.index()]
    }

    /// Finds the clock consumers know as `binding`.
    pub fn lookup(&self, binding: u32) -> Result<ClockId, ClkError> {
        let r = self
            .table
            .clocks
            .iter()
            .position(|c| c.binding == Some(binding))
            .map(|i| ClockId(i as u16))
            .ok_or(ClkError::NotFound);
        self.note(r)
    }

    ////////////////////////////////////////////////////////////////////////
    // Registers

    pub fn read(&self, offset: u32) -> u32 {
        self.regs.lock().read(offset)
    }

    pub fn write(&self, offset: u32, value: u32) {
        self.regs.lock().write(offset, value)
    }

    /// Clears then sets bits in one locked read-modify-write.
    pub fn modify(&self, offset: u32, clear: u32, set: u32) {
        self.regs.lock().clrsetbits(offset, clear, set)
    }

    /// Polls until the bits under `mask` equal `expected`. The register lock
    /// is dropped between reads.
    pub fn wait_bits(
        &self,
        offset: u32,
        mask: u32,
        expected: u32,
        timeout_us: u64,
    ) -> Result<(), ClkError> {
        poll_until(&self.time, timeout_us, || {
            self.read(offset) & mask == expected
        })
    }

    ////////////////////////////////////////////////////////////////////////
    // Topology and rates

    /// Current parent of `id`, or `None` for a root.
    pub fn get_parent(&self, id: ClockId) -> Result<Option<ClockId>, ClkError> {
        let r = self.resolve_parent(id);
        self.note(r)
    }

    fn resolve_parent(&self, id: ClockId) -> Result<Option<ClockId>, ClkError> {
        match self.clock(id).parent {
            Parent::Root => Ok(None),
            Parent::Clock(p) => Ok(Some(p)),
            Parent::Mux(m) => {
                let sel = self.mux_value(m);
                self.table.muxes[usize::from(m)]
                    .parents
                    .get(sel as usize)
                    .map(|&p| Some(p))
                    .ok_or(ClkError::InvalidIndex)
            }
        }
    }

    pub fn get_parent_index(&self, id: ClockId) -> ParentIndex {
        match self.clock(id).parent {
            Parent::Root => ParentIndex::Root,
            Parent::Clock(p) => ParentIndex::Fixed(p),
            Parent::Mux(m) => ParentIndex::Selector(self.mux_value(m)),
        }
    }

    /// The parent `id` would have with its mux set to `idx`. Clocks without
    /// a mux have the same parent whatever `idx` is.
    pub fn get_parent_by_index(
        &self,
        id: ClockId,
        idx: u32,
    ) -> Result<Option<ClockId>, ClkError> {
        let r = match self.clock(id).parent {
            Parent::Root => Ok(None),
            Parent::Clock(p) => Ok(Some(p)),
            Parent::Mux(m) => self.table.muxes[usize::from(m)]
                .parents
                .get(idx as usize)
                .map(|&p| Some(p))
                .ok_or(ClkError::InvalidIndex),
        };
        self.note(r)
    }

    /// Rate of `id` in Hz, worked out from the root down.
    ///
    /// # Panics
    ///
    /// If the chain is deeper than [`MAX_DEPTH`], or its root has no way of
    /// producing a rate.
    pub fn get_rate(&self, id: ClockId) -> Result<u32, ClkError> {
        let r = self.rate(id);
        self.note(r)
    }

    /// Rate of whatever currently feeds `id`; zero for a root.
    pub fn get_parent_rate(&self, id: ClockId) -> Result<u32, ClkError> {
        let r = match self.resolve_parent(id) {
            Ok(Some(p)) => self.rate(p),
            Ok(None) => Ok(0),
            Err(e) => Err(e),
        };
        self.note(r)
    }

    fn rate(&self, id: ClockId) -> Result<u32, ClkError> {
        let mut chain = heapless::Vec::<ClockId, MAX_DEPTH>::new();
        let mut cur = id;
        loop {
            if chain.push(cur).is_err() {
                panic!("clock {}: parent chain too deep", self.name(id));
            }
            match self.resolve_parent(cur)? {
                Some(p) => cur = p,
                None => break,
            }
        }

        let mut hz = 0;
        for (depth, &c) in chain.iter().rev().enumerate() {
            hz = match self.clock(c).kind.recalc_rate(self, hz) {
                Some(rate) => rate,
                None if depth == 0 => {
                    panic!("root clock {} has no rate", self.name(c))
                }
                None => hz,
            };
        }
        Ok(hz)
    }

    ////////////////////////////////////////////////////////////////////////
    // Gating

    /// Whether `id` is running. Kinds that can't tell from hardware are
    /// running if anyone holds a reference.
    pub fn is_enabled(&self, id: ClockId) -> bool {
        let counts = self.counts.lock();
        self.is_enabled_locked(&counts, id)
    }

    fn is_enabled_locked(&self, counts: &Counts<'_>, id: ClockId) -> bool {
        match self.clock(id).kind.is_enabled(self) {
            Some(on) => on,
            None => counts.refs[id.index()] > 0,
        }
    }

    /// Takes a reference on `id`, first powering up any part of its parent
    /// chain that nobody is using yet, root first.
    ///
    /// A failure partway up leaves the already-enabled ancestors enabled
    /// and counted.
    ///
    /// # Panics
    ///
    /// If a count would reach `u32::MAX`, or the chain is deeper than
    /// [`MAX_DEPTH`].
    pub fn enable(&self, id: ClockId) -> Result<(), ClkError> {
        let mut counts = self.counts.lock();
        let r = self.enable_locked(&mut counts, id);
        drop(counts);
        self.note(r)
    }

    fn enable_locked(
        &self,
        counts: &mut Counts<'_>,
        id: ClockId,
    ) -> Result<(), ClkError> {
        // Nodes that are off, leaf first. The walk stops at the first node
        // somebody already holds, which takes the reference for the top of
        // `pending`.
        let mut pending = heapless::Vec::<ClockId, MAX_DEPTH>::new();
        let mut cur = id;
        loop {
            if counts.refs[cur.index()] > 0 {
                self.take_ref(counts, cur);
                break;
            }
            if pending.push(cur).is_err() {
                panic!("clock {}: parent chain too deep", self.name(id));
            }
            match self.resolve_parent(cur)? {
                Some(p) => cur = p,
                None => break,
            }
        }

        while let Some(c) = pending.pop() {
            self.clock(c).kind.enable(self)?;
            record!(self, counts, Trace::Enabled(c));
            self.take_ref(counts, c);
        }
        Ok(())
    }

    fn take_ref(&self, counts: &mut Counts<'_>, id: ClockId) {
        let n = &mut counts.refs[id.index()];
        *n += 1;
        assert!(*n != u32::MAX, "clock {}: too many enables", self.name(id));
    }

    /// Drops a reference on `id`, powering it down when the last one goes
    /// and releasing its parent in turn.
    ///
    /// Critical clocks keep their last reference. A clock nobody holds that
    /// is nonetheless running (left on since boot) is turned off without
    /// touching its parent.
    ///
    /// # Panics
    ///
    /// If more than [`MAX_DEPTH`] clocks would go down in one call.
    pub fn disable(&self, id: ClockId) -> Result<(), ClkError> {
        let mut counts = self.counts.lock();
        let r = self.disable_locked(&mut counts, id);
        drop(counts);
        self.note(r)
    }

    fn disable_locked(
        &self,
        counts: &mut Counts<'_>,
        id: ClockId,
    ) -> Result<(), ClkError> {
        let mut cur = id;
        for _ in 0..MAX_DEPTH {
            let clock = self.clock(cur);
            let n = counts.refs[cur.index()];

            if clock.flags.contains(ClockFlags::CRITICAL) && n <= 1 {
                record!(self, counts, Trace::CriticalHeld(cur));
                return Ok(());
            }

            if n == 0 {
                if self.is_enabled_locked(counts, cur) {
                    clock.kind.disable(self)?;
                    record!(self, counts, Trace::StrayDisabled(cur));
                } else {
                    record!(self, counts, Trace::AlreadyOff(cur));
                }
                return Ok(());
            }

            counts.refs[cur.index()] = n - 1;
            if n > 1 {
                return Ok(());
            }

            clock.kind.disable(self)?;
            record!(self, counts, Trace::Disabled(cur));

            match self.resolve_parent(cur)? {
                Some(p) => cur = p,
                None => return Ok(()),
            }
        }
        panic!("clock {}: parent chain too deep", self.name(id));
    }

    /// Enables every clock flagged critical, in table order.
    pub fn enable_critical_clocks(&self) -> Result<(), ClkError> {
        for (i, clock) in self.table.clocks.iter().enumerate() {
            if clock.flags.contains(ClockFlags::CRITICAL) {
                self.enable(ClockId(i as u16))?;
            }
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////
    // Parent selection

    /// Moves muxed clock `id` over to `parent` without glitching.
    ///
    /// Both the old and new parent are held on while the mux switches. If
    /// `id` held a reference on its old parent, that reference moves to the
    /// new one; otherwise every count ends where it started. If the mux
    /// never reports ready the previous selection is written back and
    /// [`ClkError::Timeout`] returned, with counts unchanged.
    pub fn set_parent(
        &self,
        id: ClockId,
        parent: ClockId,
    ) -> Result<(), ClkError> {
        let r = self.set_parent_inner(id, parent);
        self.note(r)
    }

    fn set_parent_inner(
        &self,
        id: ClockId,
        new: ClockId,
    ) -> Result<(), ClkError> {
        let m = self.mux_of(id).ok_or(ClkError::InvalidOperation)?;
        let mux = &self.table.muxes[usize::from(m)];

        let mut counts = self.counts.lock();

        let old_sel = self.mux_value(m);
        let old = *mux
            .parents
            .get(old_sel as usize)
            .ok_or(ClkError::InvalidIndex)?;
        if old == new {
            return Ok(());
        }
        let sel = mux
            .parents
            .iter()
            .position(|&p| p == new)
            .ok_or(ClkError::InvalidIndex)? as u32;

        let holds_ref = counts.refs[id.index()] > 0;

        self.enable_locked(&mut counts, new)?;
        if let Err(e) = self.enable_locked(&mut counts, old) {
            let _ = self.disable_locked(&mut counts, new);
            return Err(e);
        }

        match self.write_mux(m, sel) {
            Ok(()) => {
                record!(
                    self,
                    counts,
                    Trace::Switched {
                        clock: id,
                        from: old,
                        to: new,
                    }
                );
                self.disable_locked(&mut counts, old)?;
                if holds_ref {
                    self.disable_locked(&mut counts, old)
                } else {
                    self.disable_locked(&mut counts, new)
                }
            }
            Err(e) => {
                self.modify(
                    mux.offset,
                    mux.mask(),
                    (old_sel << mux.shift) & mux.mask(),
                );
                record!(self, counts, Trace::SwitchTimedOut { clock: id });
                let _ = self.disable_locked(&mut counts, new);
                let _ = self.disable_locked(&mut counts, old);
                Err(e)
            }
        }
    }

    /// Writes the selector of `id`'s mux directly. Counts are not adjusted,
    /// so this is for bring-up, before anyone holds references.
    pub fn set_parent_by_index(
        &self,
        id: ClockId,
        sel: u32,
    ) -> Result<(), ClkError> {
        match self.mux_of(id) {
            Some(m) => self.set_mux(m, sel),
            None => self.note(Err(ClkError::InvalidOperation)),
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Accounting

    /// Counts `r` against the error counters if it failed, and passes it on.
    pub(crate) fn note<V>(&self, r: Result<V, ClkError>) -> Result<V, ClkError> {
        if let Err(e) = &r {
            counters::Count::count(e, &self.error_counts);
        }
        r
    }

    /// Records an event from outside the refcounted paths.
    pub(crate) fn trace_event(&self, ev: Trace) {
        let mut counts = self.counts.lock();
        record!(self, counts, ev);
    }

    pub fn with_trace<V>(
        &self,
        f: impl FnOnce(&Ringbuf<Trace, TRACE_DEPTH>) -> V,
    ) -> V {
        f(&self.counts.lock().trace)
    }

    pub fn trace_counts(&self) -> &<Trace as counters::Count>::Counters {
        &self.trace_counts
    }

    pub fn error_counts(&self) -> &<ClkError as counters::Count>::Counters {
        &self.error_counts
    }
}
