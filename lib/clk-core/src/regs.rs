// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register access layer.
//!
//! Everything the clock core does to hardware goes through a
//! [`RegisterBank`]: 32-bit reads and writes at byte offsets from the RCC
//! base, plus the read-modify-write helpers built on top of them. The clock
//! tree owns its bank behind the register lock, so an implementation does not
//! need to make `clrsetbits` atomic on its own; holding the lock for the
//! duration of the read and the write is what makes it a single transaction
//! as far as other cores are concerned.
//!
//! Time comes from a [`Timebase`], which only has to be monotonic and count
//! microseconds.

use crate::ClkError;

/// How long a mux or divider gets to raise its ready bit.
pub const CLKSRC_TIMEOUT_US: u64 = 200_000;

/// How long an oscillator gets to report ready (or stopped).
pub const OSCRDY_TIMEOUT_US: u64 = 1_000_000;

/// How long a PLL gets to lock (or unlock).
pub const PLLRDY_TIMEOUT_US: u64 = 200_000;

pub trait RegisterBank {
    fn read(&self, offset: u32) -> u32;
    fn write(&mut self, offset: u32, value: u32);

    fn clrsetbits(&mut self, offset: u32, clear: u32, set: u32) {
        let v = self.read(offset);
        self.write(offset, (v & !clear) | set);
    }

    fn setbits(&mut self, offset: u32, bits: u32) {
        self.clrsetbits(offset, 0, bits);
    }

    fn clrbits(&mut self, offset: u32, bits: u32) {
        self.clrsetbits(offset, bits, 0);
    }
}

pub trait Timebase {
    /// Current time in microseconds. Must never go backwards.
    fn now_us(&self) -> u64;
}

/// Returns a mask covering `width` bits starting at `shift`.
pub const fn field_mask(shift: u8, width: u8) -> u32 {
    (((1u64 << width) - 1) as u32) << shift
}

/// Spins until `done` returns true or `timeout_us` has elapsed.
///
/// The condition is evaluated once more after the deadline passes, so a
/// caller that was held off the bus past the deadline does not report a
/// timeout for a bit that did in fact come up.
pub fn poll_until(
    time: &impl Timebase,
    timeout_us: u64,
    mut done: impl FnMut() -> bool,
) -> Result<(), ClkError> {
    let start = time.now_us();

    loop {
        if done() {
            return Ok(());
        }

        if time.now_us().wrapping_sub(start) >= timeout_us {
            return if done() { Ok(()) } else { Err(ClkError::Timeout) };
        }
    }
}

/// The RCC as actual memory-mapped registers.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of the RCC register block, mapped as device
    /// memory for as long as this `Mmio` exists, and this must be the only
    /// `Mmio` for that block.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    fn addr(&self, offset: u32) -> *mut u32 {
        (self.base + offset as usize) as *mut u32
    }
}

impl RegisterBank for Mmio {
    fn read(&self, offset: u32) -> u32 {
        // Safety: the constructor's contract says this is our register block.
        unsafe { core::ptr::read_volatile(self.addr(offset)) }
    }

    fn write(&mut self, offset: u32, value: u32) {
        // Safety: as above.
        unsafe { core::ptr::write_volatile(self.addr(offset), value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Ticker(Cell<u64>);

    impl Timebase for Ticker {
        fn now_us(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 10);
            t
        }
    }

    #[test]
    fn masks() {
        assert_eq!(field_mask(0, 3), 0b111);
        assert_eq!(field_mask(16, 6), 0x3f << 16);
        assert_eq!(field_mask(0, 32), u32::MAX);
    }

    #[test]
    fn poll_gives_up() {
        let t = Ticker(Cell::new(0));
        assert_eq!(poll_until(&t, 100, || false), Err(ClkError::Timeout));
        assert!(t.0.get() >= 100);
    }

    #[test]
    fn poll_late_success_counts() {
        // Condition only becomes true on the check made after the deadline.
        let t = Ticker(Cell::new(0));
        let checks = Cell::new(0);
        let r = poll_until(&t, 20, || {
            checks.set(checks.get() + 1);
            checks.get() > 2
        });
        assert_eq!(r, Ok(()));
    }
}
