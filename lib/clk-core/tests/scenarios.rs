// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use std::sync::atomic::Ordering;

use clk_core::{ClkError, Trace};
use common::*;

#[test]
fn gate_under_oscillator() {
    let rcc = rcc();
    let t = tree(&rcc);

    t.enable(A).unwrap();
    assert!(t.is_enabled(A));
    assert_eq!(t.get_rate(A), Ok(24_000_000));

    // The oscillator came up, and before the gate did.
    assert!(t.is_enabled(HSE));
    assert_eq!(t.refcount(HSE), 1);
    let writes = rcc.writes();
    let hse = writes.iter().position(|w| w.offset == HSE_ON).unwrap();
    let a = writes.iter().position(|w| w.offset == SET).unwrap();
    assert!(hse < a);
}

#[test]
fn divider_rounds_up() {
    let rcc = rcc();
    let t = tree(&rcc);
    assert_eq!(t.get_rate(B), Ok(8_000_000));

    rcc.poke(DIV_B, 6);
    assert_eq!(t.get_rate(B), Ok(3_428_572));
}

#[test]
fn counted_enable_and_disable() {
    let rcc = rcc();
    let t = tree(&rcc);

    t.enable(B).unwrap();
    t.enable(B).unwrap();
    assert_eq!(t.refcount(B), 2);
    assert_eq!(t.refcount(A), 1);

    t.disable(B).unwrap();
    assert_eq!(t.refcount(B), 1);
    assert!(t.is_enabled(B));
    assert!(t.is_enabled(A));

    t.disable(B).unwrap();
    assert_eq!(t.refcount(B), 0);
    assert!(!t.is_enabled(B));
    assert_eq!(t.refcount(A), 0);
    assert!(!t.is_enabled(A));
    assert!(!t.is_enabled(HSE));
}

#[test]
fn second_enable_leaves_hardware_alone() {
    let rcc = rcc();
    let t = tree(&rcc);
    t.enable(A).unwrap();
    rcc.clear_writes();
    t.enable(A).unwrap();
    assert!(rcc.writes().is_empty());
}

#[test]
fn critical_clock_stays_on() {
    let rcc = rcc();
    let t = tree(&rcc);

    t.enable(C).unwrap();
    assert_eq!(t.refcount(C), 1);

    for _ in 0..3 {
        t.disable(C).unwrap();
        assert_eq!(t.refcount(C), 1);
        assert!(t.is_enabled(C));
    }
    assert_eq!(
        t.trace_counts().CriticalHeld.load(Ordering::Relaxed),
        3
    );
}

#[test]
fn critical_clocks_enabled_in_bulk() {
    let rcc = rcc();
    let t = tree(&rcc);
    t.enable_critical_clocks().unwrap();
    assert_eq!(t.refcount(C), 1);
    assert!(t.is_enabled(C));
    assert_eq!(t.refcount(A), 0);
}

#[test]
fn switch_timeout_keeps_old_parent() {
    let rcc = stuck_mux_rcc();
    let t = tree(&rcc);

    t.enable(D).unwrap();
    assert_eq!(t.get_parent(D), Ok(Some(P1)));

    assert_eq!(t.set_parent(D, P2), Err(ClkError::Timeout));
    assert_eq!(t.get_parent(D), Ok(Some(P1)));

    assert_eq!(t.refcount(P1), 1);
    assert!(t.is_enabled(P1));
    assert_eq!(t.refcount(P2), 0);
    assert!(!t.is_enabled(P2));
    assert_eq!(
        t.trace_counts().SwitchTimedOut.load(Ordering::Relaxed),
        1
    );
    assert_eq!(t.error_counts().Timeout.load(Ordering::Relaxed), 1);
}

#[test]
fn switch_moves_reference() {
    let rcc = rcc();
    let t = tree(&rcc);

    t.enable(D).unwrap();
    t.set_parent(D, P2).unwrap();

    assert_eq!(t.get_parent(D), Ok(Some(P2)));
    assert_eq!(t.get_rate(D), Ok(64_000_000));
    assert_eq!(t.refcount(P2), 1);
    assert!(t.is_enabled(P2));
    assert_eq!(t.refcount(P1), 0);
    assert!(!t.is_enabled(P1));
    assert_eq!(t.refcount(HSE), 0);
    assert!(!t.is_enabled(HSE));
    assert_eq!(t.refcount(D), 1);
}

#[test]
fn switch_while_off_leaves_counts_alone() {
    let rcc = rcc();
    let t = tree(&rcc);

    t.set_parent(D, A).unwrap();
    assert_eq!(t.get_parent(D), Ok(Some(A)));
    for id in [HSE, HSI, A, P1, P2, D] {
        assert_eq!(t.refcount(id), 0, "{}", t.name(id));
    }
    assert!(!t.is_enabled(P1));
    assert!(!t.is_enabled(A));
}

#[test]
fn switch_is_glitch_free() {
    let rcc = rcc();
    let t = tree(&rcc);

    t.enable(D).unwrap();
    rcc.clear_writes();
    t.set_parent(D, P2).unwrap();

    let writes = rcc.writes();
    let switch = writes.iter().position(|w| w.offset == MUX_D).unwrap();
    // Both sources running when the selector changes.
    assert!(writes[switch].bit_before(GATES, 0));
    assert!(writes[switch].bit_before(GATES, 1));
    // And p1 stays up until after the switch.
    let p1_off = writes
        .iter()
        .position(|w| w.offset == GATES && w.value & 1 == 0)
        .unwrap();
    assert!(p1_off > switch);
}

#[test]
fn same_parent_is_a_no_op() {
    let rcc = rcc();
    let t = tree(&rcc);
    t.enable(D).unwrap();
    rcc.clear_writes();
    t.set_parent(D, P1).unwrap();
    assert!(rcc.writes().is_empty());
    assert_eq!(t.refcount(P1), 1);
}

#[test]
fn bad_switch_requests() {
    let rcc = rcc();
    let t = tree(&rcc);
    assert_eq!(t.set_parent(A, HSI), Err(ClkError::InvalidOperation));
    assert_eq!(t.set_parent(D, HSE), Err(ClkError::InvalidIndex));
    assert_eq!(t.set_parent_by_index(B, 0), Err(ClkError::InvalidOperation));
}

#[test]
fn garbage_selector() {
    let rcc = rcc();
    let t = tree(&rcc);
    rcc.poke(MUX_D, 3);
    assert_eq!(t.get_parent(D), Err(ClkError::InvalidIndex));
    assert_eq!(t.get_rate(D), Err(ClkError::InvalidIndex));
    assert_eq!(t.error_counts().InvalidIndex.load(Ordering::Relaxed), 2);
}

#[test]
fn mux_only_node_follows_selection() {
    let rcc = rcc();
    let t = tree(&rcc);
    assert_eq!(t.get_rate(F), Ok(12_000_000));
    t.set_parent_by_index(E, 1).unwrap();
    assert_eq!(t.get_parent(E), Ok(Some(HSI)));
    assert_eq!(t.get_rate(F), Ok(32_000_000));
    assert_eq!(t.get_parent_rate(F), Ok(64_000_000));
}

#[test]
fn lookup_by_binding() {
    let rcc = rcc();
    let t = tree(&rcc);
    assert_eq!(t.lookup(103), Ok(D));
    assert_eq!(t.lookup(7), Err(ClkError::NotFound));
    assert_eq!(t.error_counts().NotFound.load(Ordering::Relaxed), 1);
}

#[test]
fn stray_clock_turned_off() {
    let rcc = rcc();
    let t = tree(&rcc);

    // Left running since boot, with nobody counting it.
    rcc.poke(HSE_ON, 1);
    rcc.poke(SET, 1);
    t.disable(A).unwrap();

    assert!(!t.is_enabled(A));
    // Its parent was never counted through it, so it stays as it was.
    assert!(t.is_enabled(HSE));
    assert_eq!(t.trace_counts().StrayDisabled.load(Ordering::Relaxed), 1);
}

#[test]
fn disable_when_off_does_nothing() {
    let rcc = rcc();
    let t = tree(&rcc);
    t.disable(A).unwrap();
    assert!(rcc.writes().is_empty());
    assert_eq!(t.trace_counts().AlreadyOff.load(Ordering::Relaxed), 1);
}

#[test]
fn trace_records_bring_up() {
    let rcc = rcc();
    let t = tree(&rcc);
    t.enable(A).unwrap();

    let seen: Vec<Trace> = t.with_trace(|rb| {
        rb.buffer
            .iter()
            .filter(|e| e.count > 0)
            .map(|e| e.payload)
            .collect()
    });
    assert!(seen.contains(&Trace::Init { clocks: 10 }));
    assert!(seen.contains(&Trace::Enabled(HSE)));
    assert!(seen.contains(&Trace::Enabled(A)));
}

#[test]
fn racing_cores_agree() {
    let rcc = rcc();
    let t = tree(&rcc);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..500 {
                    t.enable(B).unwrap();
                    t.enable(D).unwrap();
                    t.disable(B).unwrap();
                    t.disable(D).unwrap();
                }
            });
        }
    });

    for id in [HSE, A, B, P1, D] {
        assert_eq!(t.refcount(id), 0, "{}", t.name(id));
    }
    assert!(!t.is_enabled(HSE));
    assert!(!t.is_enabled(A));
    assert_eq!(
        t.trace_counts().Enabled.load(Ordering::Relaxed),
        t.trace_counts().Disabled.load(Ordering::Relaxed)
    );
}
