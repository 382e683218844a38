// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use clk_core::fakes::{FakeRcc, FakeTime};
use clk_core::*;
use common::*;
use proptest::sample::Index;
use proptest::test_runner::TestCaseError;
use proptest_derive::Arbitrary;

static NONCRITICAL: [ClockId; 9] = [HSE, HSI, A, B, P1, P2, D, E, F];
static D_CANDIDATES: [ClockId; 3] = [P1, P2, A];

#[derive(Copy, Clone, Debug, Arbitrary)]
enum Op {
    Enable(
        #[proptest(strategy = "proptest::sample::select(&NONCRITICAL[..])")]
        ClockId,
    ),
    Release(
        #[proptest(strategy = "proptest::sample::select(&NONCRITICAL[..])")]
        ClockId,
    ),
    Switch(
        #[proptest(strategy = "proptest::sample::select(&D_CANDIDATES[..])")]
        ClockId,
    ),
}

fn check_parents<R: RegisterBank, T: Timebase>(
    tree: &ClockTree<'_, R, T>,
) -> Result<(), TestCaseError> {
    parents_counted(tree).map_err(TestCaseError::fail)
}

/// A tree of `n` gates, each hanging off an earlier node or off its own
/// fixed-rate root, all in one register at 0x100.
fn random_tree(
    shape: &[Index],
) -> (FakeRcc, ClockTree<'static, FakeRcc, FakeTime>) {
    let n = shape.len();
    let gates: Vec<Gate> = (0..n)
        .map(|i| Gate {
            offset: 0x100,
            bit: i as u8,
            set_clr: false,
        })
        .collect();
    let clocks: Vec<Clock<'static>> = shape
        .iter()
        .enumerate()
        .map(|(i, pick)| {
            let p = if i == 0 { 0 } else { pick.index(i + 1) };
            let name: &'static str = Box::leak(format!("n{i}").into_boxed_str());
            let (parent, kind) = if p == i {
                (Parent::Root, Kind::FixedRate(FixedRate { hz: 1_000 }))
            } else {
                (
                    Parent::Clock(ClockId(p as u16)),
                    Kind::Gate(GateClock { gate: i as u16 }),
                )
            };
            Clock {
                name,
                binding: None,
                parent,
                flags: ClockFlags::empty(),
                kind,
            }
        })
        .collect();

    let table: &'static ClockTable<'static> = Box::leak(Box::new(ClockTable {
        clocks: Box::leak(clocks.into_boxed_slice()),
        muxes: &[],
        dividers: &[],
        gates: Box::leak(gates.into_boxed_slice()),
        oscillators: &[],
        clear_offset: 4,
    }));
    let refs = Box::leak(vec![0; n].into_boxed_slice());
    let rcc = FakeRcc::new();
    let tree =
        ClockTree::init(table, rcc.clone(), FakeTime::default(), refs, |_| None);
    (rcc, tree)
}

proptest::proptest! {
    #[test]
    fn random_dag_stays_connected(
        shape in proptest::collection::vec(proptest::arbitrary::any::<Index>(), 1..24),
        ops in proptest::collection::vec(
            (proptest::arbitrary::any::<Index>(), proptest::arbitrary::any::<bool>()),
            0..64,
        ),
    ) {
        let (rcc, tree) = random_tree(&shape);
        let mut held = vec![0u32; shape.len()];

        for (pick, enable) in ops {
            let i = pick.index(shape.len());
            let id = ClockId(i as u16);
            if enable {
                tree.enable(id).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
                held[i] += 1;
            } else if held[i] > 0 {
                tree.disable(id).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
                held[i] -= 1;
            }
            check_parents(&tree)?;

            // Gated nodes run exactly when counted.
            for j in 0..shape.len() {
                let id = ClockId(j as u16);
                if let Kind::Gate(g) = tree.clock(id).kind {
                    proptest::prop_assert_eq!(
                        tree.gate_is_enabled(g.gate),
                        tree.refcount(id) > 0,
                        "{}", tree.name(id)
                    );
                }
            }
        }

        for (i, n) in held.iter().enumerate() {
            for _ in 0..*n {
                tree.disable(ClockId(i as u16))
                    .map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
            }
        }
        for i in 0..shape.len() {
            proptest::prop_assert_eq!(tree.refcount(ClockId(i as u16)), 0);
        }
        proptest::prop_assert_eq!(rcc.peek(0x100), 0);
    }

    #[test]
    fn counts_conserved_across_switches(
        ops in proptest::collection::vec(proptest::arbitrary::any::<Op>(), 0..48),
    ) {
        let rcc = rcc();
        let t = tree(&rcc);
        let mut held = vec![0u32; t.len()];

        for op in ops {
            match op {
                Op::Enable(id) => {
                    t.enable(id).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
                    held[id.index()] += 1;
                }
                Op::Release(id) => {
                    if held[id.index()] > 0 {
                        t.disable(id)
                            .map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
                        held[id.index()] -= 1;
                    }
                }
                Op::Switch(p) => {
                    t.set_parent(D, p)
                        .map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
                    proptest::prop_assert_eq!(t.get_parent(D), Ok(Some(p)));
                }
            }
            check_parents(&t)?;
        }

        for &id in &NONCRITICAL {
            for _ in 0..held[id.index()] {
                t.disable(id).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
            }
        }
        for &id in &NONCRITICAL {
            proptest::prop_assert_eq!(t.refcount(id), 0, "{}", t.name(id));
        }
        for reg in [HSE_ON, SET, GATES] {
            proptest::prop_assert_eq!(rcc.peek(reg), 0);
        }
    }

    #[test]
    fn critical_never_drops(enables in 1u32..5, disables in 0u32..20) {
        let rcc = rcc();
        let t = tree(&rcc);

        for _ in 0..enables {
            t.enable(C).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
        }
        for _ in 0..disables {
            t.disable(C).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
            proptest::prop_assert!(t.refcount(C) >= 1);
            proptest::prop_assert!(t.is_enabled(C));
        }
        proptest::prop_assert_eq!(
            t.refcount(C),
            enables.saturating_sub(disables).max(1)
        );
    }

    #[test]
    fn rate_depends_only_on_own_chain(
        div in 0u32..8,
        other_div in 0u32..8,
        sel in 0u32..2,
    ) {
        let rcc = rcc();
        let t = tree(&rcc);
        rcc.poke(DIV_B, div);
        rcc.poke(MUX_E, sel);

        let e = t.get_rate(E).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
        proptest::prop_assert_eq!(e, if sel == 0 { 24_000_000 } else { 64_000_000 });
        proptest::prop_assert_eq!(t.get_rate(F), Ok(e / 2));
        proptest::prop_assert_eq!(t.get_rate(B), Ok(24_000_000u32.div_ceil(div + 1)));

        // Changing b's divider touches nothing outside b.
        let before: Vec<_> = [HSE, A, D, E, F].iter().map(|&id| t.get_rate(id)).collect();
        rcc.poke(DIV_B, other_div);
        let after: Vec<_> = [HSE, A, D, E, F].iter().map(|&id| t.get_rate(id)).collect();
        proptest::prop_assert_eq!(before, after);
    }
}
