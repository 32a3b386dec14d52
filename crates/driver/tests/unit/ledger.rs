//! Resource ledger property tests.
//!
//! Verifies the free-mask/assignment invariants under arbitrary
//! allocate/queue/release interleavings.

use nna_core::sched::ledger::{HwSchedInfo, Ledger};
use proptest::prelude::*;

/// The redundant counters always match the mask popcounts, and queued
/// assignments keep their cores busy.
fn check_invariants(ledger: &Ledger) {
    assert_eq!(
        ledger.num_cores_free,
        ledger.free_core_mask.count_ones() as u8
    );
    assert_eq!(ledger.num_wms_free, ledger.free_wm_mask.count_ones() as u8);
    for a in &ledger.assignments {
        if a.queued {
            assert_ne!(a.core_mask, 0, "queued flag on an empty assignment");
        }
        if a.core_mask != 0 {
            assert_eq!(
                ledger.free_core_mask & a.core_mask,
                0,
                "assigned core marked free"
            );
        }
    }
}

/// No two live assignments share a core.
fn check_no_double_assignment(ledger: &Ledger) {
    let mut seen = 0u8;
    for a in &ledger.assignments {
        if a.core_mask != 0 {
            assert_eq!(seen & a.core_mask, 0, "core double-assigned");
            seen |= a.core_mask;
        }
    }
}

#[derive(Clone, Debug)]
enum Op {
    Allocate(u8),
    Queue(u8),
    ReleaseOldest,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..=4).prop_map(Op::Allocate),
        (1u8..=4).prop_map(Op::Queue),
        Just(Op::ReleaseOldest),
    ]
}

proptest! {
    #[test]
    fn invariants_hold_under_random_op_sequences(ops in proptest::collection::vec(op_strategy(), 1..64)) {
        let mut ledger = Ledger::new(4);
        let mut live: Vec<HwSchedInfo> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(n) => {
                    if let Some(info) = ledger.try_allocate(n) {
                        prop_assert_eq!(info.core_mask.count_ones() as u8, n);
                        live.push(info);
                    }
                }
                Op::Queue(n) => {
                    if let Some(info) = ledger.try_queue(n, |_| false) {
                        prop_assert!(info.queued);
                        live.push(info);
                    }
                }
                Op::ReleaseOldest => {
                    if !live.is_empty() {
                        let mut info = live.remove(0);
                        ledger.release(&mut info);
                        prop_assert!(info.freed);
                    }
                }
            }
            check_invariants(&ledger);
            check_no_double_assignment(&ledger);
        }

        // Draining everything restores the initial state.
        while !live.is_empty() {
            let mut info = live.remove(0);
            ledger.release(&mut info);
            check_invariants(&ledger);
        }
        prop_assert_eq!(ledger.num_cores_free, 4);
        prop_assert_eq!(ledger.num_wms_free, 4);
    }
}

#[test]
fn queue_capacity_doubles_in_low_latency() {
    let mut ledger = Ledger::new(2);
    let _a = ledger.try_allocate(1).unwrap();
    let _b = ledger.try_allocate(1).unwrap();
    assert!(!ledger.capacity_available(false));
    assert!(ledger.capacity_available(true));
    let _qa = ledger.try_queue(1, |_| false).unwrap();
    let _qb = ledger.try_queue(1, |_| false).unwrap();
    assert!(!ledger.capacity_available(true));
}
