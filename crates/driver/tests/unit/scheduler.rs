//! End-to-end scheduling tests: single-workload flow, round robin within a
//! priority, strict priority dominance and the starvation-avoidance
//! lottery.

use std::sync::{Arc, Mutex};

use nna_core::config::Config;
use nna_core::device::Observers;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

/// One workload on an idle 4-core device lands on WM0/core0 and
/// completes cleanly.
#[test]
fn single_workload_kicks_wm0_core0() {
    let mut ctx = TestContext::new(4, Config::default());
    let session = ctx.add_session();

    ctx.submit(session, 0x100, 0, 1);

    let kicks = ctx.kicks();
    assert_eq!(kicks.len(), 1);
    assert_eq!(kicks[0].wm_id, 0);
    assert_eq!(ctx.dev.ledger().free_core_mask, 0b1110);

    ctx.advance_ms(2);
    ctx.complete(0, nna_core::regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);

    let rsp = ctx.dev.read_response(session).expect("response expected");
    assert_eq!(rsp.cmd_id, 0x100);
    assert_eq!(rsp.err_no, 0);
    assert_eq!(rsp.rsp_err_flags, 0);

    let stats = ctx.dev.stats();
    assert_eq!(stats.cnn_kicks, 1);
    assert_eq!(stats.cnn_kicks_completed, 1);
    assert_eq!(stats.core_stats[0].kick.kicks, 1);
    assert_eq!(stats.wm_stats[0].kick.kicks, 1);
    assert_eq!(ctx.dev.ledger().free_core_mask, 0b1111);
}

/// Three sessions with queued work on a contended single-core device
/// are served round robin.
#[test]
fn sessions_at_equal_priority_are_served_round_robin() {
    let mut ctx = TestContext::new(1, Config::default());
    let a = ctx.add_session();
    let b = ctx.add_session();
    let c = ctx.add_session();

    let order = Arc::new(Mutex::new(Vec::new()));
    let hook = order.clone();
    ctx.dev.set_observers(Observers {
        submitted: Some(Box::new(move |session, _cmd, _pri| {
            hook.lock().unwrap().push(session);
        })),
        ..Observers::default()
    });

    // Two commands per session, submitted A,B,C.
    ctx.submit(a, 0xa1, 0, 1);
    ctx.submit(b, 0xb1, 0, 1);
    ctx.submit(c, 0xc1, 0, 1);
    ctx.submit(a, 0xa2, 0, 1);
    ctx.submit(b, 0xb2, 0, 1);
    ctx.submit(c, 0xc2, 0, 1);

    // Serve the queue to completion; one kick per completion.
    for _ in 0..6 {
        ctx.advance_ms(1);
        ctx.complete(0, nna_core::regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    }

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec![a, b, c, a, b, c]);
}

/// With all windows zero the highest non-empty priority is
/// always drained first.
#[test]
fn strict_priority_drains_high_priority_first() {
    let mut ctx = TestContext::new(2, Config::default());
    let s_block = ctx.add_session();
    let s_low = ctx.add_session();
    let s_high = ctx.add_session();

    let order = Arc::new(Mutex::new(Vec::new()));
    let hook = order.clone();
    ctx.dev.set_observers(Observers {
        submitted: Some(Box::new(move |_session, cmd, _pri| {
            hook.lock().unwrap().push(cmd);
        })),
        ..Observers::default()
    });

    // Occupy both cores, then queue a low- and a high-priority workload.
    ctx.submit(s_block, 0x10, 1, 2);
    ctx.submit(s_low, 0x20, 0, 2);
    ctx.submit(s_high, 0x30, 2, 2);
    assert_eq!(ctx.kicks().len(), 1);

    ctx.advance_ms(1);
    ctx.complete(0, nna_core::regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    ctx.advance_ms(1);
    ctx.complete(0, nna_core::regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec![0x10, 0x30, 0x20]);
}

/// Under strict priority no low-priority workload runs while
/// high-priority work is ready.
#[test]
fn strict_priority_never_interleaves() {
    let mut ctx = TestContext::new(1, Config::default());
    let session = ctx.add_session();

    let order = Arc::new(Mutex::new(Vec::new()));
    let hook = order.clone();
    ctx.dev.set_observers(Observers {
        submitted: Some(Box::new(move |_session, _cmd, pri| {
            hook.lock().unwrap().push(pri);
        })),
        ..Observers::default()
    });

    for i in 0..8 {
        ctx.submit(session, 0x100 + i, 0, 1);
        ctx.submit(session, 0x200 + i, 2, 1);
    }
    for _ in 0..16 {
        ctx.complete(0, nna_core::regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    }

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen.len(), 16);
    // The first kick happened before any priority-2 work existed; every
    // further decision must drain priority 2 before priority 0.
    let tail = &seen[1..];
    let first_low = tail.iter().position(|&p| p == 0).unwrap();
    assert!(tail[..first_low].iter().all(|&p| p == 2));
    assert_eq!(tail.iter().filter(|&&p| p == 2).count(), 8);
}

/// With non-zero windows the lottery interleaves priorities instead of
/// starving the low one.
#[test]
fn priority_windows_avoid_starvation() {
    let mut config = Config::default();
    config.pri_windows = [100, 0, 100];
    let mut ctx = TestContext::new(1, config);
    let session = ctx.add_session();

    let order = Arc::new(Mutex::new(Vec::new()));
    let hook = order.clone();
    ctx.dev.set_observers(Observers {
        submitted: Some(Box::new(move |_session, _cmd, pri| {
            hook.lock().unwrap().push(pri);
        })),
        ..Observers::default()
    });

    for i in 0..20 {
        ctx.submit(session, 0x100 + i, 0, 1);
    }
    for i in 0..20 {
        ctx.submit(session, 0x200 + i, 2, 1);
    }
    for _ in 0..40 {
        ctx.complete(0, nna_core::regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    }

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen.len(), 40);
    // Both priorities must appear while the other still has work: with
    // equal windows the first 20 decisions all landing on one priority is
    // vanishingly unlikely (and deterministic per seed).
    let first_20 = &seen[..20];
    let low = first_20.iter().filter(|&&p| p == 0).count();
    let high = first_20.iter().filter(|&&p| p == 2).count();
    assert!(low >= 2, "low priority starved: {low}/20");
    assert!(high >= 2, "high priority starved: {high}/20");
    // Everything is eventually served.
    assert_eq!(seen.iter().filter(|&&p| p == 0).count(), 20);
    assert_eq!(seen.iter().filter(|&&p| p == 2).count(), 20);
}

/// The forced scheduling sequence overrides the normal WM/core pick.
#[test]
fn scheduling_sequence_forces_placement() {
    let mut config = Config::default();
    // (wm_id << 8) | core_mask: WM2/core2 then WM0/core0.
    config.scheduling_sequence = vec![0x204, 0x001];
    let mut ctx = TestContext::new(4, config);
    let session = ctx.add_session();

    ctx.submit(session, 1, 0, 1);
    ctx.submit(session, 2, 0, 1);

    let kicks = ctx.kicks();
    assert_eq!(kicks.len(), 2);
    assert_eq!(kicks[0].wm_id, 2);
    assert_eq!(kicks[1].wm_id, 0);
}
