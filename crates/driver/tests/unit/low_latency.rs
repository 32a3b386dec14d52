//! Low-latency queueing: a second workload is pre-configured on a busy WM
//! and kicked by software when the pending one retires.

use nna_core::config::{Config, LowLatency};
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

#[test]
fn sw_kick_defers_the_second_kick_to_completion() {
    let mut config = Config::default();
    config.low_latency = LowLatency::SwKick;
    let mut ctx = TestContext::new(1, config);
    let session = ctx.add_session();

    ctx.submit(session, 0x1, 0, 1);
    ctx.submit(session, 0x2, 0, 1);

    // Only the first workload was kicked; the second sits queued on the
    // same assignment.
    assert_eq!(ctx.kicks().len(), 1);
    assert_eq!(ctx.dev.stats().cnn_kicks_queued, 1);
    assert!(ctx.dev.ledger().assignments.iter().any(|a| a.queued));

    // Completing the first emits the deferred kick for the second.
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0x1);
    assert_eq!(ctx.kicks().len(), 2);
    assert_eq!(ctx.kicks()[1].wm_id, 0);

    // The cores never went free in between.
    assert!(ctx.dev.is_busy());

    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0x2);
    assert!(!ctx.dev.is_busy());
}

#[test]
fn third_workload_waits_until_a_slot_frees() {
    let mut config = Config::default();
    config.low_latency = LowLatency::SwKick;
    let mut ctx = TestContext::new(1, config);
    let session = ctx.add_session();

    ctx.submit(session, 0x1, 0, 1);
    ctx.submit(session, 0x2, 0, 1);
    ctx.submit(session, 0x3, 0, 1);
    assert_eq!(ctx.kicks().len(), 1);

    // First completion: 0x2 gets the deferred kick, 0x3 takes the queued
    // position.
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.kicks().len(), 2);
    assert!(ctx.dev.ledger().assignments.iter().any(|a| a.queued));

    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.kicks().len(), 3);

    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);

    let ids: Vec<u32> = std::iter::from_fn(|| ctx.dev.read_response(session))
        .map(|rsp| rsp.cmd_id)
        .collect();
    assert_eq!(ids, vec![0x1, 0x2, 0x3]);
}
