//! Cancellation by command-id mask sweeps queues, rolls back
//! in-flight workloads and emits one synthetic response.

use nna_core::config::Config;
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

/// Cancelling with a zero mask removes everything, drops responses and
/// produces exactly one cancel response.
#[test]
fn cancel_all_rolls_back_and_responds_once() {
    let mut ctx = TestContext::new(4, Config::default());
    let session = ctx.add_session();

    for i in 0..8 {
        ctx.submit(session, 0x100 + i, 0, 1);
    }
    // Four in flight, four still queued.
    assert_eq!(ctx.kicks().len(), 4);
    assert!(ctx.dev.is_busy());

    ctx.dev.cancel(session, 0, 0, true).expect("cancel failed");

    // Exactly one synthetic response, carrying the cancel id.
    let rsp = ctx.dev.read_response(session).expect("cancel response");
    assert_eq!(rsp.cmd_id, 0);
    assert!(ctx.dev.read_response(session).is_none());

    // Nothing matching remains anywhere.
    assert_eq!(ctx.dev.session(session).unwrap().queued_cmds(), 0);
    assert!(!ctx.dev.is_busy());
    assert_eq!(ctx.dev.stats().cnn_kicks_cancelled, 4);

    // The device schedules fresh work normally afterwards.
    ctx.submit(session, 0x900, 0, 1);
    assert_eq!(ctx.kicks().len(), 5);
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0x900);
}

/// Only commands matching `(id & mask) == cmd_id` disappear.
#[test]
fn masked_cancel_is_selective() {
    let mut ctx = TestContext::new(1, Config::default());
    let session = ctx.add_session();

    // 0x10 goes to hardware; 0x11 and 0x20 stay queued.
    ctx.submit(session, 0x10, 0, 1);
    ctx.submit(session, 0x11, 0, 1);
    ctx.submit(session, 0x20, 0, 1);
    assert_eq!(ctx.kicks().len(), 1);

    // Cancel the 0x1x family only.
    ctx.dev.cancel(session, 0x10, 0xf0, true).expect("cancel failed");

    let rsp = ctx.dev.read_response(session).expect("cancel response");
    assert_eq!(rsp.cmd_id, 0x10);

    // 0x20 survived and runs next.
    assert_eq!(ctx.dev.session(session).unwrap().queued_cmds(), 1);
    let kicks = ctx.kicks();
    assert_eq!(kicks.len(), 2);
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0x20);
}

/// Cancelling ids that match nothing touches nothing and stays silent.
#[test]
fn cancel_without_matches_is_a_no_op() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();
    ctx.submit(session, 0x5, 0, 1);

    ctx.dev
        .cancel(session, 0xdead, u32::MAX, true)
        .expect("cancel failed");
    assert!(ctx.dev.read_response(session).is_none());
    assert!(ctx.dev.is_busy());

    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0x5);
}
