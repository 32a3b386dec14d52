//! Suspend/resume with in-flight workloads: processing is stopped, rolled
//! back, and rescheduled on resume.

use nna_core::config::Config;
use nna_core::device::PowerState;
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

#[test]
fn suspend_rolls_back_and_resume_reschedules() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();

    ctx.submit(session, 0x42, 0, 1);
    assert_eq!(ctx.kicks().len(), 1);

    ctx.dev.suspend().expect("suspend failed");
    assert_eq!(ctx.dev.power_state(), PowerState::Off);
    assert!(!ctx.dev.is_busy());
    // The workload went back to its queue, not to a response.
    assert!(ctx.dev.read_response(session).is_none());
    assert_eq!(ctx.dev.session(session).unwrap().queued_cmds(), 1);
    assert_eq!(ctx.dev.stats().cnn_kicks_aborted, 1);

    ctx.dev.resume();
    assert_eq!(ctx.kicks().len(), 2);
    assert_eq!(ctx.dev.power_state(), PowerState::On);

    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    let rsp = ctx.dev.read_response(session).expect("response after resume");
    assert_eq!(rsp.cmd_id, 0x42);
    assert_eq!(rsp.err_no, 0);
}

#[test]
fn idle_suspend_resume_is_clean() {
    let mut ctx = TestContext::new(2, Config::default());
    let _session = ctx.add_session();
    ctx.dev.suspend().expect("suspend failed");
    assert_eq!(ctx.dev.power_state(), PowerState::Off);
    ctx.dev.resume();
    assert_eq!(ctx.kicks().len(), 0);
}
