//! Software watchdog: workloads pending past their budget are force-failed.

use nna_core::common::error::rsp_err;
use nna_core::config::Config;
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

#[test]
fn overdue_workload_is_failed_with_swd_flag() {
    let mut config = Config::default();
    config.swd_period_ms = 10;
    config.swd_timeout_default_us = 5_000;
    let mut ctx = TestContext::new(2, config);
    let session = ctx.add_session();

    ctx.submit(session, 0xabc, 0, 1);
    assert_eq!(ctx.kicks().len(), 1);

    // Within budget: nothing happens.
    ctx.advance_ms(1);
    ctx.dev.poll_software_watchdog();
    assert!(ctx.dev.read_response(session).is_none());
    assert!(ctx.dev.is_busy());

    // Past budget: the workload fails with the software watchdog flag.
    ctx.advance_ms(10);
    ctx.dev.poll_software_watchdog();
    let rsp = ctx.dev.read_response(session).expect("watchdog response");
    assert_eq!(rsp.cmd_id, 0xabc);
    assert_ne!(rsp.rsp_err_flags & rsp_err::SW_WDT_EXPIRED, 0);
    assert_ne!(rsp.err_no, 0);
    assert!(!ctx.dev.is_busy());
    assert_eq!(ctx.dev.stats().total_failures, 1);

    // Fresh work still schedules.
    ctx.submit(session, 0xdef, 0, 1);
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0xdef);
}

#[test]
fn disabled_watchdog_never_fires() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();
    ctx.submit(session, 0x1, 0, 1);
    ctx.advance_ms(1_000);
    ctx.dev.poll_software_watchdog();
    assert!(ctx.dev.read_response(session).is_none());
    assert!(ctx.dev.is_busy());
}
