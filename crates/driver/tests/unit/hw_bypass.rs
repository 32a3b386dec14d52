//! The `hw_bypass` countdown completes submissions without touching
//! hardware until it runs out.

use nna_core::common::error::rsp_err;
use nna_core::config::Config;
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

#[test]
fn bypass_skips_exactly_the_configured_number_of_kicks() {
    let mut config = Config::default();
    config.hw_bypass = 1;
    let mut ctx = TestContext::new(4, config);
    let session = ctx.add_session();

    ctx.submit(session, 0x1, 0, 1);
    ctx.submit(session, 0x2, 0, 1);
    ctx.submit(session, 0x3, 0, 1);

    // The first submission never reached hardware.
    let kicks = ctx.kicks();
    assert_eq!(kicks.len(), 2);
    assert_eq!(ctx.dev.stats().cnn_kicks, 2);

    let rsp = ctx.dev.read_response(session).expect("bypassed response");
    assert_eq!(rsp.cmd_id, 0x1);
    assert_ne!(rsp.rsp_err_flags & rsp_err::SW_SKIP_CMD, 0);
    assert!(ctx.dev.read_response(session).is_none());

    // The remaining two go to hardware and complete normally.
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    ctx.advance_ms(1);
    ctx.complete(1, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);

    let mut ids: Vec<u32> = std::iter::from_fn(|| ctx.dev.read_response(session))
        .map(|rsp| rsp.cmd_id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0x2, 0x3]);
}
