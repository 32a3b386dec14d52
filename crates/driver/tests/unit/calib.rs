//! One-shot clock calibration via a deliberate watchdog interrupt.

use nna_core::config::Config;
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

#[test]
fn calibration_measures_frequency_and_runs_once() {
    let mut config = Config::default();
    config.do_calibration = true;
    config.calibration_cycles = 600_000;
    let mut ctx = TestContext::new(2, config);
    let session = ctx.add_session();

    // Normal scheduling is suppressed while calibration is pending.
    ctx.submit(session, 0x1, 0, 1);
    assert!(ctx.dev.calibration_pending());
    assert_eq!(ctx.kicks().len(), 0);
    assert!(ctx.dev.freq_khz().is_none());

    // The calibration kick goes to WM0.
    ctx.dev.start_calibration().expect("calibration start");
    assert_eq!(ctx.kicks().len(), 1);
    assert_eq!(ctx.kicks()[0].wm_id, 0);

    // The watchdog fires after ~10 ms of "execution".
    ctx.advance_ms(10);
    ctx.hw
        .borrow_mut()
        .raise_core_event(0, regs::CORE_EVENT_CORE_WDT_EN);
    ctx.fire();

    // 600k cycles over ~10 ms ≈ 60 MHz.
    let freq = ctx.dev.freq_khz().expect("frequency measured");
    assert!((50_000..=70_000).contains(&freq), "freq {freq} out of range");
    assert!(!ctx.dev.calibration_pending());

    // The suppressed submission was scheduled right after.
    assert_eq!(ctx.kicks().len(), 2);
    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    assert_eq!(ctx.dev.read_response(session).unwrap().cmd_id, 0x1);

    // A later watchdog on core 0 no longer re-enters calibration.
    ctx.hw
        .borrow_mut()
        .raise_core_event(0, regs::CORE_EVENT_CORE_WDT_EN);
    ctx.fire();
    assert_eq!(ctx.dev.freq_khz(), Some(freq));
}
