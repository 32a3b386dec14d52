//! Interrupt-path tests: error classification, reset minimality, workload
//! id checking and the parity pseudo-bit pipeline.

use nna_core::common::error::rsp_err;
use nna_core::config::Config;
use nna_core::device::PowerState;
use nna_core::regs;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

/// A WM workload watchdog fires; the owning WM is reset, the workload
/// completes with the watchdog flag, and other WMs keep running.
#[test]
fn wm_watchdog_resets_only_the_owning_wm() {
    let mut ctx = TestContext::new(4, Config::default());
    let session = ctx.add_session();

    ctx.submit(session, 0x10, 0, 1); // WM0
    ctx.submit(session, 0x20, 0, 1); // WM1
    assert_eq!(ctx.kicks().len(), 2);

    ctx.advance_ms(1);
    ctx.hw
        .borrow_mut()
        .raise_wm_event(0, regs::WM_EVENT_WM_WL_WDT_EN);
    ctx.fire();

    let rsp = ctx.dev.read_response(session).expect("watchdog response");
    assert_eq!(rsp.cmd_id, 0x10);
    assert_ne!(rsp.err_no, 0);
    assert_ne!(rsp.rsp_err_flags & rsp_err::HW_EVNT_WM_WL_WDT, 0);

    // The second workload is untouched and completes normally.
    assert!(ctx.dev.read_response(session).is_none());
    let stats = ctx.dev.stats();
    assert_eq!(stats.total_failures, 1);
    assert_eq!(stats.cnn_kicks_completed, 1);

    ctx.advance_ms(1);
    ctx.complete(1, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    let rsp = ctx.dev.read_response(session).expect("second response");
    assert_eq!(rsp.cmd_id, 0x20);
    assert_eq!(rsp.err_no, 0);
}

/// A response FIFO entry whose workload id does not match the pending
/// command raises the WL_ID_MISMATCH pseudo-bit.
#[test]
fn wl_id_mismatch_is_flagged() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();

    ctx.submit(session, 0x42, 0, 1);
    let kick = ctx.hw.borrow().last_kick(0).unwrap();

    {
        let mut hw = ctx.hw.borrow_mut();
        hw.push_response(
            0,
            regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN,
            kick.wl_id.wrapping_add(7),
            0,
        );
        hw.raise_wm_event(0, regs::WM_EVENT_RESPONSE_FIFO_READY_EN);
    }
    ctx.fire();

    let rsp = ctx.dev.read_response(session).expect("mismatch response");
    assert_eq!(rsp.cmd_id, 0x42);
    assert_ne!(rsp.rsp_err_flags & rsp_err::SW_WL_ID_MISMATCH_ERROR, 0);
    assert_ne!(rsp.err_no, 0);
    assert_eq!(ctx.dev.stats().total_failures, 1);
}

/// Concurrently pending workloads never share a hardware
/// workload id.
#[test]
fn inflight_workload_ids_are_unique() {
    let mut ctx = TestContext::new(4, Config::default());
    let session = ctx.add_session();
    for i in 0..4 {
        ctx.submit(session, 0x100 + i, 0, 1);
    }
    let kicks = ctx.kicks();
    assert_eq!(kicks.len(), 4);
    let mut ids: Vec<u16> = kicks.iter().map(|k| k.wl_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4, "duplicate in-flight workload ids");
    // The WM id is encoded in the upper nibble of the workload id.
    for kick in &kicks {
        assert_eq!(kick.wl_id >> 12, u16::from(kick.wm_id));
    }
}

/// A full-reset-class system event fails every in-flight workload and
/// powers the device down for the reset.
#[test]
fn full_reset_class_event_fails_everything() {
    let mut ctx = TestContext::new(4, Config::default());
    let session = ctx.add_session();
    ctx.submit(session, 0x1, 0, 1);
    ctx.submit(session, 0x2, 0, 1);

    ctx.advance_ms(1);
    ctx.hw
        .borrow_mut()
        .raise_sys_event(regs::SYS_EVENT_SYS_MEM_WDT_EN);
    ctx.fire();

    // Both workloads completed with the watchdog flag.
    let mut cmd_ids = Vec::new();
    while let Some(rsp) = ctx.dev.read_response(session) {
        assert_ne!(rsp.rsp_err_flags & rsp_err::HW_SYS_MEM_WDT, 0);
        assert_ne!(rsp.err_no, 0);
        cmd_ids.push(rsp.cmd_id);
    }
    cmd_ids.sort_unstable();
    assert_eq!(cmd_ids, vec![0x1, 0x2]);
    // Nothing queued, nothing busy, device off after the reset.
    assert!(!ctx.dev.is_busy());
    assert_eq!(ctx.dev.power_state(), PowerState::Off);
}

/// RAM correction is counted but triggers no reset and fails nothing.
#[test]
fn ram_correction_does_not_reset() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();
    ctx.submit(session, 0x5, 0, 1);

    ctx.hw
        .borrow_mut()
        .raise_sys_event(regs::SYS_EVENT_RAM_CORRECTION_EN);
    ctx.fire();

    // The workload is still in flight; only the counter moved.
    assert!(ctx.dev.read_response(session).is_none());
    assert!(ctx.dev.is_busy());
    assert_eq!(ctx.dev.stats().ram_corrections, 1);

    ctx.advance_ms(1);
    ctx.complete(0, regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN);
    let rsp = ctx.dev.read_response(session).unwrap();
    assert_eq!(rsp.err_no, 0);
}

/// A corrupted parity-protected status register is re-read, flagged
/// through the PARITY pseudo-bit and escalated to a full reset.
#[test]
fn parity_corruption_escalates_to_full_reset() {
    let mut config = Config::default();
    config.parity_disable = false;
    let mut ctx = TestContext::with_parity(2, true, config);
    let session = ctx.add_session();
    ctx.submit(session, 0x77, 0, 1);

    // MMU parity error: a single set bit also fails the register parity
    // check, so the top half re-reads and raises the pseudo-bit.
    ctx.advance_ms(1);
    ctx.hw
        .borrow_mut()
        .raise_sys_event(regs::SYS_EVENT_MMU_PARITY_ERROR_EN);
    ctx.fire();

    let rsp = ctx.dev.read_response(session).expect("parity response");
    assert_ne!(rsp.rsp_err_flags & rsp_err::HW_SYS_MMU_PARITY_ERROR, 0);
    assert_ne!(rsp.rsp_err_flags & rsp_err::SW_SYS_EVNT_PARITY_ERROR, 0);
    assert_eq!(ctx.dev.power_state(), PowerState::Off);
}
