//! Core clock calibration.
//!
//! Measures the core clock by arming the core 0 watchdog with a known count
//! and timing the resulting interrupt. The command decoder clock is gated so
//! the watchdog, not a completion, raises the event, and the MMU is bypassed
//! so no buffers are needed. Runs at most once per device lifetime; normal
//! scheduling is suppressed while it is pending.

use tracing::{debug, info, warn};

use crate::common::CoreError;
use crate::device::Device;
use crate::hw::power::{CALIBRATION_CORE_MASK, CALIBRATION_WM_ID};
use crate::hw::wm;
use crate::io::Platform;
use crate::regs;

impl<P: Platform> Device<P> {
    /// Powers the calibration core and kicks the watchdog workload.
    ///
    /// The measurement completes in the interrupt bottom half; until then
    /// the scheduler worker refuses to run.
    pub fn start_calibration(&mut self) -> Result<(), CoreError> {
        self.do_calibration = true;
        self.dev_start()?;
        self.cnn_start_calib();
        Ok(())
    }

    /// Generates a deliberate watchdog interrupt on WM0/core0.
    fn cnn_start_calib(&mut self) {
        let cycles = u64::from(self.config.calibration_cycles);
        debug!(cycles, "starting clock calibration");

        // Use WM0 and core 0.
        let image = wm::assign_cores(
            &mut self.wm_core_assignment,
            CALIBRATION_WM_ID,
            CALIBRATION_CORE_MASK,
        );
        self.io.write64_pdump(regs::CORE_ASSIGNMENT, image);
        self.io
            .write64(regs::CORE_CTRL_INDIRECT, u64::from(CALIBRATION_CORE_MASK));

        // Core watchdogs with the known count.
        self.io.write64(regs::CNN_WDT_COMPAREMATCH, cycles);
        self.io.write64(regs::CNN_WDT_CTRL, regs::WDT_MODE_KICK_PASS);
        self.io
            .write64(regs::CNN_MEM_WDT_COMPAREMATCH, self.config.core_mem_wdt_cycles);
        self.io.write64(regs::CNN_MEM_WDT_CTRL, regs::WDT_MODE_KICK_PASS);

        // Gate the command decoder clock so the WDT fires without any
        // buffer address programmed.
        let mut clk = self.io.read64(regs::CLK_CTRL0);
        clk &= !regs::CLK_CNN_CMD_MASK;
        self.io.write64(regs::CLK_CTRL0, clk);
        // Make sure the decoder clock has actually switched off.
        self.io.udelay(100);

        // Core events go straight to the host for this one workload.
        self.io
            .write64(regs::CORE_EVENT_HOST_ENABLE, regs::CORE_EVENTS_DEFAULT);
        self.io
            .write64(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENTS_DEFAULT);

        // Minimum command stream size.
        self.io.write64(
            regs::OS0_CNN_CONTROL,
            regs::set_field(
                2048 / 32 - 1,
                regs::OS0_CNN_CONTROL_CMD_SIZE_MIN1_SHIFT,
                regs::OS0_CNN_CONTROL_CMD_SIZE_MIN1_MASK,
            ),
        );

        self.io
            .write64_pdump(regs::OS0_MMU_CTRL, regs::OS0_MMU_CTRL_BYPASS_EN);

        self.io.select_wm(CALIBRATION_WM_ID);
        self.io.write64(regs::WM_EVENT_ENABLE, 0);
        self.io
            .write64(regs::WM_WL_CONTROL, regs::WM_WL_CONTROL_WL_START_EN);

        let now = self.io.now_ns();
        self.stats.wm_stats[CALIBRATION_WM_ID as usize].hw_proc_start_ns = now;
    }

    /// Bottom-half hook: consumes the calibration interrupt if one is
    /// pending. Returns `true` when this pass was the calibration.
    pub(crate) fn check_calibration(&mut self) -> bool {
        if self.stats.last_proc_us == 0 || !self.do_calibration {
            return false;
        }
        // Stop the calibration core before the measurement is published.
        if let Err(err) = self.dev_stop(true) {
            warn!(%err, "stopping calibration core failed");
        }
        self.measure_core_freq();
        self.do_calibration = false;
        // Something may have been enqueued in the meantime.
        self.kick_worker();
        true
    }

    /// Computes `freq_khz = cycles / proc_ms` from the measured span.
    fn measure_core_freq(&mut self) {
        let proc_ms = self.stats.last_proc_us / 1000;
        if proc_ms > 0 {
            let freq = u64::from(self.config.calibration_cycles) / proc_ms;
            self.io.freq_khz = Some(freq as u32);
            info!(freq_khz = freq, "measured core clock frequency");
        } else {
            warn!("cannot measure core clock frequency");
        }
    }
}
