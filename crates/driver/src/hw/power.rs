//! Reset and power engine.
//!
//! Per-core power-domain sequencing, the full-system reset, clock control
//! and lazy power management. It provides:
//! 1. **Power events:** the `POWER_EVENT` request/complete handshake.
//! 2. **Reset:** the per-core assert/deassert + scrub sequence and the
//!    system-level extension (interconnect/SLC/MH/WM, SOCM scrub, register
//!    bank). The pdump-visible ordering is load-bearing: regression
//!    simulations replay it verbatim.
//! 3. **Start/stop:** lazy power-up of exactly the cores the ledger needs,
//!    and the inverse.
//! 4. **APM:** timer-delayed per-core stop once a core goes idle.

use tracing::{debug, error, warn};

use crate::common::{id_to_mask, mask_ids, CoreError};
use crate::config::defaults;
use crate::device::{Device, PowerState};
use crate::hw::wm;
use crate::io::Platform;
use crate::regs;
use crate::sched::ledger::HwSchedInfo;

/// Calibration always runs on WM0/core0.
pub const CALIBRATION_WM_ID: u8 = 0;
/// Core mask used by calibration.
pub const CALIBRATION_CORE_MASK: u8 = 1;

impl<P: Platform> Device<P> {
    /// Runs one `POWER_EVENT` handshake: clear pending, trigger, wait for
    /// completion, clear completion.
    fn set_power_event(&mut self, event: u64) -> Result<(), CoreError> {
        let io = &mut self.io;
        // Clear any pending power events.
        io.write64_pdump(regs::POWER_EVENT, 0);
        io.poll64(
            regs::SYS_EVENT_STATUS,
            0,
            regs::SYS_EVENT_POWER_COMPLETE_EN | regs::SYS_EVENT_POWER_ABORT_EN,
            100,
            1000,
        )?;
        // Trigger the transition.
        io.write64_pdump(regs::POWER_EVENT, event);
        io.poll64(
            regs::SYS_EVENT_STATUS,
            regs::SYS_EVENT_POWER_COMPLETE_EN,
            regs::SYS_EVENT_POWER_COMPLETE_EN,
            100,
            1000,
        )?;
        // Switch the event off and clear the completion status.
        io.write64_pdump(regs::POWER_EVENT, 0);
        io.write64_pdump(regs::SYS_EVENT_CLEAR, regs::SYS_EVENT_POWER_COMPLETE_EN);
        io.poll64(
            regs::SYS_EVENT_STATUS,
            0,
            regs::SYS_EVENT_POWER_COMPLETE_EN,
            100,
            1000,
        )
    }

    /// Powers the domains of `core_mask` up. Domain 0 is the always-on TLC,
    /// so core domains sit one bit higher.
    fn prepare_cores(&mut self, core_mask: u8) -> Result<(), CoreError> {
        self.io.comment("-- Trigger POWER UP domain event");
        let event = regs::set_field(
            u64::from(core_mask) << 1,
            regs::POWER_EVENT_DOMAIN_SHIFT,
            regs::POWER_EVENT_DOMAIN_MASK,
        ) | regs::POWER_EVENT_TYPE_POWER_UP_EN
            | regs::POWER_EVENT_REQ_EN;
        self.set_power_event(event)
    }

    /// Powers the domains of `core_mask` down.
    fn flush_cores(&mut self, core_mask: u8) -> Result<(), CoreError> {
        self.io.comment("-- Deselect any cores");
        self.io.write64_pdump(regs::CORE_CTRL_INDIRECT, 0);
        self.io.comment("-- Trigger POWER DOWN domain event");
        let event = regs::set_field(
            u64::from(core_mask) << 1,
            regs::POWER_EVENT_DOMAIN_SHIFT,
            regs::POWER_EVENT_DOMAIN_MASK,
        ) | regs::POWER_EVENT_REQ_EN;
        self.set_power_event(event)
    }

    /// Enables automatic clock gating system-wide and on `core_mask`.
    fn enable_clocks(&mut self, core_mask: u8) {
        self.io.comment("-- Enable SYS clocks");
        self.io
            .write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_default(regs::CLK_MODE_AUTO));
        // Dummy status read to settle the clock tree.
        let _ = self.io.read64_pdump(regs::SYS_CLK_STATUS0);
        self.io.comment("-- Enable MAIN clocks on cores");
        self.io
            .write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(core_mask));
        self.io
            .write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_AUTO));
    }

    /// Waits for idle and gates clocks on `core_mask`; with `sys_release`
    /// the system clock tree follows (register bank stays on).
    fn disable_clocks(&mut self, core_mask: u8, sys_release: bool) -> Result<(), CoreError> {
        if sys_release {
            for wm_id in 0..self.props.num_cores {
                self.io.select_wm(wm_id);
                self.io.comment(format!("-- Wait for WM{wm_id} IDLE state"));
                let ret = self.io.poll64_parity(
                    regs::WM_STATUS,
                    regs::WM_STATUS_STATE_IDLE,
                    regs::WM_STATUS_STATE_MASK,
                    100,
                    1000,
                );
                if let Err(err) = ret {
                    error!(wm_id, "waiting for WM IDLE state failed, resetting WM");
                    let info = HwSchedInfo {
                        wm_id,
                        core_mask: 0,
                        ..HwSchedInfo::default()
                    };
                    let _ = wm::wm_reset(&mut self.io, &info);
                    return Err(err);
                }
            }
        }
        wm::release_cores(&mut self.io, &mut self.wm_core_assignment, core_mask, true);

        self.io.comment("-- Address cores");
        self.io
            .write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(core_mask));
        self.io.comment("-- Wait for clocks IDLE state");
        self.io
            .poll64(regs::CLK_STATUS0, 0, regs::CLK_STATUS0_MASKFULL, 100, 1000)
            .map_err(|err| {
                error!("waiting for clocks IDLE state failed");
                err
            })?;

        if sys_release {
            self.io.comment("-- Wait for memory bus interface IDLE state");
            self.io
                .poll64(
                    regs::SLC_IDLE,
                    regs::SLC_IDLE_MASKFULL,
                    regs::SLC_IDLE_MASKFULL,
                    1000,
                    1000,
                )
                .map_err(|err| {
                    error!("waiting for memory bus interface IDLE state failed");
                    err
                })?;
        }

        self.io.comment("-- Disable MAIN clocks");
        self.io.write64_pdump(regs::CLK_CTRL0, 0);
        if sys_release {
            self.io.comment("-- Disable SYS clocks (except REGBANK)");
            self.io.write64_pdump(
                regs::SYS_CLK_CTRL0,
                regs::CLK_MODE_AUTO << regs::SYS_CLK_REGBANK_SHIFT,
            );
        }
        Ok(())
    }

    /// Global reset: per-core sequence for every unassigned core in
    /// `core_mask`, then (with `sys_reset`) the system-level extension.
    pub(crate) fn dev_reset(&mut self, core_mask: u8, sys_reset: bool) -> Result<(), CoreError> {
        let mut core_mask = core_mask;
        debug!(core_mask, sys_reset, "device reset");
        self.io.comment("-- Top level RESET sequence BEGIN");

        if sys_reset {
            // First reset all WMs with cores assigned.
            for wm_id in 0..self.props.num_cores {
                let assigned = wm::get_cores(self.wm_core_assignment, wm_id);
                if assigned != 0 {
                    let info = HwSchedInfo {
                        wm_id,
                        core_mask: assigned,
                        ..HwSchedInfo::default()
                    };
                    let _ = wm::wm_reset(&mut self.io, &info);
                    core_mask &= !assigned;
                }
            }
        }

        self.io.comment("-- Resetting cores");
        for id in mask_ids(core_mask) {
            let mask = id_to_mask(id);
            let io = &mut self.io;

            // Reset assertion.
            io.comment(format!("-- Select core{id}"));
            io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(mask));
            io.comment(format!("-- Disable page fault interrupts for core{id}"));
            let mut val = io.read64(regs::SYS_EVENT_ENABLE);
            val &= !regs::set_field(
                u64::from(mask),
                regs::SYS_EVENT_MMU_PAGE_FAULT_SHIFT,
                regs::SYS_EVENT_MMU_PAGE_FAULT_MASK,
            );
            io.write64_pdump(regs::SYS_EVENT_ENABLE, val);
            io.comment(format!(
                "-- Force global clocks ON for core{id} (others set to AUTO)"
            ));
            io.write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_reset(mask));
            io.comment(format!("-- Set all core{id} level clocks to AUTO"));
            io.write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_AUTO));
            io.comment(format!("-- Perform soft reset on core{id}"));
            io.write64_pdump(regs::CORE_SOFT_RESET, regs::CORE_SOFT_RESET_CORE_RESET_EN);
            let _ = io.read64_pdump(regs::CORE_SOFT_RESET);
            io.write64_pdump(regs::CORE_SOFT_RESET, 0);
            io.comment(format!("-- Wait until core{id} memory bus reset has completed"));
            io.poll64(
                regs::CORE_EVENT_HOST_STATUS,
                regs::CORE_EVENT_MEMBUS_RESET_DONE_EN,
                regs::CORE_EVENT_MEMBUS_RESET_DONE_EN,
                100,
                1000,
            )?;
            io.comment(format!("-- Clear core{id} memory bus reset interrupt"));
            io.write64_pdump(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENT_MEMBUS_RESET_DONE_EN);
            io.comment(format!("-- Deselect core{id}"));
            io.write64_pdump(regs::CORE_CTRL_INDIRECT, 0);
            io.comment("-- Ensure no resets are pending");
            io.write64_pdump(regs::SYS_RESET_CTRL, 0);
            io.comment(format!("-- Move core{id} into full reset state"));
            let val = regs::set_field(
                u64::from(mask),
                regs::SYS_RESET_CTRL_CORE_SHIFT,
                regs::SYS_RESET_CTRL_CORE_MASK,
            );
            io.write64_pdump(regs::SYS_RESET_CTRL, val);
            let _ = io.read64_pdump(regs::SYS_RESET_CTRL);

            // Reset deassertion.
            io.comment(format!("-- Move core{id} out of reset state"));
            io.write64_pdump(regs::SYS_RESET_CTRL, 0);
            let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
            io.comment(format!("-- Select core{id} again"));
            io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(mask));
            io.comment("-- Force core clocks ON for everything");
            io.write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_ON));
            io.comment(format!("-- Perform core{id} level RAM initialisation"));
            io.write64_pdump(regs::FUSA_CONTROL, regs::FUSA_CONTROL_ECC_INIT_KICK_EN);
            io.comment(format!("-- Perform core{id} LOCM scrubbing"));
            io.write64_pdump(regs::LOCM_SCRUB_CTRL, regs::SCRUB_KICK_EN);
            io.comment("-- Wait until the RAM initialisation sequence has completed");
            io.poll64(
                regs::CORE_EVENT_HOST_STATUS,
                regs::CORE_EVENT_RAM_INIT_DONE_EN,
                regs::CORE_EVENT_RAM_INIT_DONE_EN,
                100,
                1000,
            )?;
            io.comment(format!("-- Clear core{id} RAM reset interrupt"));
            io.write64_pdump(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENT_RAM_INIT_DONE_EN);
            io.comment(format!("-- Confirm that core{id} RAM reset interrupt is cleared"));
            io.poll64(
                regs::CORE_EVENT_HOST_STATUS,
                0,
                regs::CORE_EVENT_RAM_INIT_DONE_EN,
                10,
                100,
            )?;
            io.comment("-- Wait until the LOCM scrubbing sequence has completed.");
            io.poll64(
                regs::CORE_EVENT_HOST_STATUS,
                regs::CORE_EVENT_LOCM_SCRUB_DONE_EN,
                regs::CORE_EVENT_LOCM_SCRUB_DONE_EN,
                100,
                1000,
            )?;
            io.comment(format!("-- Deassert core{id} LOCM scrubbing"));
            io.write64_pdump(regs::LOCM_SCRUB_CTRL, 0);
            io.comment(format!("-- Clear core{id} LOCM scrub interrupt"));
            io.write64_pdump(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENT_LOCM_SCRUB_DONE_EN);
            io.comment(format!("-- Confirm that core{id} LOCM scrub interrupt is cleared"));
            io.poll64(
                regs::CORE_EVENT_HOST_STATUS,
                0,
                regs::CORE_EVENT_LOCM_SCRUB_DONE_EN,
                10,
                100,
            )?;
            io.comment("-- Enable CORE events to WM");
            io.write64_pdump(regs::CORE_EVENT_WM_ENABLE, regs::CORE_EVENTS_DEFAULT);
            io.comment("-- Clear CORE events on WM");
            io.write64_pdump(
                regs::CORE_EVENT_WM_CLEAR,
                regs::CORE_EVENTS_DEFAULT
                    | regs::CORE_EVENT_RAM_INIT_DONE_EN
                    | regs::CORE_EVENT_LOCM_SCRUB_DONE_EN
                    | regs::CORE_EVENT_MEMBUS_RESET_DONE_EN,
            );
            io.comment("-- Enable INTERCONNECT events to WM");
            io.write64_pdump(regs::INTERCONNECT_EVENT_WM_ENABLE, regs::IC_EVENTS_DEFAULT);
            io.comment("-- Disable CORE events on host");
            io.write64_pdump(regs::CORE_EVENT_HOST_ENABLE, 0);
            io.comment(format!("-- Set all core{id} level clocks back to AUTO"));
            io.write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_AUTO));
            io.comment(format!("-- Set core{id} global clock back to AUTO"));
            io.write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_default(regs::CLK_MODE_AUTO));

            if self.config.membus_sys_stall_ratio != 0 {
                let ratio = self.config.membus_sys_stall_ratio;
                io.write64(regs::MEMBUS_SYS_STALL_RATIO, ratio);
            }
        }

        if !sys_reset {
            return Ok(());
        }

        debug!("handling system level reset");
        let io = &mut self.io;
        io.comment("-- Move other modules into reset state");
        let val = regs::set_field(0xff, regs::SYS_RESET_CTRL_WM_SHIFT, regs::SYS_RESET_CTRL_WM_MASK)
            | regs::SYS_RESET_CTRL_INTERCONNECT_EN
            | regs::SYS_RESET_CTRL_SLC_EN
            | regs::SYS_RESET_CTRL_MH_EN;
        io.write64_pdump(regs::SYS_RESET_CTRL, val);
        let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
        io.comment("-- Move other modules out of reset state");
        io.write64_pdump(regs::SYS_RESET_CTRL, 0);
        let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
        io.comment("-- Wait until sys memory bus reset has completed");
        io.poll64(
            regs::SYS_EVENT_STATUS,
            regs::SYS_EVENT_MEMBUS_RESET_DONE_EN,
            regs::SYS_EVENT_MEMBUS_RESET_DONE_EN,
            100,
            1000,
        )?;
        io.comment("-- Clear memory bus reset status");
        io.write64_pdump(regs::SYS_EVENT_CLEAR, regs::SYS_EVENT_MEMBUS_RESET_DONE_EN);
        io.comment("-- Force all system level clocks ON (except core)");
        let mut clocks = io.read64(regs::SYS_CLK_CTRL0);
        clocks &= regs::clocks_multi(regs::SYS_CLK_CORE0_SHIFT, 0x3, 0xff);
        clocks |= regs::sys_clocks_default(regs::CLK_MODE_ON)
            & !regs::clocks_multi(regs::SYS_CLK_CORE0_SHIFT, 0x3, 0xff);
        io.write64_pdump(regs::SYS_CLK_CTRL0, clocks);
        io.comment("-- Initiate system RAM initialisation");
        io.write64_pdump(regs::SYS_RAM_INIT, regs::SCRUB_KICK_EN);
        io.comment("-- Initiate system SOCM scrubbing");
        io.write64_pdump(regs::SOCM_SCRUB_CTRL, regs::SCRUB_KICK_EN);
        io.comment("-- Wait until the RAM initialisation sequence has completed");
        io.poll64(
            regs::SYS_EVENT_STATUS,
            regs::SYS_EVENT_RAM_INIT_DONE_EN,
            regs::SYS_EVENT_RAM_INIT_DONE_EN,
            100,
            1000,
        )?;
        io.comment("-- Wait until the SOCM scrubbing sequence has completed");
        io.poll64(
            regs::SYS_EVENT_STATUS,
            regs::SYS_EVENT_SOCM_SCRUB_DONE_EN,
            regs::SYS_EVENT_SOCM_SCRUB_DONE_EN,
            100,
            1000,
        )?;
        io.comment("-- Deassert system SOCM scrubbing");
        io.write64_pdump(regs::SOCM_SCRUB_CTRL, 0);
        io.comment("-- Clear sys events");
        io.write64_pdump(
            regs::SYS_EVENT_CLEAR,
            regs::SYS_EVENT_RAM_INIT_DONE_EN | regs::SYS_EVENT_SOCM_SCRUB_DONE_EN,
        );
        io.comment("-- Set all sys clocks back to AUTO");
        io.write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_default(regs::CLK_MODE_AUTO));
        io.comment("-- Reset the system level register banks");
        io.write64_pdump(regs::SYS_RESET_CTRL, regs::SYS_RESET_CTRL_REGBANK_EN);
        let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
        io.write64_pdump(regs::SYS_RESET_CTRL, 0);
        let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
        io.comment("-- Top level RESET sequence END");

        // The register bank reset wiped the assignment mirror.
        self.wm_core_assignment = regs::ASSIGNMENT_ALL_UNALLOCATED;

        if self.config.sysbus_host_stall_ratio != 0 {
            let ratio = self.config.sysbus_host_stall_ratio;
            self.io.write64(regs::SYSBUS_HOST_STALL_RATIO, ratio);
        }
        Ok(())
    }

    /// One-time device setup after power-on: MMU virtual ranges and ECC
    /// correction thresholds.
    fn dev_setup(&mut self) {
        let page = self.config.mmu_page_size;
        let io = &mut self.io;

        io.comment(format!(
            "-- MMU set virtual address range0:{:#x}-{:#x}",
            defaults::VA_HEAP1_BASE,
            defaults::VA_HEAP1_SIZE
        ));
        let mut val = page.range_encoding() << regs::MMU_RANGE_PAGE_SIZE_SHIFT;
        val |= (defaults::VA_HEAP1_BASE >> 12) << regs::MMU_RANGE_BASE_ADDR_SHIFT;
        val |= ((defaults::VA_HEAP1_BASE + defaults::VA_HEAP1_SIZE) >> 12)
            << regs::MMU_RANGE_END_ADDR_SHIFT;
        io.write64_pdump(regs::MMU_PAGE_SIZE_RANGE_ONE, val);

        io.comment(format!(
            "-- MMU set virtual address range1:{:#x}-{:#x}",
            defaults::VA_HEAP2_BASE,
            defaults::VA_HEAP2_SIZE
        ));
        let mut val = page.range_encoding() << regs::MMU_RANGE_PAGE_SIZE_SHIFT;
        val |= (defaults::VA_HEAP2_BASE >> 12) << regs::MMU_RANGE_BASE_ADDR_SHIFT;
        val |= ((defaults::VA_HEAP2_BASE + defaults::VA_HEAP2_SIZE) >> 12)
            << regs::MMU_RANGE_END_ADDR_SHIFT;
        io.write64_pdump(regs::MMU_PAGE_SIZE_RANGE_TWO, val);

        io.write64_pdump(
            regs::SYS_EVENT_THRESHOLD,
            u64::from(self.config.sys_ram_correction_threshold),
        );
        io.write64_pdump(
            regs::CORE_EVENT_WM_THRESHOLD,
            u64::from(self.config.core_wm_ram_correction_threshold),
        );
        io.write64_pdump(
            regs::CORE_EVENT_HOST_THRESHOLD,
            u64::from(self.config.core_host_ram_correction_threshold),
        );
    }

    /// Enables and clears events so `core_mask` can raise interrupts.
    fn dev_ready(&mut self, core_mask: u8, sys_setup: bool) {
        let io = &mut self.io;
        if sys_setup {
            io.comment("-- Enable SYS events");
            io.write64_pdump(regs::SYS_EVENT_ENABLE, regs::SYS_EVENTS_DEFAULT);
            io.comment("-- Clear SYS events");
            io.write64_pdump(regs::SYS_EVENT_CLEAR, regs::SYS_EVENTS_DEFAULT);
            for wm_id in 0..self.props.num_cores {
                io.comment(format!("-- Select WM{wm_id}"));
                io.select_wm(wm_id);
                io.comment(format!("-- Enable WM{wm_id} events"));
                io.write64_pdump(regs::WM_EVENT_ENABLE, regs::WM_EVENTS_DEFAULT);
                io.comment(format!("-- Clear WM{wm_id} events"));
                io.write64_pdump(regs::WM_EVENT_CLEAR, regs::WM_EVENTS_DEFAULT);
            }
        }

        io.comment("-- Select cores");
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(core_mask));
        io.comment("-- Enable CORE events to WM");
        io.write64_pdump(regs::CORE_EVENT_WM_ENABLE, regs::CORE_EVENTS_DEFAULT);
        io.comment("-- Clear CORE events on WM");
        io.write64_pdump(regs::CORE_EVENT_WM_CLEAR, regs::CORE_EVENTS_DEFAULT);
        io.comment("-- Enable INTERCONNECT events to WM");
        io.write64_pdump(regs::INTERCONNECT_EVENT_WM_ENABLE, regs::IC_EVENTS_DEFAULT);
        io.comment("-- Clear INTERCONNECT events on WM");
        io.write64_pdump(regs::INTERCONNECT_EVENT_WM_CLEAR, regs::IC_EVENTS_DEFAULT);
    }

    /// Disables events before cores are powered down.
    fn dev_disable_events(&mut self, core_mask: u8, sys_release: bool) {
        let io = &mut self.io;
        if sys_release {
            io.comment("-- Disable SYS events");
            io.write64_pdump(regs::SYS_EVENT_ENABLE, 0);
            for wm_id in 0..self.props.num_cores {
                io.comment(format!("-- Select WM{wm_id}"));
                io.select_wm(wm_id);
                io.comment(format!("-- Clear WM{wm_id} events"));
                io.write64_pdump(regs::WM_EVENT_CLEAR, regs::WM_EVENTS_DEFAULT);
                io.comment(format!("-- Disable WM{wm_id} events"));
                io.write64_pdump(regs::WM_EVENT_ENABLE, 0);
            }
        }

        io.comment("-- Select cores");
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(core_mask));
        io.comment("-- Disable CORE events to WM");
        io.write64_pdump(regs::CORE_EVENT_WM_ENABLE, 0);
        io.comment("-- Disable INTERCONNECT events to WM");
        io.write64_pdump(regs::INTERCONNECT_EVENT_WM_ENABLE, 0);
    }

    /// Lazily powers up the cores the ledger needs (plus core 0 during
    /// calibration) and brings the device online.
    pub(crate) fn dev_start(&mut self) -> Result<(), CoreError> {
        let mut target = self.full_core_mask & !self.ledger.free_core_mask;
        if self.do_calibration {
            target |= CALIBRATION_CORE_MASK;
        }

        if self.state == PowerState::Off && self.active_core_mask == 0 {
            debug!("system power up");
        }

        // Cancel any APM request for cores that are busy again.
        let apm_cancel = target & self.apm_core_mask;
        for id in mask_ids(apm_cancel) {
            self.apm_works[id as usize].deadline_ns = None;
        }
        self.apm_core_mask &= !apm_cancel;

        // Cores that actually have to be powered on.
        let core_mask = (self.active_core_mask ^ target) & !self.active_core_mask;
        if core_mask != 0 {
            debug!(
                core_mask,
                from = self.active_core_mask,
                to = target,
                "powering cores on"
            );
            let sys = self.active_core_mask == 0;
            let result: Result<(), CoreError> = (|| {
                self.io.comment("-- POWER_ON_BEGIN");
                self.prepare_cores(core_mask)?;
                self.enable_clocks(core_mask);
                self.dev_reset(core_mask, sys)?;
                self.enable_clocks(core_mask);
                self.io.comment("-- POWER_ON_END");
                Ok(())
            })();
            if let Err(err) = result {
                error!(%err, "error bringing device cores up");
                self.state = PowerState::Off;
                self.active_core_mask = 0;
                return Err(err);
            }
            self.dev_ready(core_mask, sys);
            self.active_core_mask = target;
        }

        if self.state == PowerState::Off {
            self.dev_setup();
            self.stats.hw_start_ns = self.io.now_ns();
            self.state = PowerState::On;
        }
        Ok(())
    }

    /// Powers down every core the ledger no longer needs.
    pub(crate) fn dev_stop(&mut self, reset: bool) -> Result<(), CoreError> {
        let mut target = self.full_core_mask & !self.ledger.free_core_mask;
        if self.do_calibration {
            target &= !CALIBRATION_CORE_MASK;
        }
        let core_mask = (self.active_core_mask ^ target) & self.active_core_mask;
        if core_mask != 0 {
            debug!(
                core_mask,
                from = self.active_core_mask,
                to = target,
                "powering cores off"
            );
        }
        self.dev_stop_cores(core_mask, reset)
    }

    /// Unconditionally powers down every active core (suspend, teardown).
    pub(crate) fn dev_stop_all(&mut self, reset: bool) -> Result<(), CoreError> {
        self.dev_stop_cores(self.active_core_mask, reset)
    }

    /// Stops `core_mask`: events off, optional reset, clock gating, power
    /// down. Transitions to [`PowerState::Off`] when no core stays active.
    pub(crate) fn dev_stop_cores(&mut self, core_mask: u8, reset: bool) -> Result<(), CoreError> {
        let mut ret = Ok(());
        if core_mask != 0 {
            self.active_core_mask &= !core_mask;
            let sys_release = self.active_core_mask == 0;

            self.dev_disable_events(core_mask, sys_release);

            self.io.comment("-- POWER_OFF_BEGIN");
            if reset {
                if let Err(err) = self.dev_reset(core_mask, sys_release) {
                    warn!(%err, "problem resetting device cores");
                    ret = Err(err);
                }
            }
            if let Err(err) = self.disable_clocks(core_mask, sys_release) {
                warn!(%err, "problem disabling clocks for cores");
                ret = Err(err);
            }
            if let Err(err) = self.flush_cores(core_mask) {
                warn!(%err, "problem flushing device cores");
                ret = Err(err);
            }
            self.io.comment("-- POWER_OFF_END");
        }

        if self.state == PowerState::On && self.active_core_mask == 0 {
            for work in &mut self.apm_works {
                work.deadline_ns = None;
            }
            self.apm_core_mask = 0;
            debug!("system power down");
            self.state = PowerState::Off;

            if !self.do_calibration {
                let now = self.io.now_ns();
                let span_ms = now.saturating_sub(self.stats.hw_start_ns) / 1_000_000;
                self.stats.uptime_ms += span_ms;
                if self.stats.uptime_ms > 0 {
                    self.stats.update_utilization();
                } else {
                    debug!("execution too short to calculate utilization");
                }
            }

            self.mmu.active_ctx = None;
            self.irq_status = Default::default();
        }

        ret
    }

    /// Arms the APM timer for every active, free core not already under
    /// APM.
    pub(crate) fn sched_apm_multi(&mut self) {
        let apm_core_mask =
            self.active_core_mask & self.ledger.free_core_mask & !self.apm_core_mask;
        if apm_core_mask == 0 {
            return;
        }
        debug!(core_mask = apm_core_mask, "scheduling APM");
        let now = self.io.now_ns();
        let deadline = now + u64::from(self.config.pm_delay_ms) * 1_000_000;
        for id in mask_ids(apm_core_mask) {
            let work = &mut self.apm_works[id as usize];
            work.core_mask = id_to_mask(id);
            work.deadline_ns = Some(deadline);
        }
        self.apm_core_mask |= apm_core_mask;
    }

    /// Fires expired APM timers; the embedder calls this from its timer
    /// context. Cores still free at expiry are powered down.
    pub fn poll_apm(&mut self) {
        if self.do_calibration || self.config.no_clock_disable {
            return;
        }
        let now = self.io.now_ns();
        for id in 0..self.props.num_cores {
            let work = &mut self.apm_works[id as usize];
            let Some(deadline) = work.deadline_ns else {
                continue;
            };
            if now < deadline {
                continue;
            }
            work.deadline_ns = None;
            let mask = work.core_mask;
            self.apm_core_mask &= !mask;
            debug!(core_mask = mask, "APM expired");
            let stop = mask & self.ledger.free_core_mask & self.active_core_mask;
            if stop != 0 {
                if let Err(err) = self.dev_stop_cores(stop, false) {
                    warn!(%err, "APM core stop failed");
                }
            }
        }
    }

    /// Opportunistic power management used by the scheduler loop: soft-stop
    /// immediately when no delay is configured, otherwise arm APM.
    pub(crate) fn apm_or_stop(&mut self) {
        if self.config.no_clock_disable {
            return;
        }
        if self.config.pm_delay_ms == 0 {
            if self.dev_stop(false).is_err() {
                warn!("failed to soft stop device, trying harder with reset");
                if let Err(err) = self.dev_stop(true) {
                    error!(%err, "failed to stop device with reset");
                }
            }
        } else {
            self.sched_apm_multi();
        }
    }
}
