//! Interrupt handling: top half, bottom half and error classification.
//!
//! The top half runs in IRQ context: it only reads status registers, writes
//! clear bits and accumulates into the shared [`IrqStatus`]. The bottom half
//! is schedulable: it snapshots the accumulator, classifies every error bit
//! into a minimum reset class, pops the WM response FIFOs and completes
//! commands, performing WM/MMU/full resets as demanded.
//!
//! Error severity is table-driven: each bit maps to a reset class
//! and a response flag; the applied reset is the maximum class across all
//! bits of a workload, and any FULL escalates the whole pass.

use tracing::{debug, error, warn};

use crate::common::error::{errno, rsp_err};
use crate::common::{id_to_mask, mask_ids, ResetClass, MAX_CORES};
use crate::device::{CmdRef, Device};
use crate::hw::wm;
use crate::io::Platform;
use crate::mmu;
use crate::regs;
use crate::sched::ledger::HwSchedInfo;
use crate::session::{CMD_FLAG_CHECK_CRC, MMU_REQ_IO};

/// Result of the top-half handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not our interrupt, or nothing actionable.
    None,
    /// Events were captured; the bottom half must run.
    WakeThread,
}

/// Accumulated event state between the top and bottom halves.
#[derive(Clone, Debug, Default)]
pub struct IrqStatus {
    /// `HOST_EVENT_SOURCE` image (ORed across interrupts).
    pub event_source: u64,
    /// Accumulated `SYS_EVENT_STATUS` bits.
    pub sys_events: u64,
    /// Accumulated `WM_EVENT_STATUS` bits, per WM.
    pub wm_events: [u64; MAX_CORES],
    /// Accumulated core event bits, per core.
    pub core_events: [u64; MAX_CORES],
    /// Accumulated interconnect event bits, per interconnect.
    pub ic_events: [u64; MAX_CORES],
}

/// One row of a bit-indexed error table.
struct BitErr {
    bits: u64,
    errno: i32,
    name: &'static str,
    reset: ResetClass,
    rsp: u64,
}

/// One row of the WM response-code table.
struct CodeErr {
    code: u8,
    name: &'static str,
    reset: ResetClass,
    rsp: u64,
}

/// System event errors.
static SYS_ERR_BITS: &[BitErr] = &[
    BitErr {
        bits: regs::SYS_EVENT_AXI_ERROR_EN,
        errno: errno::EIO,
        name: "AXI_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_AXI_ERROR,
    },
    BitErr {
        bits: regs::SYS_EVENT_MMU_PAGE_FAULT_MASK,
        errno: errno::EFAULT,
        name: "MMU_PAGE_FAULT",
        reset: ResetClass::Mmu,
        rsp: rsp_err::HW_SYS_MMU_PAGE_FAULT,
    },
    BitErr {
        bits: regs::SYS_EVENT_SYS_MEM_WDT_EN,
        errno: errno::ETIMEDOUT,
        name: "SYS_MEM_WDT",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_MEM_WDT,
    },
    BitErr {
        bits: regs::SYS_EVENT_AXI_MEMORY_PARITY_ERROR_EN,
        errno: errno::EIO,
        name: "AXI_MEMORY_PARITY_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_AXI_MEMORY_PARITY_ERROR,
    },
    BitErr {
        bits: regs::SYS_EVENT_MMU_PARITY_ERROR_EN,
        errno: errno::EIO,
        name: "MMU_PARITY_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_MMU_PARITY_ERROR,
    },
    BitErr {
        bits: regs::SYS_EVENT_RAM_CORRECTION_EN,
        errno: errno::EIO,
        name: "RAM_CORRECTION",
        reset: ResetClass::None,
        rsp: rsp_err::HW_SYS_RAM_CORRECTION,
    },
    BitErr {
        bits: regs::SYS_EVENT_RAM_DETECTION_EN,
        errno: errno::EIO,
        name: "RAM_DETECTION",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_RAM_DETECTION,
    },
    BitErr {
        bits: regs::SYS_EVENT_LSYNC_INV_REQ_EN,
        errno: errno::EIO,
        name: "LSYNC_INV_REQ",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_LSYNC_INV_REQ,
    },
    BitErr {
        bits: regs::SYS_EVENT_LOGIC_ERROR_EN,
        errno: errno::EIO,
        name: "LOGIC_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SYS_LOGIC_ERROR,
    },
    BitErr {
        bits: regs::REG_PARITY_ERROR_EN,
        errno: errno::EIO,
        name: "PARITY_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::SW_SYS_EVNT_PARITY_ERROR,
    },
];

/// WM event errors.
static WM_ERR_BITS: &[BitErr] = &[
    BitErr {
        bits: regs::WM_EVENT_WM_WL_WDT_EN,
        errno: errno::ETIMEDOUT,
        name: "WM_WL_WDT",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_EVNT_WM_WL_WDT,
    },
    BitErr {
        bits: regs::WM_EVENT_WM_WL_IDLE_WDT_EN,
        errno: errno::ETIMEDOUT,
        name: "WM_WL_IDLE_WDT",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_EVNT_WM_WL_IDLE_WDT,
    },
    BitErr {
        bits: regs::WM_EVENT_WM_SOCIF_WDT_EN,
        errno: errno::ETIMEDOUT,
        name: "WM_SOCIF_WDT",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_EVNT_WM_SOCIF_WDT,
    },
    BitErr {
        bits: regs::WM_EVENT_LOGIC_FAULT_EN,
        errno: errno::EFAULT,
        name: "LOGIC_FAULT",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_EVNT_LOGIC_FAULT,
    },
    BitErr {
        bits: regs::REG_PARITY_ERROR_EN,
        errno: errno::EIO,
        name: "PARITY_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::SW_EVNT_WM_PARITY_ERROR,
    },
];

/// Core status errors.
static CORE_ERR_BITS: &[BitErr] = &[
    BitErr {
        bits: regs::CORE_EVENT_LOGIC_ERROR_EN,
        errno: errno::EIO,
        name: "LOGIC_ERROR",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_LOGIC_ERROR,
    },
    BitErr {
        bits: regs::CORE_EVENT_RAM_CORRECTION_EN,
        errno: errno::EIO,
        name: "RAM_CORRECTION",
        reset: ResetClass::None,
        rsp: rsp_err::HW_RAM_CORRECTION,
    },
    BitErr {
        bits: regs::CORE_EVENT_RAM_DETECTION_EN,
        errno: errno::EIO,
        name: "RAM_DETECTION",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_RAM_DETECTION,
    },
    BitErr {
        bits: regs::CORE_EVENT_CORE_SYNC_ERROR_EN,
        errno: errno::EIO,
        name: "CORE_SYNC_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_CORE_SYNC_ERROR,
    },
    BitErr {
        bits: regs::CORE_EVENT_CORE_WDT_EN,
        errno: errno::ETIMEDOUT,
        name: "CORE_WDT",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_WDT,
    },
    BitErr {
        bits: regs::CORE_EVENT_CORE_MEM_WDT_EN,
        errno: errno::ETIMEDOUT,
        name: "CORE_MEM_WDT",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_MEM_WDT,
    },
    BitErr {
        bits: regs::CORE_EVENT_CNN_ERROR_EN,
        errno: errno::EIO,
        name: "CNN_ERROR",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_CNN_ERROR,
    },
];

/// Interconnect status errors.
static IC_ERR_BITS: &[BitErr] = &[
    BitErr {
        bits: regs::IC_EVENT_LOCKSTEP_ERROR_EN,
        errno: errno::EIO,
        name: "LOCKSTEP_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_LOCKSTEP_ERROR,
    },
    BitErr {
        bits: regs::IC_EVENT_LOGIC_ERROR_EN,
        errno: errno::EIO,
        name: "LOGIC_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_IC_LOGIC_ERROR,
    },
    BitErr {
        bits: regs::IC_EVENT_SOCIF_READ_MISMATCH_EN,
        errno: errno::EIO,
        name: "SOCIF_READ_MISMATCH",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SOCIF_READ_MISMATCH,
    },
    BitErr {
        bits: regs::IC_EVENT_SOCIF_READ_UNRESPONSIVE_EN,
        errno: errno::EIO,
        name: "SOCIF_READ_UNRESPONSIVE",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_SOCIF_READ_UNRESPONSIVE,
    },
    BitErr {
        bits: regs::REG_PARITY_ERROR_EN,
        errno: errno::EIO,
        name: "PARITY_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::SW_IC_PARITY_ERROR,
    },
];

/// WM response FIFO error codes.
static WM_RSP_ERR_CODES: &[CodeErr] = &[
    CodeErr {
        code: regs::WM_RSP_ERR_CORE_IRQ_BEFORE_KICK,
        name: "CORE_IRQ_BEFORE_KICK",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_IRQ_BEFORE_KICK,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_INDIRECT_MASK_SET_ERROR,
        name: "INDIRECT_MASK_SET_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_INDIRECT_MASK_SET_ERROR,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_KICK_CORE_ACCESS_ERROR,
        name: "KICK_CORE_ACCESS_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_KICK_CORE_ACCESS_ERROR,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_CNN_CONTROL_START_HIGH,
        name: "CNN_CONTROL_START_HIGH",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CNN_CONTROL_START_HIGH,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_CNN_STATUS_ERROR,
        name: "CNN_STATUS_ERROR",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CNN_STATUS_ERROR,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_INT_CORE_ACCESS_ERROR,
        name: "INT_CORE_ACCESS_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_INT_CORE_ACCESS_ERROR,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_CORE_EVENT_ERROR,
        name: "CORE_EVENT_ERROR",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_EVENT_ERROR,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_CORE_EVENT_NOT_CLEARED,
        name: "CORE_EVENT_NOT_CLEARED",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_EVENT_NOT_CLEARED,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_CORE_EVENT_IRQ_HIGH,
        name: "CORE_EVENT_IRQ_HIGH",
        reset: ResetClass::Wm,
        rsp: rsp_err::HW_CORE_EVENT_IRQ_HIGH,
    },
    CodeErr {
        code: regs::WM_RSP_ERR_INTERCONNECT_ERROR,
        name: "INTERCONNECT_ERROR",
        reset: ResetClass::Full,
        rsp: rsp_err::HW_INTERCONNECT_ERROR,
    },
];

/// Maximum reset class over every table row matching `event_mask`.
fn reset_type_for(table: &[BitErr], event_mask: u64) -> ResetClass {
    let mut reset = ResetClass::None;
    for row in table {
        if event_mask & row.bits != 0 && row.reset > reset {
            reset = row.reset;
        }
    }
    reset
}

fn is_dead(val: u64) -> bool {
    val == regs::DEAD_HW || val == u64::MAX
}

/// Events of the WM response FIFO status that count as errors.
fn wm_rsp_err_events() -> u64 {
    (regs::WM_RESPONSE_FIFO_WL_STATUS_MASKFULL
        | regs::REG_PARITY_ERROR_EN
        | regs::REG_WL_ID_MISMATCH_ERROR_EN)
        & !(regs::WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN
            | regs::WM_RESPONSE_FIFO_WL_STATUS_PARITY_EN)
}

impl<P: Platform> Device<P> {
    /// Interrupt top half. Never sleeps; reads event sources, quenches
    /// them, and accumulates state for the bottom half.
    pub fn handle_irq(&mut self) -> IrqReturn {
        let mut st = IrqStatus::default();
        let mut wake = false;
        let mut hw_proc_end: [Option<u64>; MAX_CORES] = [None; MAX_CORES];

        st.event_source = self.io.read64(regs::HOST_EVENT_SOURCE);
        if is_dead(st.event_source) {
            self.warn_hw_dead();
            return IrqReturn::None;
        }

        if st.event_source & regs::HOST_EVENT_SOURCE_SYS_EN != 0 {
            let (mut sys, parity_bad) = self.io.read64_parity(regs::SYS_EVENT_STATUS);
            if is_dead(sys) {
                self.warn_hw_dead();
                return IrqReturn::None;
            }
            if parity_bad {
                error!("SYS_EVENT_STATUS register parity error");
                sys |= regs::REG_PARITY_ERROR_EN;
            }
            st.sys_events = sys;
            // Wake the thread even when only the parity pseudo-bit is set.
            if sys & (regs::SYS_EVENTS_DEFAULT | regs::REG_PARITY_ERROR_EN) != 0 {
                self.io
                    .write64(regs::SYS_EVENT_CLEAR, sys & regs::SYS_EVENTS_DEFAULT);
                wake = true;
            }
        }

        let wm_src = regs::get_field(
            st.event_source,
            regs::HOST_EVENT_SOURCE_WM_SHIFT,
            regs::HOST_EVENT_SOURCE_WM_MASK,
        ) as u8;
        for id in mask_ids(wm_src) {
            if id >= self.props.num_cores {
                continue;
            }
            self.io.select_wm(id);
            let (mut events, parity_bad) = self.io.read64_parity(regs::WM_EVENT_STATUS);
            if is_dead(events) {
                self.warn_hw_dead();
                return IrqReturn::None;
            }
            hw_proc_end[id as usize] = Some(self.io.now_ns());
            if parity_bad {
                error!(wm_id = id, "WM_EVENT_STATUS register parity error");
                events |= regs::REG_PARITY_ERROR_EN;
            }

            // Post-check for AXI bus errors.
            let ace_status = self.io.read64(regs::ACE_STATUS);
            if ace_status != 0 {
                error!(ace_status, "AXI bus protocol error");
                st.event_source |= regs::HOST_EVENT_SOURCE_SYS_EN;
                st.sys_events |= regs::SYS_EVENT_AXI_ERROR_EN;
            }

            if events & (regs::WM_EVENTS_DEFAULT | regs::REG_PARITY_ERROR_EN) != 0 {
                // Events cannot be cleared; disable to avoid a storm.
                self.io.write64(regs::WM_EVENT_ENABLE, 0);
                wake = true;
            }
            st.wm_events[id as usize] = events;
        }

        // Direct core events are only used for frequency measurement;
        // WM-routed core events are read in the bottom half.
        let core_src = regs::get_field(
            st.event_source,
            regs::HOST_EVENT_SOURCE_CORE_SHIFT,
            regs::HOST_EVENT_SOURCE_CORE_MASK,
        ) as u8;
        for id in mask_ids(core_src) {
            if id >= self.props.num_cores {
                continue;
            }
            self.io
                .write64(regs::CORE_CTRL_INDIRECT, u64::from(id_to_mask(id)));
            let events = self.io.read64(regs::CORE_EVENT_HOST_STATUS);
            if is_dead(events) {
                self.warn_hw_dead();
                return IrqReturn::None;
            }
            if events & regs::CORE_EVENTS_DEFAULT != 0 {
                self.io
                    .write64(regs::CORE_EVENT_HOST_CLEAR, events & regs::CORE_EVENTS_DEFAULT);
                hw_proc_end[id as usize] = Some(self.io.now_ns());
                wake = true;
            }
            st.core_events[id as usize] = events;
        }

        let ic_src = regs::get_field(
            st.event_source,
            regs::HOST_EVENT_SOURCE_IC_SHIFT,
            regs::HOST_EVENT_SOURCE_IC_MASK,
        ) as u8;
        for id in mask_ids(ic_src) {
            if id >= self.props.num_cores {
                continue;
            }
            self.io
                .write64(regs::IC_CORE_INDIRECT, u64::from(id_to_mask(id)));
            let (mut events, parity_bad) =
                self.io.read64_parity(regs::INTERCONNECT_EVENT_HOST_STATUS);
            if is_dead(events) {
                self.warn_hw_dead();
                return IrqReturn::None;
            }
            if parity_bad {
                error!(ic_id = id, "INTERCONNECT_EVENT_HOST_STATUS register parity error");
                events |= regs::REG_PARITY_ERROR_EN;
            }
            if events & (regs::IC_EVENTS_DEFAULT | regs::REG_PARITY_ERROR_EN) != 0 {
                self.io.write64(
                    regs::INTERCONNECT_EVENT_HOST_CLEAR,
                    events & regs::IC_EVENTS_DEFAULT,
                );
                wake = true;
            }
            st.ic_events[id as usize] = events;
        }

        if wake {
            self.irq_status.event_source |= st.event_source;
            self.irq_status.sys_events |= st.sys_events;
            for id in 0..MAX_CORES {
                self.irq_status.wm_events[id] |= st.wm_events[id];
                self.irq_status.core_events[id] |= st.core_events[id];
                self.irq_status.ic_events[id] |= st.ic_events[id];
                if let Some(end) = hw_proc_end[id] {
                    self.stats.record_proc_end(id as u8, end);
                }
            }
            debug!(
                event_source = st.event_source,
                sys = st.sys_events,
                "IRQ captured"
            );
            IrqReturn::WakeThread
        } else {
            IrqReturn::None
        }
    }

    fn warn_hw_dead(&mut self) {
        if !self.hw_dead_warned {
            self.hw_dead_warned = true;
            error!("hardware is dead!");
        }
    }

    /// Interrupt bottom half. Snapshots the accumulator, processes errors,
    /// pops response FIFOs, completes commands and performs resets.
    pub fn handle_thread_irq(&mut self) {
        let mut irq_status = std::mem::take(&mut self.irq_status);

        // The calibration span is measured on WM0.
        if irq_status.sys_events != 0 || self.do_calibration {
            let wm0 = &self.stats.wm_stats[0];
            self.stats.last_proc_us = wm0
                .hw_proc_end_ns
                .saturating_sub(wm0.hw_proc_start_ns)
                / 1000;
        }

        let mut full_reset = false;
        let mut error_flags = 0u64;

        // Clock calibration short-circuit: core 0 watchdog while calibrating.
        let core_src = regs::get_field(
            irq_status.event_source,
            regs::HOST_EVENT_SOURCE_CORE_SHIFT,
            regs::HOST_EVENT_SOURCE_CORE_MASK,
        ) as u8;
        let calibration_done = core_src == super::power::CALIBRATION_CORE_MASK
            && irq_status.core_events[0] & regs::CORE_EVENT_CORE_WDT_EN != 0
            && self.check_calibration();

        if !calibration_done {
            // Harvest WM-routed core/interconnect events for every WM that
            // signalled (and for all WMs on a system event).
            for wm_id in 0..self.props.num_cores {
                let mut mask = 0u8;
                if irq_status.wm_events[wm_id as usize] != 0 {
                    mask = wm::get_cores(self.wm_core_assignment, wm_id);
                }
                if irq_status.sys_events != 0 {
                    mask |= id_to_mask(wm_id);
                }
                for id in mask_ids(mask) {
                    self.io
                        .write64(regs::CORE_CTRL_INDIRECT, u64::from(id_to_mask(id)));
                    let mut events = self.io.read64(regs::CORE_EVENT_WM_STATUS);
                    if events & regs::CORE_ERR_EVENTS != 0 {
                        self.io
                            .write64(regs::CORE_EVENT_WM_CLEAR, events & regs::CORE_EVENTS_DEFAULT);
                        events |= self.io.read64(regs::CORE_EVENT_WM_STATUS);
                    }
                    self.irq_merge_core(&mut irq_status, id, events);

                    self.io
                        .write64(regs::IC_CORE_INDIRECT, u64::from(id_to_mask(id)));
                    let mut events = self.io.read64(regs::INTERCONNECT_EVENT_WM_STATUS);
                    if events & regs::IC_ERR_EVENTS != 0 {
                        self.io.write64(
                            regs::INTERCONNECT_EVENT_WM_CLEAR,
                            events & regs::IC_EVENTS_DEFAULT,
                        );
                        events |= self.io.read64(regs::INTERCONNECT_EVENT_WM_STATUS);
                    }
                    irq_status.ic_events[id as usize] |= events;
                }
            }

            // Classify and handle errors first.
            let mut process_sys_events = false;
            let wm_process_mask = self.events_process_errors(
                &irq_status,
                &mut full_reset,
                &mut process_sys_events,
                &mut error_flags,
            );

            if process_sys_events {
                // Non-error system events carry no further action today.
            }

            // Process non-failed WM events.
            if wm_process_mask != 0 {
                let mut rsp_err_status = 0u64;
                for id in mask_ids(wm_process_mask) {
                    if irq_status.wm_events[id as usize] & regs::WM_EVENT_RESPONSE_FIFO_READY_EN
                        != 0
                    {
                        rsp_err_status = self.pop_wm_response(
                            id,
                            &irq_status,
                            rsp_err_status,
                            &mut full_reset,
                            &mut error_flags,
                        );
                    }
                }
                // If any processed workload demanded a full reset, every
                // in-flight workload fails and rolls back; the reset itself
                // runs at the end of the handler.
                if full_reset {
                    self.handle_sys_failure(rsp_err_status, errno::EIO, error_flags);
                }
            }

            // Host-routed core/interconnect error events are informational.
            for id in 0..self.props.num_cores as usize {
                if irq_status.core_events[id] & regs::CORE_ERR_EVENTS != 0 {
                    error!(core = id, events = irq_status.core_events[id], "core error event");
                }
                if irq_status.ic_events[id] & regs::IC_ERR_EVENTS != 0 {
                    error!(
                        ic = id,
                        events = irq_status.ic_events[id],
                        "interconnect error event"
                    );
                }
            }
        }

        if full_reset {
            error!("performing full system reset due to HW error detection");
            if let Err(err) = self.dev_stop(true) {
                error!(%err, "full reset failed");
            }
        }
        self.kick_worker();
        self.run_worker();
    }

    fn irq_merge_core(&self, irq_status: &mut IrqStatus, core_id: u8, events: u64) {
        irq_status.core_events[core_id as usize] |= events;
    }

    /// Pops one WM response, decodes it and completes the pending command.
    /// Returns the latest error status image for a potential full reset.
    fn pop_wm_response(
        &mut self,
        wm_id: u8,
        irq_status: &IrqStatus,
        mut rsp_err_status: u64,
        full_reset: &mut bool,
        error_flags: &mut u64,
    ) -> u64 {
        let w = wm_id as usize;
        let Some(r) = self.pendcmd[w] else {
            warn!(wm_id, "response FIFO ready with no pending command");
            return rsp_err_status;
        };

        self.io.select_wm(wm_id);
        let (mut status, parity_bad) = self.io.read64_parity(regs::WM_RESPONSE_FIFO_WL_STATUS);
        if parity_bad {
            error!(wm_id, "WM_RESPONSE_FIFO_WL_STATUS register parity error");
            status |= regs::REG_PARITY_ERROR_EN;
        }
        let wl_id = self.io.read64(regs::WM_RESPONSE_FIFO_WL_ID) & regs::WM_WL_ID_MASK;

        // Gather perf/bandwidth data when the debug modes ask for it.
        if self.config.wm_dbg_perf {
            self.stats.cnn_last_cycles = self.io.read64(regs::WM_RESPONSE_FIFO_WL_PERF);
        }
        if self.config.wm_dbg_band {
            for idx in 0..9 {
                self.stats.last_mem_stats.transactions[idx as usize] =
                    self.io.read64(regs::wm_response_fifo_wl_bw(idx));
            }
            for idx in 0..6 {
                self.stats.last_mem_stats.words[idx as usize] =
                    self.io.read64(regs::wm_response_fifo_wl_bw_word(idx));
            }
        }

        // Pop the FIFO and re-enable WM events.
        self.io
            .write64(regs::WM_RESPONSE_FIFO_READ, regs::WM_RESPONSE_FIFO_READ_EN);
        self.io.write64(regs::WM_EVENT_ENABLE, regs::WM_EVENTS_DEFAULT);

        let expected = self.cmd(r).map(|c| c.wm_cmd_id).unwrap_or_default();
        if wl_id != u64::from(expected) {
            error!(
                wm_id,
                cmd_id = r.cmd_id,
                expected,
                actual = wl_id,
                "WM workload id mismatch"
            );
            status |= regs::REG_WL_ID_MISMATCH_ERROR_EN;
        }

        // Leave only potential errors.
        status &= wm_rsp_err_events();
        if status != 0 {
            rsp_err_status = status;
        }

        if self.config.confirm_config_reg {
            self.apply_conf_status(r, full_reset, &mut status);
        }
        if self.config.cnn_combined_crc_enable {
            self.check_crc(r, &mut status);
        }

        if let Some(info) = self.cmd(r).and_then(|c| c.sched_info) {
            self.stats.inc_kicks_completed(info.core_mask, info.wm_id);
            // Free command resources, unless a queued follow-up inherits
            // the assignment.
            if !self.ledger.is_queued(&info) {
                wm::release_cores(
                    &mut self.io,
                    &mut self.wm_core_assignment,
                    info.core_mask,
                    false,
                );
            }
        }
        self.free_cmd_res(r, true);

        self.handle_wm_response(wm_id, status, irq_status, full_reset, error_flags);

        if status != 0 {
            self.stats.total_failures += 1;
        }
        self.stats.cnn_kicks_completed += 1;
        rsp_err_status
    }

    /// Decodes a response status, applies the per-WM reset policy and
    /// completes the command.
    fn handle_wm_response(
        &mut self,
        wm_id: u8,
        response_status: u64,
        irq_status: &IrqStatus,
        full_reset: &mut bool,
        error_flags: &mut u64,
    ) {
        let mut reset_type = ResetClass::None;
        let mut err = if *error_flags != 0 { errno::EIO } else { 0 };

        if response_status
            & (regs::WM_RESPONSE_FIFO_WL_STATUS_WL_FAILURE_EN
                | regs::REG_PARITY_ERROR_EN
                | regs::REG_WL_ID_MISMATCH_ERROR_EN
                | regs::REG_CONF_ERROR_EN
                | regs::REG_COMBINED_CRC_ERROR_EN)
            != 0
        {
            err = self.report_wm_rsp_failure(
                wm_id,
                response_status,
                irq_status,
                &mut reset_type,
                error_flags,
            );
        }

        match reset_type {
            ResetClass::None => self.do_queued_cmd(wm_id),
            ResetClass::Wm | ResetClass::Mmu => {
                if !*full_reset {
                    if let Some(info) =
                        self.pendcmd[wm_id as usize].and_then(|r| self.cmd(r).and_then(|c| c.sched_info))
                    {
                        error!(wm_id, "performing WM reset due to HW error detection");
                        if wm::wm_reset(&mut self.io, &info).is_err() {
                            error!(wm_id, "error during WM reset, forcing full reset");
                            *full_reset = true;
                        }
                    }
                }
            }
            ResetClass::Full => *full_reset = true,
        }

        self.handle_cmd(wm_id, response_status, err, *error_flags);
    }

    /// Classifies every accumulated error bit, performs the selective
    /// (WM/MMU) resets, and returns the mask of WMs with non-error events
    /// to process normally.
    fn events_process_errors(
        &mut self,
        irq_status: &IrqStatus,
        full_reset: &mut bool,
        process_sys_events: &mut bool,
        error_flags: &mut u64,
    ) -> u8 {
        let combine_sys_wm = |sys: u64, wm: u64| -> u64 {
            ((wm & !regs::WM_ERR_EVENTS) | sys) | ((wm & regs::WM_ERR_EVENTS) << 32)
        };

        let mut error = 0i32;
        let mut wm_process_mask = 0u8;
        let mut reset_type = ResetClass::None;
        let mut wm_reset_types = [ResetClass::None; MAX_CORES];
        let mut sys_err_status = 0u64;
        let mut wm_err_status_full_reset = 0u64;
        let mut wm_err_statuses = [0u64; MAX_CORES];

        *full_reset = false;
        *process_sys_events = false;

        let sys_err_events = regs::SYS_ERR_EVENTS | regs::REG_PARITY_ERROR_EN;

        // System events.
        if irq_status.event_source & regs::HOST_EVENT_SOURCE_SYS_EN != 0 {
            sys_err_status = irq_status.sys_events & sys_err_events;
            if sys_err_status != 0 {
                reset_type = reset_type_for(SYS_ERR_BITS, irq_status.sys_events);
                if reset_type < ResetClass::Full {
                    // MMU page faults are per-WM.
                    let pf = regs::get_field(
                        irq_status.sys_events,
                        regs::SYS_EVENT_MMU_PAGE_FAULT_SHIFT,
                        regs::SYS_EVENT_MMU_PAGE_FAULT_MASK,
                    ) as u8;
                    for wm_id in mask_ids(pf) {
                        wm_reset_types[wm_id as usize] = ResetClass::Mmu;
                        wm_err_statuses[wm_id as usize] = sys_err_status;
                    }
                }
                error = self.report_sys_failures(irq_status.sys_events, error_flags);
            }
            if reset_type < ResetClass::Full && irq_status.sys_events & !sys_err_events != 0 {
                *process_sys_events = true;
            }
        }

        // WM events.
        let wm_source_mask = regs::get_field(
            irq_status.event_source,
            regs::HOST_EVENT_SOURCE_WM_SHIFT,
            regs::HOST_EVENT_SOURCE_WM_MASK,
        ) as u8;
        let wm_err_events = regs::WM_ERR_EVENTS | regs::REG_PARITY_ERROR_EN;
        for wm_id in mask_ids(wm_source_mask) {
            let w = wm_id as usize;
            let wm_err_status = irq_status.wm_events[w] & wm_err_events;
            if wm_err_status == 0 {
                continue;
            }
            if reset_type < ResetClass::Full {
                let wm_reset_type = reset_type_for(WM_ERR_BITS, irq_status.wm_events[w]);
                if wm_reset_type == ResetClass::Full {
                    reset_type = ResetClass::Full;
                    wm_err_status_full_reset = wm_err_status;
                } else if wm_reset_type > wm_reset_types[w] {
                    wm_reset_types[w] = wm_reset_type;
                }
            }
            wm_err_statuses[w] = combine_sys_wm(sys_err_status, wm_err_status);
            let wm_error = self.report_wm_failures(wm_id, irq_status.wm_events[w], error_flags);
            if error == 0 {
                error = wm_error;
            }
        }

        // Core events: the core itself is not reset, the owning WM is.
        for core_id in 0..self.props.num_cores {
            let c = core_id as usize;
            if irq_status.core_events[c] & regs::CORE_ERR_EVENTS == 0 {
                continue;
            }
            let core_reset_type = reset_type_for(CORE_ERR_BITS, irq_status.core_events[c]);
            for wm_id in 0..self.props.num_cores {
                let w = wm_id as usize;
                let Some(r) = self.pendcmd[w] else { continue };
                let Some(core_mask) = self.cmd(r).and_then(|cmd| cmd.sched_info).map(|i| i.core_mask)
                else {
                    continue;
                };
                if core_mask & id_to_mask(core_id) == 0 {
                    continue;
                }
                if core_reset_type == ResetClass::Full {
                    reset_type = ResetClass::Full;
                } else if core_reset_type > wm_reset_types[w] {
                    wm_reset_types[w] = core_reset_type;
                }
                let core_error =
                    self.report_core_failures(core_id, irq_status.core_events[c], error_flags);
                if error == 0 {
                    error = core_error;
                }
                wm_err_statuses[w] =
                    (wm_err_statuses[w] | regs::REG_WM_CORE_ERROR_EN) << 32;
            }
        }

        // Interconnect events: same ownership rule as core events.
        let ic_err_events = regs::IC_ERR_EVENTS | regs::REG_PARITY_ERROR_EN;
        for ic_id in 0..self.props.num_cores {
            let c = ic_id as usize;
            if irq_status.ic_events[c] & ic_err_events == 0 {
                continue;
            }
            let ic_reset_type = reset_type_for(IC_ERR_BITS, irq_status.ic_events[c]);
            for wm_id in 0..self.props.num_cores {
                let w = wm_id as usize;
                let Some(r) = self.pendcmd[w] else { continue };
                let Some(core_mask) = self.cmd(r).and_then(|cmd| cmd.sched_info).map(|i| i.core_mask)
                else {
                    continue;
                };
                if core_mask & id_to_mask(ic_id) == 0 {
                    continue;
                }
                if ic_reset_type == ResetClass::Full {
                    reset_type = ResetClass::Full;
                } else if ic_reset_type > wm_reset_types[w] {
                    wm_reset_types[w] = ic_reset_type;
                }
                let ic_error = self.report_ic_failures(ic_id, irq_status.ic_events[c], error_flags);
                if error == 0 {
                    error = ic_error;
                }
                wm_err_statuses[w] = (wm_err_statuses[w] | regs::REG_WM_IC_ERROR_EN) << 32;
            }
        }

        // Perform selective resets.
        if reset_type < ResetClass::Full {
            for wm_id in 0..self.props.num_cores {
                let w = wm_id as usize;
                match wm_reset_types[w] {
                    ResetClass::Mmu | ResetClass::Wm => {
                        if wm_reset_types[w] == ResetClass::Mmu {
                            // Invalidate the faulted context before the WM
                            // reset; a flush failure escalates.
                            let io_ctx = self.pendcmd[w].and_then(|r| {
                                self.sessions
                                    .get(&r.session)
                                    .map(|s| s.mmu_ctxs[MMU_REQ_IO].hw_id)
                            });
                            if let Some(ctx) = io_ctx {
                                let on = self.state == crate::device::PowerState::On;
                                if mmu::flush_ctx(&mut self.io, on, Some(ctx)).is_err() {
                                    error!("error during MMU flush, doing full reset");
                                    wm_err_status_full_reset = wm_err_statuses[w];
                                    reset_type = ResetClass::Full;
                                    continue;
                                }
                            }
                        }
                        error!(wm_id, "performing WM reset due to HW error detection");
                        let info = self.pendcmd[w]
                            .and_then(|r| self.cmd(r).and_then(|c| c.sched_info))
                            .unwrap_or(HwSchedInfo {
                                wm_id,
                                core_mask: 0,
                                ..HwSchedInfo::default()
                            });
                        if wm::wm_reset(&mut self.io, &info).is_err() {
                            error!(wm_id, "error during WM reset, doing full reset");
                            wm_err_status_full_reset = wm_err_statuses[w];
                            reset_type = ResetClass::Full;
                            continue;
                        }
                        self.io.select_wm(wm_id);
                        self.io
                            .write64(regs::WM_EVENT_CLEAR, regs::WM_EVENTS_DEFAULT);
                        // Re-enable WM events; this WM is not handled
                        // further in this pass.
                        self.io
                            .write64(regs::WM_EVENT_ENABLE, regs::WM_EVENTS_DEFAULT);
                        self.handle_wm_failure(wm_id, wm_err_statuses[w], error, *error_flags);
                    }
                    ResetClass::None => {
                        if self.pendcmd[w].is_some() {
                            wm_process_mask |= wm_source_mask & id_to_mask(wm_id);
                        }
                    }
                    ResetClass::Full => {}
                }
            }
        }

        // Check again: the reset type may have escalated during recovery.
        if reset_type == ResetClass::Full {
            self.handle_sys_failure(
                combine_sys_wm(sys_err_status, wm_err_status_full_reset),
                error,
                *error_flags,
            );
            *process_sys_events = false;
            // The reset itself is executed by the caller.
            *full_reset = true;
        }

        wm_process_mask
    }

    /// Fails every pending workload (full-reset path).
    fn handle_sys_failure(&mut self, status: u64, err: i32, rsp_err_flags: u64) {
        for wm_id in 0..self.props.num_cores {
            let w = wm_id as usize;
            if let Some(r) = self.pendcmd[w] {
                if let Some(hook) = self.observers.error.as_mut() {
                    hook(r.session, Some(r.cmd_id), status);
                }
                if let Some(info) = self.cmd(r).and_then(|c| c.sched_info) {
                    self.stats.total_failures += 1;
                    self.stats.cnn_kicks_completed += 1;
                    self.stats.inc_kicks_completed(info.core_mask, info.wm_id);
                    let _ = wm::wm_reset(&mut self.io, &info);
                    wm::release_cores(
                        &mut self.io,
                        &mut self.wm_core_assignment,
                        info.core_mask,
                        false,
                    );
                    self.free_cmd_res(r, true);
                }
            }
            self.do_queued_cmd(wm_id);
            self.handle_cmd(wm_id, status, err, rsp_err_flags);
        }
    }

    /// Fails the pending workload of one WM (WM-reset path).
    fn handle_wm_failure(&mut self, wm_id: u8, status: u64, err: i32, rsp_err_flags: u64) {
        let w = wm_id as usize;
        if let Some(r) = self.pendcmd[w] {
            if let Some(hook) = self.observers.error.as_mut() {
                hook(r.session, Some(r.cmd_id), status);
            }
            if let Some(info) = self.cmd(r).and_then(|c| c.sched_info) {
                self.stats.total_failures += 1;
                self.stats.cnn_kicks_completed += 1;
                self.stats.inc_kicks_completed(info.core_mask, info.wm_id);
                wm::release_cores(
                    &mut self.io,
                    &mut self.wm_core_assignment,
                    info.core_mask,
                    false,
                );
                self.free_cmd_res(r, true);
            }
        }
        self.do_queued_cmd(wm_id);
        self.handle_cmd(wm_id, status, err, rsp_err_flags);
    }

    /// Logs decoded system failures; returns the representative errno.
    fn report_sys_failures(&mut self, event_mask: u64, error_flags: &mut u64) -> i32 {
        let mut error = 0;
        for row in SYS_ERR_BITS {
            if event_mask & row.bits != 0 {
                error!(event = row.name, "SYS event status");
                error = row.errno;
                *error_flags |= row.rsp;
                if row.bits == regs::SYS_EVENT_RAM_CORRECTION_EN {
                    // Corrected upsets are counted, never reset.
                    self.stats.ram_corrections += 1;
                }
            }
        }

        if error != 0 {
            let clk = self.io.read64(regs::SYS_CLK_STATUS0);
            error!(sys_clk_status = clk, event_mask, "SYS failure");
            for id in mask_ids(self.active_core_mask) {
                self.io
                    .write64(regs::CORE_CTRL_INDIRECT, u64::from(id_to_mask(id)));
                let core_clk = self.io.read64(regs::CLK_STATUS0);
                error!(core = id, clk_status = core_clk, "core clock status");
            }
        }
        if error == errno::ETIMEDOUT {
            let s1 = self.io.read64(regs::SLC_STATUS1);
            let s2 = self.io.read64(regs::SLC_STATUS2);
            let idle = self.io.read64(regs::SLC_IDLE);
            error!(slc_status1 = s1, slc_status2 = s2, slc_idle = idle, "SLC state");
        }

        // Additionally decode the MMU fault registers on a page fault.
        let pf = regs::get_field(
            event_mask,
            regs::SYS_EVENT_MMU_PAGE_FAULT_SHIFT,
            regs::SYS_EVENT_MMU_PAGE_FAULT_MASK,
        ) as u8;
        if pf != 0 {
            mmu::fault_dump(&mut self.io, pf);
        }
        error
    }

    /// Logs decoded WM failures; returns the representative errno.
    fn report_wm_failures(&mut self, wm_id: u8, event_mask: u64, error_flags: &mut u64) -> i32 {
        let mut error = 0;
        for row in WM_ERR_BITS {
            if event_mask & row.bits != 0 {
                error!(wm_id, event = row.name, "WM event status");
                error = row.errno;
                *error_flags |= row.rsp;
            }
        }
        if error == errno::ETIMEDOUT {
            let cores = wm::get_cores(self.wm_core_assignment, wm_id);
            wm::status_dump(&mut self.io, wm_id, cores);
        }
        error
    }

    /// Logs decoded core failures; returns the representative errno.
    fn report_core_failures(&mut self, core_id: u8, event_mask: u64, error_flags: &mut u64) -> i32 {
        let mut error = 0;
        for row in CORE_ERR_BITS {
            if event_mask & row.bits != 0 {
                error!(core = core_id, event = row.name, "core event status");
                error = row.errno;
                *error_flags |= row.rsp;
                if row.bits == regs::CORE_EVENT_RAM_CORRECTION_EN {
                    self.stats.ram_corrections += 1;
                }
            }
        }
        error
    }

    /// Logs decoded interconnect failures; returns the representative
    /// errno.
    fn report_ic_failures(&mut self, ic_id: u8, event_mask: u64, error_flags: &mut u64) -> i32 {
        let mut error = 0;
        for row in IC_ERR_BITS {
            if event_mask & row.bits != 0 {
                error!(ic = ic_id, event = row.name, "interconnect event status");
                error = row.errno;
                *error_flags |= row.rsp;
            }
        }
        error
    }

    /// Decodes a failed WM response status into a reset class and response
    /// flags.
    fn report_wm_rsp_failure(
        &mut self,
        wm_id: u8,
        wm_rsp_status: u64,
        irq_status: &IrqStatus,
        reset_type: &mut ResetClass,
        error_flags: &mut u64,
    ) -> i32 {
        let mut err = errno::EIO;

        if let Some(r) = self.pendcmd[wm_id as usize] {
            if let Some(hook) = self.observers.error.as_mut() {
                hook(r.session, Some(r.cmd_id), wm_rsp_status);
            }
        }

        if wm_rsp_status & regs::REG_PARITY_ERROR_EN != 0 {
            error!(wm_id, "WM response error: PARITY");
            *reset_type = ResetClass::Wm;
            *error_flags |= rsp_err::SW_WM_PARITY_ERROR;
        } else if wm_rsp_status & regs::REG_WL_ID_MISMATCH_ERROR_EN != 0 {
            error!(wm_id, "WM response error: WL_ID_MISMATCH");
            *reset_type = ResetClass::Wm;
            *error_flags |= rsp_err::SW_WL_ID_MISMATCH_ERROR;
        } else if wm_rsp_status & regs::REG_CONF_ERROR_EN != 0 {
            error!(wm_id, "WM response error: CONFIRMATION_WRITES");
            *reset_type = ResetClass::Wm;
            *error_flags |= rsp_err::SW_CONF_ERROR;
        } else if wm_rsp_status & regs::REG_COMBINED_CRC_ERROR_EN != 0 {
            error!(wm_id, "WM response error: COMBINED_CRC");
            *reset_type = ResetClass::Wm;
            *error_flags |= rsp_err::SW_CRC_MISMATCH_ERROR;
        } else {
            let err_code = regs::get_field(
                wm_rsp_status,
                regs::WM_RESPONSE_FIFO_WL_STATUS_ERROR_CODE_SHIFT,
                regs::WM_RESPONSE_FIFO_WL_STATUS_ERROR_CODE_MASK,
            ) as u8;
            let Some(row) = WM_RSP_ERR_CODES.iter().find(|row| row.code == err_code) else {
                error!(wm_id, err_code, "invalid WM error code");
                return err;
            };
            *reset_type = row.reset;
            let core_id = regs::get_field(
                wm_rsp_status,
                regs::WM_RESPONSE_FIFO_WL_STATUS_FAILED_CORE_IDX_SHIFT,
                regs::WM_RESPONSE_FIFO_WL_STATUS_FAILED_CORE_IDX_MASK,
            ) as u8;
            error!(
                wm_id,
                err_code,
                name = row.name,
                failed_core = core_id,
                "WM halted on error"
            );
            *error_flags |= row.rsp;
            if core_id < self.props.num_cores {
                let c = core_id as usize;
                for bits in CORE_ERR_BITS {
                    if irq_status.core_events[c] & bits.bits != 0 {
                        error!(detail = bits.name, "core status");
                        err = bits.errno;
                    }
                }
                for bits in IC_ERR_BITS {
                    if irq_status.ic_events[c] & bits.bits != 0 {
                        error!(detail = bits.name, "interconnect status");
                        err = bits.errno;
                    }
                }
            } else {
                error!(
                    failed_core = core_id,
                    max = self.props.num_cores,
                    "invalid FAILED_CORE_ID"
                );
            }
        }
        err
    }

    /// Folds confirm-config results gathered at kick time into the
    /// response status.
    fn apply_conf_status(&mut self, r: CmdRef, full_reset: &mut bool, status: &mut u64) {
        let Some(cmd) = self.cmd(r) else { return };
        if cmd.conf_top_error {
            error!("confirmation mismatch on a top-level register");
            *full_reset = true;
            *status |= regs::REG_CONF_ERROR_EN;
        } else if cmd.conf_core_error != 0 {
            error!(
                core_mask = cmd.conf_core_error,
                "confirmation mismatch on core registers"
            );
            *status |= regs::REG_CONF_ERROR_EN;
        }
    }

    /// Reads back the combined CRCs and compares against golden values
    /// when the workload asked for it.
    fn check_crc(&mut self, r: CmdRef, status: &mut u64) {
        let Some(session) = self.sessions.get_mut(&r.session) else {
            return;
        };
        let Some(crc_buf) = session.combined_crc_buf else {
            error!("invalid crc buffer");
            return;
        };
        let Some(cmd) = session.cmds[r.priority as usize]
            .iter()
            .find(|c| c.user.cmd_id == r.cmd_id)
        else {
            return;
        };
        let Some(info) = cmd.sched_info else { return };
        let crc_enabled = cmd.user.flags & CMD_FLAG_CHECK_CRC != 0;
        let golden: Vec<u32> = cmd.user.crcs.clone();

        session.mem_ctx.sync_device_to_cpu(crc_buf);
        let mut crcs = Vec::new();
        for core_id in mask_ids(info.core_mask) {
            crcs.push(
                session
                    .mem_ctx
                    .read_u32(crc_buf, u64::from(core_id) * wm::COMBINED_CRC_CORE_OFFSET),
            );
        }

        if crc_enabled {
            for (idx, crc) in crcs.iter().enumerate() {
                match golden.get(idx) {
                    Some(gold) if gold == crc => {
                        debug!(crc, "combined CRC ok");
                    }
                    gold => {
                        *status |= regs::REG_COMBINED_CRC_ERROR_EN;
                        error!(crc, ?gold, "combined CRC mismatch");
                    }
                }
            }
        }
    }
}
