//! Driver error taxonomy and reset classification.
//!
//! This module defines the error handling vocabulary of the core. It provides:
//! 1. **`CoreError`:** the failure type returned by fallible driver operations.
//! 2. **`ResetClass`:** the ordered minimum-recovery levels (none/WM/MMU/full).
//! 3. **Response flags:** the per-workload error bitmap surfaced to user space
//!    in a completion response, covering both hardware event bits and
//!    software-synthesized conditions.

use thiserror::Error;

/// Errors produced by the driver core.
///
/// Hardware-originated failures carry the register offset they were detected
/// at, so platform logs can be correlated with the CR map.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// A register poll exhausted its retry budget.
    #[error("register poll timed out at {0:#x}")]
    PollTimeout(u64),

    /// Four consecutive reads of a parity-protected register failed the
    /// parity check.
    #[error("register parity failure at {0:#x}")]
    Parity(u64),

    /// A read returned the dead-hardware sentinel or all-ones.
    #[error("hardware is dead")]
    HwDead,

    /// No free Workload Manager or insufficient free cores.
    #[error("hardware busy")]
    HwBusy,

    /// A submitted command failed validation.
    #[error("invalid command: {0}")]
    InvalidCmd(&'static str),

    /// A referenced buffer id does not exist in the session.
    #[error("unknown buffer id {0:#x}")]
    UnknownBuffer(u32),

    /// A referenced session id does not exist on the device.
    #[error("unknown session id {0}")]
    UnknownSession(u32),

    /// The MMU context setup sequence failed.
    #[error("mmu setup failure")]
    MmuSetup,

    /// No free MMU hardware context and no reusable slot.
    #[error("mmu hardware contexts exhausted")]
    MmuCtxExhausted,
}

/// Minimum reset level required to recover from an error.
///
/// Classes are ordered by severity; an interrupt pass always applies the
/// maximum class reported across all decoded error bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResetClass {
    /// No reset required (counter-only events such as RAM correction).
    #[default]
    None,
    /// Reset the owning Workload Manager and its assigned cores.
    Wm,
    /// Invalidate the faulted MMU context, then reset the owning WM.
    Mmu,
    /// Full system reset.
    Full,
}

/// POSIX-style error numbers carried in completion responses.
pub mod errno {
    /// Input/output error.
    pub const EIO: i32 = 5;
    /// Try again.
    pub const EAGAIN: i32 = 11;
    /// Bad address (MMU faults).
    pub const EFAULT: i32 = 14;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Operation timed out (watchdogs).
    pub const ETIMEDOUT: i32 = 110;
}

/// Per-workload response error flags.
///
/// Every reason flag raised during a workload's life is accumulated into its
/// completion response, not just the first. `HW_*` flags map 1:1 to hardware
/// event/status bits; `SW_*` flags are synthesized by the driver.
pub mod rsp_err {
    /// AXI bus protocol error (system event).
    pub const HW_SYS_AXI_ERROR: u64 = 1 << 0;
    /// MMU page fault (system event, per-WM bit).
    pub const HW_SYS_MMU_PAGE_FAULT: u64 = 1 << 1;
    /// System memory watchdog expired.
    pub const HW_SYS_MEM_WDT: u64 = 1 << 2;
    /// AXI memory parity error.
    pub const HW_SYS_AXI_MEMORY_PARITY_ERROR: u64 = 1 << 3;
    /// MMU page-table parity error.
    pub const HW_SYS_MMU_PARITY_ERROR: u64 = 1 << 4;
    /// Corrected RAM bit-flip (no reset, counted).
    pub const HW_SYS_RAM_CORRECTION: u64 = 1 << 5;
    /// Uncorrectable RAM fault detected.
    pub const HW_SYS_RAM_DETECTION: u64 = 1 << 6;
    /// Unexpected LSYNC invalidate request.
    pub const HW_SYS_LSYNC_INV_REQ: u64 = 1 << 7;
    /// System-level logic fault.
    pub const HW_SYS_LOGIC_ERROR: u64 = 1 << 8;
    /// Software-detected parity failure on `SYS_EVENT_STATUS`.
    pub const SW_SYS_EVNT_PARITY_ERROR: u64 = 1 << 9;

    /// WM workload watchdog expired.
    pub const HW_EVNT_WM_WL_WDT: u64 = 1 << 10;
    /// WM workload-idle watchdog expired.
    pub const HW_EVNT_WM_WL_IDLE_WDT: u64 = 1 << 11;
    /// WM SOCIF watchdog expired.
    pub const HW_EVNT_WM_SOCIF_WDT: u64 = 1 << 12;
    /// WM logic fault.
    pub const HW_EVNT_LOGIC_FAULT: u64 = 1 << 13;
    /// Software-detected parity failure on `WM_EVENT_STATUS`.
    pub const SW_EVNT_WM_PARITY_ERROR: u64 = 1 << 14;

    /// WM response: core raised an interrupt before the kick.
    pub const HW_CORE_IRQ_BEFORE_KICK: u64 = 1 << 15;
    /// WM response: indirect mask programming failed.
    pub const HW_INDIRECT_MASK_SET_ERROR: u64 = 1 << 16;
    /// WM response: core register access failed during kick.
    pub const HW_KICK_CORE_ACCESS_ERROR: u64 = 1 << 17;
    /// WM response: CNN_CONTROL start bit already high.
    pub const HW_CNN_CONTROL_START_HIGH: u64 = 1 << 18;
    /// WM response: CNN status error.
    pub const HW_CNN_STATUS_ERROR: u64 = 1 << 19;
    /// WM response: core register access failed during interrupt handling.
    pub const HW_INT_CORE_ACCESS_ERROR: u64 = 1 << 20;
    /// WM response: unexpected core event.
    pub const HW_CORE_EVENT_ERROR: u64 = 1 << 21;
    /// WM response: core event could not be cleared.
    pub const HW_CORE_EVENT_NOT_CLEARED: u64 = 1 << 22;
    /// WM response: core event IRQ line stuck high.
    pub const HW_CORE_EVENT_IRQ_HIGH: u64 = 1 << 23;
    /// WM response: interconnect error.
    pub const HW_INTERCONNECT_ERROR: u64 = 1 << 24;

    /// Core logic fault.
    pub const HW_CORE_LOGIC_ERROR: u64 = 1 << 25;
    /// Core corrected RAM bit-flip (no reset, counted).
    pub const HW_RAM_CORRECTION: u64 = 1 << 26;
    /// Core uncorrectable RAM fault.
    pub const HW_RAM_DETECTION: u64 = 1 << 27;
    /// Multi-core synchronisation error.
    pub const HW_CORE_SYNC_ERROR: u64 = 1 << 28;
    /// Core high-level watchdog expired.
    pub const HW_CORE_WDT: u64 = 1 << 29;
    /// Core memory watchdog expired.
    pub const HW_CORE_MEM_WDT: u64 = 1 << 30;
    /// CNN execution error.
    pub const HW_CORE_CNN_ERROR: u64 = 1 << 31;

    /// Interconnect lockstep mismatch.
    pub const HW_LOCKSTEP_ERROR: u64 = 1 << 32;
    /// Interconnect logic fault.
    pub const HW_IC_LOGIC_ERROR: u64 = 1 << 33;
    /// SOCIF read data mismatch.
    pub const HW_SOCIF_READ_MISMATCH: u64 = 1 << 34;
    /// SOCIF read unresponsive.
    pub const HW_SOCIF_READ_UNRESPONSIVE: u64 = 1 << 35;
    /// Software-detected parity failure on an interconnect status read.
    pub const SW_IC_PARITY_ERROR: u64 = 1 << 36;

    /// Software-detected parity failure on a WM response read.
    pub const SW_WM_PARITY_ERROR: u64 = 1 << 37;
    /// Response FIFO workload id did not match the pending command.
    pub const SW_WL_ID_MISMATCH_ERROR: u64 = 1 << 38;
    /// Confirmation read-back of configuration registers mismatched.
    pub const SW_CONF_ERROR: u64 = 1 << 39;
    /// Combined CRC mismatch against the golden values.
    pub const SW_CRC_MISMATCH_ERROR: u64 = 1 << 40;
    /// Submission attempted while the target WM was busy.
    pub const SW_HW_BUSY: u64 = 1 << 41;
    /// Command payload failed validation at submit time.
    pub const SW_INVALID_CMD_INFO: u64 = 1 << 42;
    /// Command type is not executable on this device.
    pub const SW_INVALID_CMD_TYPE: u64 = 1 << 43;
    /// MMU context setup failed during dispatch.
    pub const SW_MMU_SETUP_FAILURE: u64 = 1 << 44;
    /// Command skipped because of the `hw_bypass` countdown.
    pub const SW_SKIP_CMD: u64 = 1 << 45;
    /// Software watchdog expired.
    pub const SW_WDT_EXPIRED: u64 = 1 << 46;
    /// The WM kick bit never deasserted before a low-latency submission.
    pub const SW_KICK_BIT_READ_BACK_FAILURE: u64 = 1 << 47;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_class_ordering() {
        assert!(ResetClass::None < ResetClass::Wm);
        assert!(ResetClass::Wm < ResetClass::Mmu);
        assert!(ResetClass::Mmu < ResetClass::Full);
    }

    #[test]
    fn error_display_carries_offset() {
        let err = CoreError::PollTimeout(0x238);
        assert!(format!("{err}").contains("0x238"));
    }
}
