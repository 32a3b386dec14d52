//! Control-register map of the accelerator.
//!
//! Offsets, field shifts/masks and event-bit sets for the register bank the
//! driver programs. It provides:
//! 1. **Offsets:** one `u64` constant per 64-bit register.
//! 2. **Fields:** shift/mask pairs plus `get_field`/`set_field` helpers.
//! 3. **Event sets:** the default enable/clear masks per event source.
//! 4. **Pseudo-bits:** software flags packed into unused upper bits of
//!    status shadows so they flow through the same error pipeline as real
//!    hardware bits.
//!
//! # Register groups
//!
//! * `0x0000`: identification and system control
//! * `0x0200`: Workload Manager window (indirect via `TLC_WM_INDIRECT`)
//! * `0x0300`: core window (indirect via `CORE_CTRL_INDIRECT`)
//! * `0x0500`: interconnect window (indirect via `IC_CORE_INDIRECT`)

/// Extracts a field from a register value.
#[inline]
pub const fn get_field(val: u64, shift: u32, mask: u64) -> u64 {
    (val & mask) >> shift
}

/// Places a value into a register field.
#[inline]
pub const fn set_field(val: u64, shift: u32, mask: u64) -> u64 {
    (val << shift) & mask
}

/// Sentinel read back from a dead device (FPGA platforms may also return
/// all-ones).
pub const DEAD_HW: u64 = 0x000d_ead1_000d_ead1;

// ---------------------------------------------------------------------------
// Identification and system control
// ---------------------------------------------------------------------------

/// Product identification register.
pub const PRODUCT_ID: u64 = 0x0000;
/// BVNC hardware variant identifier.
pub const CORE_ID: u64 = 0x0008;
/// IP configuration: core count and capability flags.
pub const CORE_IP_CONFIG: u64 = 0x0010;
/// IP configuration: on-chip memory sizes.
pub const CORE_IP_CONFIG1: u64 = 0x0018;

/// `CORE_ID` branch field (B of BVNC).
pub const CORE_ID_BRANCH_SHIFT: u32 = 48;
/// `CORE_ID` version field (V of BVNC).
pub const CORE_ID_VERSION_SHIFT: u32 = 32;
/// `CORE_ID` number-of-variants field (N of BVNC).
pub const CORE_ID_NUMBER_SHIFT: u32 = 16;
/// `CORE_ID` configuration field (C of BVNC). The bottom 4 bits identify
/// build variants and are ignored when comparing BVNCs.
pub const CORE_ID_CONFIG_SHIFT: u32 = 0;
/// Mask clearing the build-variant bits of the C field.
pub const CORE_ID_BVNC_CLRMSK: u64 = 0xffff_ffff_ffff_fff0;

/// `CORE_IP_CONFIG` number-of-cores field.
pub const CORE_IP_CONFIG_NUM_CORES_SHIFT: u32 = 0;
/// `CORE_IP_CONFIG` number-of-cores mask.
pub const CORE_IP_CONFIG_NUM_CORES_MASK: u64 = 0x0f;
/// `CORE_IP_CONFIG` register-parity capability bit.
pub const CORE_IP_CONFIG_PARITY_EN: u64 = 1 << 8;
/// `CORE_IP_CONFIG` RTM capability bit.
pub const CORE_IP_CONFIG_RTM_EN: u64 = 1 << 9;
/// `CORE_IP_CONFIG` MMU address-width field.
pub const CORE_IP_CONFIG_MMU_WIDTH_SHIFT: u32 = 16;
/// `CORE_IP_CONFIG` MMU address-width mask.
pub const CORE_IP_CONFIG_MMU_WIDTH_MASK: u64 = 0xff_0000;

/// `CORE_IP_CONFIG1` LOCM size field (KiB).
pub const CORE_IP_CONFIG1_LOCM_KB_SHIFT: u32 = 0;
/// `CORE_IP_CONFIG1` LOCM size mask.
pub const CORE_IP_CONFIG1_LOCM_KB_MASK: u64 = 0xffff;
/// `CORE_IP_CONFIG1` SOCM size field (KiB).
pub const CORE_IP_CONFIG1_SOCM_KB_SHIFT: u32 = 16;
/// `CORE_IP_CONFIG1` SOCM size mask.
pub const CORE_IP_CONFIG1_SOCM_KB_MASK: u64 = 0xffff_0000;
/// `CORE_IP_CONFIG1` per-core SOCM chunk field (KiB).
pub const CORE_IP_CONFIG1_SOCM_CORE_KB_SHIFT: u32 = 32;
/// `CORE_IP_CONFIG1` per-core SOCM chunk mask.
pub const CORE_IP_CONFIG1_SOCM_CORE_KB_MASK: u64 = 0xffff_0000_0000;

/// Aggregated interrupt source register.
pub const HOST_EVENT_SOURCE: u64 = 0x0020;
/// `HOST_EVENT_SOURCE` system-source bit.
pub const HOST_EVENT_SOURCE_SYS_EN: u64 = 1 << 0;
/// `HOST_EVENT_SOURCE` per-WM source field.
pub const HOST_EVENT_SOURCE_WM_SHIFT: u32 = 8;
/// `HOST_EVENT_SOURCE` per-WM source mask.
pub const HOST_EVENT_SOURCE_WM_MASK: u64 = 0xff00;
/// `HOST_EVENT_SOURCE` per-core source field.
pub const HOST_EVENT_SOURCE_CORE_SHIFT: u32 = 16;
/// `HOST_EVENT_SOURCE` per-core source mask.
pub const HOST_EVENT_SOURCE_CORE_MASK: u64 = 0xff_0000;
/// `HOST_EVENT_SOURCE` per-interconnect source field.
pub const HOST_EVENT_SOURCE_IC_SHIFT: u32 = 24;
/// `HOST_EVENT_SOURCE` per-interconnect source mask.
pub const HOST_EVENT_SOURCE_IC_MASK: u64 = 0xff00_0000;

/// System event status.
pub const SYS_EVENT_STATUS: u64 = 0x0028;
/// System event clear (write-1-to-clear).
pub const SYS_EVENT_CLEAR: u64 = 0x0030;
/// System event enable.
pub const SYS_EVENT_ENABLE: u64 = 0x0038;
/// System event injection (validation builds).
pub const SYS_EVENT_INJECT: u64 = 0x0040;
/// RAM-correction reporting threshold.
pub const SYS_EVENT_THRESHOLD: u64 = 0x0048;

/// SYS event: per-WM MMU page fault field.
pub const SYS_EVENT_MMU_PAGE_FAULT_SHIFT: u32 = 0;
/// SYS event: per-WM MMU page fault mask.
pub const SYS_EVENT_MMU_PAGE_FAULT_MASK: u64 = 0xff;
/// SYS event: AXI bus error.
pub const SYS_EVENT_AXI_ERROR_EN: u64 = 1 << 8;
/// SYS event: system memory watchdog.
pub const SYS_EVENT_SYS_MEM_WDT_EN: u64 = 1 << 9;
/// SYS event: MMU parity error.
pub const SYS_EVENT_MMU_PARITY_ERROR_EN: u64 = 1 << 10;
/// SYS event: AXI memory parity error.
pub const SYS_EVENT_AXI_MEMORY_PARITY_ERROR_EN: u64 = 1 << 11;
/// SYS event: corrected RAM bit-flip.
pub const SYS_EVENT_RAM_CORRECTION_EN: u64 = 1 << 12;
/// SYS event: uncorrectable RAM fault.
pub const SYS_EVENT_RAM_DETECTION_EN: u64 = 1 << 13;
/// SYS event: unexpected LSYNC invalidate request.
pub const SYS_EVENT_LSYNC_INV_REQ_EN: u64 = 1 << 14;
/// SYS event: system logic fault.
pub const SYS_EVENT_LOGIC_ERROR_EN: u64 = 1 << 15;
/// SYS event: memory bus reset completed.
pub const SYS_EVENT_MEMBUS_RESET_DONE_EN: u64 = 1 << 16;
/// SYS event: RAM initialisation completed.
pub const SYS_EVENT_RAM_INIT_DONE_EN: u64 = 1 << 17;
/// SYS event: SOCM scrub completed.
pub const SYS_EVENT_SOCM_SCRUB_DONE_EN: u64 = 1 << 18;
/// SYS event: power transition completed.
pub const SYS_EVENT_POWER_COMPLETE_EN: u64 = 1 << 19;
/// SYS event: power transition aborted.
pub const SYS_EVENT_POWER_ABORT_EN: u64 = 1 << 20;

/// SYS error events (reset-class table input).
pub const SYS_ERR_EVENTS: u64 = SYS_EVENT_MMU_PAGE_FAULT_MASK
    | SYS_EVENT_AXI_ERROR_EN
    | SYS_EVENT_SYS_MEM_WDT_EN
    | SYS_EVENT_MMU_PARITY_ERROR_EN
    | SYS_EVENT_AXI_MEMORY_PARITY_ERROR_EN
    | SYS_EVENT_RAM_CORRECTION_EN
    | SYS_EVENT_RAM_DETECTION_EN
    | SYS_EVENT_LSYNC_INV_REQ_EN
    | SYS_EVENT_LOGIC_ERROR_EN;
/// SYS events enabled during normal operation.
pub const SYS_EVENTS_DEFAULT: u64 =
    SYS_ERR_EVENTS | SYS_EVENT_MEMBUS_RESET_DONE_EN | SYS_EVENT_RAM_INIT_DONE_EN;

/// Module reset control.
pub const SYS_RESET_CTRL: u64 = 0x0050;
/// `SYS_RESET_CTRL` per-core reset field.
pub const SYS_RESET_CTRL_CORE_SHIFT: u32 = 0;
/// `SYS_RESET_CTRL` per-core reset mask.
pub const SYS_RESET_CTRL_CORE_MASK: u64 = 0xff;
/// `SYS_RESET_CTRL` per-WM reset field.
pub const SYS_RESET_CTRL_WM_SHIFT: u32 = 8;
/// `SYS_RESET_CTRL` per-WM reset mask.
pub const SYS_RESET_CTRL_WM_MASK: u64 = 0xff00;
/// `SYS_RESET_CTRL` interconnect reset bit.
pub const SYS_RESET_CTRL_INTERCONNECT_EN: u64 = 1 << 16;
/// `SYS_RESET_CTRL` SLC reset bit.
pub const SYS_RESET_CTRL_SLC_EN: u64 = 1 << 17;
/// `SYS_RESET_CTRL` memory-hierarchy reset bit.
pub const SYS_RESET_CTRL_MH_EN: u64 = 1 << 18;
/// `SYS_RESET_CTRL` register-bank reset bit.
pub const SYS_RESET_CTRL_REGBANK_EN: u64 = 1 << 19;

/// System clock control.
pub const SYS_CLK_CTRL0: u64 = 0x0058;
/// System clock status.
pub const SYS_CLK_STATUS0: u64 = 0x0060;

/// Clock gating mode: clock off.
pub const CLK_MODE_OFF: u64 = 0;
/// Clock gating mode: clock forced on.
pub const CLK_MODE_ON: u64 = 1;
/// Clock gating mode: automatic gating.
pub const CLK_MODE_AUTO: u64 = 2;

/// `SYS_CLK_CTRL0` per-core mode field (2 bits per core).
pub const SYS_CLK_CORE0_SHIFT: u32 = 0;
/// `SYS_CLK_CTRL0` per-WM mode field (2 bits per WM).
pub const SYS_CLK_WM0_SHIFT: u32 = 16;
/// `SYS_CLK_CTRL0` NOC mode field.
pub const SYS_CLK_NOC_SHIFT: u32 = 32;
/// `SYS_CLK_CTRL0` interconnect mode field.
pub const SYS_CLK_INTERCONNECT_SHIFT: u32 = 34;
/// `SYS_CLK_CTRL0` AXI mode field.
pub const SYS_CLK_AXI_SHIFT: u32 = 36;
/// `SYS_CLK_CTRL0` SLC mode field.
pub const SYS_CLK_SLC_SHIFT: u32 = 38;
/// `SYS_CLK_CTRL0` LSYNC mode field.
pub const SYS_CLK_LSYNC_SHIFT: u32 = 40;
/// `SYS_CLK_CTRL0` SOCM mode field.
pub const SYS_CLK_SOCM_SHIFT: u32 = 42;
/// `SYS_CLK_CTRL0` register-bank mode field (never off).
pub const SYS_CLK_REGBANK_SHIFT: u32 = 44;

/// Spreads a 2-bit clock `mode` over the per-instance field starting at
/// `shift` for every instance selected by `mask`.
pub fn clocks_multi(shift: u32, mode: u64, mask: u8) -> u64 {
    let mut val = 0u64;
    for id in 0..8u32 {
        if mask & (1 << id) != 0 {
            val |= mode << (shift + id * 2);
        }
    }
    val
}

/// System clock control word with every unit in `mode`.
pub fn sys_clocks_default(mode: u64) -> u64 {
    clocks_multi(SYS_CLK_CORE0_SHIFT, mode, 0xff)
        | clocks_multi(SYS_CLK_WM0_SHIFT, mode, 0xff)
        | (mode << SYS_CLK_NOC_SHIFT)
        | (mode << SYS_CLK_INTERCONNECT_SHIFT)
        | (mode << SYS_CLK_AXI_SHIFT)
        | (mode << SYS_CLK_SLC_SHIFT)
        | (mode << SYS_CLK_LSYNC_SHIFT)
        | (mode << SYS_CLK_SOCM_SHIFT)
        | (mode << SYS_CLK_REGBANK_SHIFT)
}

/// System clock control word forcing the cores in `core_mask` on and
/// everything else automatic (interconnect forced on during resets).
pub fn sys_clocks_reset(core_mask: u8) -> u64 {
    clocks_multi(SYS_CLK_CORE0_SHIFT, CLK_MODE_ON, core_mask)
        | clocks_multi(SYS_CLK_CORE0_SHIFT, CLK_MODE_AUTO, !core_mask)
        | clocks_multi(SYS_CLK_WM0_SHIFT, CLK_MODE_AUTO, 0xff)
        | (CLK_MODE_AUTO << SYS_CLK_NOC_SHIFT)
        | (CLK_MODE_ON << SYS_CLK_INTERCONNECT_SHIFT)
        | (CLK_MODE_AUTO << SYS_CLK_AXI_SHIFT)
        | (CLK_MODE_AUTO << SYS_CLK_SLC_SHIFT)
        | (CLK_MODE_AUTO << SYS_CLK_LSYNC_SHIFT)
        | (CLK_MODE_AUTO << SYS_CLK_SOCM_SHIFT)
        | (CLK_MODE_AUTO << SYS_CLK_REGBANK_SHIFT)
}

/// Power domain transition request.
pub const POWER_EVENT: u64 = 0x0068;
/// `POWER_EVENT` request bit.
pub const POWER_EVENT_REQ_EN: u64 = 1 << 0;
/// `POWER_EVENT` transition type bit (set = power up).
pub const POWER_EVENT_TYPE_POWER_UP_EN: u64 = 1 << 1;
/// `POWER_EVENT` domain field. Domain 0 is the always-on TLC, so core
/// domains are the core mask shifted left by one.
pub const POWER_EVENT_DOMAIN_SHIFT: u32 = 8;
/// `POWER_EVENT` domain mask.
pub const POWER_EVENT_DOMAIN_MASK: u64 = 0x1_ff00;

/// System RAM initialisation kick.
pub const SYS_RAM_INIT: u64 = 0x0070;
/// SOCM scrub control.
pub const SOCM_SCRUB_CTRL: u64 = 0x0078;
/// Generic KICK bit used by `SYS_RAM_INIT`, `SOCM_SCRUB_CTRL` and
/// `LOCM_SCRUB_CTRL`.
pub const SCRUB_KICK_EN: u64 = 1 << 0;

/// AXI (ACE) protocol status; non-zero indicates a bus error.
pub const ACE_STATUS: u64 = 0x0080;

/// System memory watchdog compare-match value.
pub const SYS_MEM_WDT_COMPAREMATCH: u64 = 0x0088;
/// System memory watchdog control.
pub const SYS_MEM_WDT_CTRL: u64 = 0x0090;

/// Watchdog mode: disabled.
pub const WDT_MODE_DISABLED: u64 = 0;
/// Watchdog mode: restart on kick or pass completion.
pub const WDT_MODE_KICK_PASS: u64 = 1;
/// Watchdog mode: restart on workload kick.
pub const WDT_MODE_KICK_WL: u64 = 2;
/// Watchdog mode: free-running.
pub const WDT_MODE_ENABLED: u64 = 3;

/// SLC control (address hashing).
pub const SLC_CTRL: u64 = 0x0098;
/// `SLC_CTRL` hash-mode field.
pub const SLC_CTRL_HASH_MODE_SHIFT: u32 = 0;
/// `SLC_CTRL` hash-mode mask.
pub const SLC_CTRL_HASH_MODE_MASK: u64 = 0x3;

/// SLC idle status (all-ones when the memory bus interface is idle).
pub const SLC_IDLE: u64 = 0x00a0;
/// `SLC_IDLE` full mask.
pub const SLC_IDLE_MASKFULL: u64 = 0xff;
/// SLC diagnostic status 1.
pub const SLC_STATUS1: u64 = 0x00a8;
/// SLC diagnostic status 2.
pub const SLC_STATUS2: u64 = 0x00b0;

/// Host-bus stall-ratio bring-up knob.
pub const SYSBUS_HOST_STALL_RATIO: u64 = 0x00b8;
/// Memory-bus stall-ratio bring-up knob.
pub const MEMBUS_SYS_STALL_RATIO: u64 = 0x00c0;

/// Requestor-context override.
pub const REQ_CTXT_OVERRIDE: u64 = 0x00c8;
/// `REQ_CTXT_OVERRIDE` OS0 override enable.
pub const REQ_CTXT_OVERRIDE_OS0_EN: u64 = 1 << 0;

/// MMU virtual address range 0 descriptor.
pub const MMU_PAGE_SIZE_RANGE_ONE: u64 = 0x00d0;
/// MMU virtual address range 1 descriptor.
pub const MMU_PAGE_SIZE_RANGE_TWO: u64 = 0x00d8;
/// Page-size field of the range descriptors.
pub const MMU_RANGE_PAGE_SIZE_SHIFT: u32 = 0;
/// Base-address field of the range descriptors (address >> 12).
pub const MMU_RANGE_BASE_ADDR_SHIFT: u32 = 4;
/// End-address field of the range descriptors (address >> 12).
pub const MMU_RANGE_END_ADDR_SHIFT: u32 = 34;

/// MMU control (bypass).
pub const OS0_MMU_CTRL: u64 = 0x00e0;
/// `OS0_MMU_CTRL` bypass enable.
pub const OS0_MMU_CTRL_BYPASS_EN: u64 = 1 << 0;
/// Selects the MMU hardware context addressed by `OS0_MMU_CBASE_MAPPING`.
pub const OS0_MMU_CBASE_MAPPING_CONTEXT: u64 = 0x00e8;
/// Page-catalogue base of the selected context (physical address >> 12).
pub const OS0_MMU_CBASE_MAPPING: u64 = 0x00f0;
/// Alignment shift of the catalogue base field.
pub const OS0_MMU_CBASE_MAPPING_ALIGNSHIFT: u32 = 12;
/// MMU TLB invalidation control.
pub const OS0_MMU_CTRL_INVAL: u64 = 0x00f8;
/// Invalidate page-catalogue entries.
pub const OS0_MMU_CTRL_INVAL_PC_EN: u64 = 1 << 0;
/// Invalidate page-directory entries.
pub const OS0_MMU_CTRL_INVAL_PD_EN: u64 = 1 << 1;
/// Invalidate page-table entries.
pub const OS0_MMU_CTRL_INVAL_PT_EN: u64 = 1 << 2;
/// Invalidate every context.
pub const OS0_MMU_CTRL_INVAL_ALL_CONTEXTS_EN: u64 = 1 << 3;
/// Context field of the invalidation control.
pub const OS0_MMU_CTRL_INVAL_CONTEXT_SHIFT: u32 = 8;
/// Context mask of the invalidation control.
pub const OS0_MMU_CTRL_INVAL_CONTEXT_MASK: u64 = 0xff00;
/// MMU invalidation status.
pub const OS0_MMU_CTRL_INVAL_STATUS: u64 = 0x0100;
/// Invalidation-pending bit.
pub const OS0_MMU_CTRL_INVAL_STATUS_PENDING_EN: u64 = 1 << 0;
/// Parity bit accompanying the pending bit on parity-capable hardware.
pub const OS0_MMU_CTRL_INVAL_STATUS_PARITY_EN: u64 = 1 << 1;

/// Per-core MMU fault status 1, indexed by core id.
pub const fn core_mmu_fault_status1(core_id: u8) -> u64 {
    0x0120 + core_id as u64 * 0x10
}
/// Per-core MMU fault status 2, indexed by core id.
pub const fn core_mmu_fault_status2(core_id: u8) -> u64 {
    0x0128 + core_id as u64 * 0x10
}

/// `MMU_FAULT_STATUS1` faulting address field (address >> 4).
pub const MMU_FAULT_STATUS1_ADDRESS_SHIFT: u32 = 4;
/// `MMU_FAULT_STATUS1` faulting address mask.
pub const MMU_FAULT_STATUS1_ADDRESS_MASK: u64 = 0x000f_ffff_ffff_fff0;
/// `MMU_FAULT_STATUS1` page-walk level field.
pub const MMU_FAULT_STATUS1_LEVEL_SHIFT: u32 = 52;
/// `MMU_FAULT_STATUS1` page-walk level mask.
pub const MMU_FAULT_STATUS1_LEVEL_MASK: u64 = 0x0030_0000_0000_0000;
/// `MMU_FAULT_STATUS1` requestor id field.
pub const MMU_FAULT_STATUS1_REQ_ID_SHIFT: u32 = 54;
/// `MMU_FAULT_STATUS1` requestor id mask.
pub const MMU_FAULT_STATUS1_REQ_ID_MASK: u64 = 0x00c0_0000_0000_0000;
/// `MMU_FAULT_STATUS1` context field.
pub const MMU_FAULT_STATUS1_CONTEXT_SHIFT: u32 = 56;
/// `MMU_FAULT_STATUS1` context mask.
pub const MMU_FAULT_STATUS1_CONTEXT_MASK: u64 = 0x1f00_0000_0000_0000;
/// `MMU_FAULT_STATUS1` read-not-write bit.
pub const MMU_FAULT_STATUS1_RNW_EN: u64 = 1 << 61;
/// `MMU_FAULT_STATUS1` fault-type field.
pub const MMU_FAULT_STATUS1_TYPE_SHIFT: u32 = 62;
/// `MMU_FAULT_STATUS1` fault-type mask.
pub const MMU_FAULT_STATUS1_TYPE_MASK: u64 = 0x4000_0000_0000_0000;
/// `MMU_FAULT_STATUS1` fault-valid bit.
pub const MMU_FAULT_STATUS1_FAULT_EN: u64 = 1 << 0;

/// `MMU_FAULT_STATUS2` BIF id field.
pub const MMU_FAULT_STATUS2_BIF_ID_SHIFT: u32 = 0;
/// `MMU_FAULT_STATUS2` BIF id mask.
pub const MMU_FAULT_STATUS2_BIF_ID_MASK: u64 = 0xf;
/// `MMU_FAULT_STATUS2` TLB entry field.
pub const MMU_FAULT_STATUS2_TLB_ENTRY_SHIFT: u32 = 4;
/// `MMU_FAULT_STATUS2` TLB entry mask.
pub const MMU_FAULT_STATUS2_TLB_ENTRY_MASK: u64 = 0xff0;
/// `MMU_FAULT_STATUS2` SLC bank field.
pub const MMU_FAULT_STATUS2_BANK_SHIFT: u32 = 12;
/// `MMU_FAULT_STATUS2` SLC bank mask.
pub const MMU_FAULT_STATUS2_BANK_MASK: u64 = 0xf000;

// ---------------------------------------------------------------------------
// Workload Manager window (indirect via TLC_WM_INDIRECT)
// ---------------------------------------------------------------------------

/// WM window selector; writes take effect after a read-back confirms them.
pub const TLC_WM_INDIRECT: u64 = 0x0200;
/// `TLC_WM_INDIRECT` address mask.
pub const TLC_WM_INDIRECT_ADDRESS_MASK: u64 = 0x7;

/// WM event status (selected WM).
pub const WM_EVENT_STATUS: u64 = 0x0208;
/// WM event clear.
pub const WM_EVENT_CLEAR: u64 = 0x0210;
/// WM event enable.
pub const WM_EVENT_ENABLE: u64 = 0x0218;

/// WM event: response FIFO holds a completed workload.
pub const WM_EVENT_RESPONSE_FIFO_READY_EN: u64 = 1 << 0;
/// WM event: workload watchdog expired.
pub const WM_EVENT_WM_WL_WDT_EN: u64 = 1 << 1;
/// WM event: workload-idle watchdog expired.
pub const WM_EVENT_WM_WL_IDLE_WDT_EN: u64 = 1 << 2;
/// WM event: SOCIF watchdog expired.
pub const WM_EVENT_WM_SOCIF_WDT_EN: u64 = 1 << 3;
/// WM event: WM logic fault.
pub const WM_EVENT_LOGIC_FAULT_EN: u64 = 1 << 4;

/// WM error events (reset-class table input).
pub const WM_ERR_EVENTS: u64 = WM_EVENT_WM_WL_WDT_EN
    | WM_EVENT_WM_WL_IDLE_WDT_EN
    | WM_EVENT_WM_SOCIF_WDT_EN
    | WM_EVENT_LOGIC_FAULT_EN;
/// WM events enabled during normal operation.
pub const WM_EVENTS_DEFAULT: u64 = WM_EVENT_RESPONSE_FIFO_READY_EN | WM_ERR_EVENTS;

/// Workload id register programmed before a kick.
pub const WM_WL_ID: u64 = 0x0220;
/// `WM_WL_ID` id mask.
pub const WM_WL_ID_MASK: u64 = 0xffff;
/// Workload control (kick).
pub const WM_WL_CONTROL: u64 = 0x0228;
/// `WM_WL_CONTROL` start bit.
pub const WM_WL_CONTROL_WL_START_EN: u64 = 1 << 0;

/// Response FIFO pop strobe.
pub const WM_RESPONSE_FIFO_READ: u64 = 0x0230;
/// `WM_RESPONSE_FIFO_READ` pop bit.
pub const WM_RESPONSE_FIFO_READ_EN: u64 = 1 << 0;
/// Response FIFO: workload completion status.
pub const WM_RESPONSE_FIFO_WL_STATUS: u64 = 0x0238;
/// Response FIFO: workload id.
pub const WM_RESPONSE_FIFO_WL_ID: u64 = 0x0240;
/// Response FIFO: cycle count of the completed workload.
pub const WM_RESPONSE_FIFO_WL_PERF: u64 = 0x0248;

/// `WL_STATUS` success bit.
pub const WM_RESPONSE_FIFO_WL_STATUS_SUCCESS_EN: u64 = 1 << 0;
/// `WL_STATUS` failure bit.
pub const WM_RESPONSE_FIFO_WL_STATUS_WL_FAILURE_EN: u64 = 1 << 1;
/// `WL_STATUS` error-code field.
pub const WM_RESPONSE_FIFO_WL_STATUS_ERROR_CODE_SHIFT: u32 = 8;
/// `WL_STATUS` error-code mask.
pub const WM_RESPONSE_FIFO_WL_STATUS_ERROR_CODE_MASK: u64 = 0xff00;
/// `WL_STATUS` failed-core-index field.
pub const WM_RESPONSE_FIFO_WL_STATUS_FAILED_CORE_IDX_SHIFT: u32 = 16;
/// `WL_STATUS` failed-core-index mask.
pub const WM_RESPONSE_FIFO_WL_STATUS_FAILED_CORE_IDX_MASK: u64 = 0x7_0000;
/// `WL_STATUS` hardware parity bit.
pub const WM_RESPONSE_FIFO_WL_STATUS_PARITY_EN: u64 = 1 << 19;
/// `WL_STATUS` full field mask.
pub const WM_RESPONSE_FIFO_WL_STATUS_MASKFULL: u64 = 0xf_ff03;

/// WM response error code: core interrupt before kick.
pub const WM_RSP_ERR_CORE_IRQ_BEFORE_KICK: u8 = 1;
/// WM response error code: indirect mask programming failed.
pub const WM_RSP_ERR_INDIRECT_MASK_SET_ERROR: u8 = 2;
/// WM response error code: core access failed during kick.
pub const WM_RSP_ERR_KICK_CORE_ACCESS_ERROR: u8 = 3;
/// WM response error code: CNN_CONTROL start already high.
pub const WM_RSP_ERR_CNN_CONTROL_START_HIGH: u8 = 4;
/// WM response error code: CNN status error.
pub const WM_RSP_ERR_CNN_STATUS_ERROR: u8 = 5;
/// WM response error code: core access failed in interrupt handling.
pub const WM_RSP_ERR_INT_CORE_ACCESS_ERROR: u8 = 6;
/// WM response error code: unexpected core event.
pub const WM_RSP_ERR_CORE_EVENT_ERROR: u8 = 7;
/// WM response error code: core event not cleared.
pub const WM_RSP_ERR_CORE_EVENT_NOT_CLEARED: u8 = 8;
/// WM response error code: core event IRQ stuck high.
pub const WM_RSP_ERR_CORE_EVENT_IRQ_HIGH: u8 = 9;
/// WM response error code: interconnect error.
pub const WM_RSP_ERR_INTERCONNECT_ERROR: u8 = 10;

/// Response FIFO bandwidth counters (transactions), base offset.
pub const WM_RESPONSE_FIFO_WL_BW_BASE: u64 = 0x0250;
/// Bandwidth counter index: LOCM reads.
pub const BW_LOCM_RD: u64 = 0;
/// Bandwidth counter index: LOCM writes.
pub const BW_LOCM_WR: u64 = 1;
/// Bandwidth counter index: LOCM masked writes.
pub const BW_LOCM_MWR: u64 = 2;
/// Bandwidth counter index: SOCM reads.
pub const BW_SOCM_RD: u64 = 3;
/// Bandwidth counter index: SOCM writes.
pub const BW_SOCM_WR: u64 = 4;
/// Bandwidth counter index: SOCM masked writes.
pub const BW_SOCM_MWR: u64 = 5;
/// Bandwidth counter index: DDR reads.
pub const BW_DDR_RD: u64 = 6;
/// Bandwidth counter index: DDR writes.
pub const BW_DDR_WR: u64 = 7;
/// Bandwidth counter index: DDR masked writes.
pub const BW_DDR_MWR: u64 = 8;
/// Returns the offset of transaction bandwidth counter `idx`.
pub const fn wm_response_fifo_wl_bw(idx: u64) -> u64 {
    WM_RESPONSE_FIFO_WL_BW_BASE + idx * 8
}
/// Response FIFO bandwidth counters (words), base offset.
pub const WM_RESPONSE_FIFO_WL_BW_WORD_BASE: u64 = 0x0298;
/// Returns the offset of word bandwidth counter `idx` (no MWR variants).
pub const fn wm_response_fifo_wl_bw_word(idx: u64) -> u64 {
    WM_RESPONSE_FIFO_WL_BW_WORD_BASE + idx * 8
}

/// WM workload watchdog compare-match.
pub const WM_WL_WDT_COMPAREMATCH: u64 = 0x02c8;
/// WM workload watchdog control.
pub const WM_WL_WDT_CTRL: u64 = 0x02d0;
/// WM workload-idle watchdog compare-match.
pub const WM_WL_IDLE_WDT_COMPAREMATCH: u64 = 0x02d8;
/// WM workload-idle watchdog control.
pub const WM_WL_IDLE_WDT_CTRL: u64 = 0x02e0;
/// WM SOCIF watchdog compare-match.
pub const WM_SOCIF_WDT_COMPAREMATCH: u64 = 0x02e8;
/// WM SOCIF watchdog control.
pub const WM_SOCIF_WDT_CTRL: u64 = 0x02f0;

/// WM state register.
pub const WM_STATUS: u64 = 0x02f8;
/// `WM_STATUS` state mask.
pub const WM_STATUS_STATE_MASK: u64 = 0x7;
/// `WM_STATUS` idle state value.
pub const WM_STATUS_STATE_IDLE: u64 = 0;

// ---------------------------------------------------------------------------
// Core window (indirect via CORE_CTRL_INDIRECT)
// ---------------------------------------------------------------------------

/// Core window selector (mask of cores addressed by subsequent accesses).
pub const CORE_CTRL_INDIRECT: u64 = 0x0300;
/// `CORE_CTRL_INDIRECT` mask field.
pub const CORE_CTRL_INDIRECT_MASK: u64 = 0xff;

/// Core events routed to the host (calibration, reset handshakes).
pub const CORE_EVENT_HOST_STATUS: u64 = 0x0308;
/// Core host-event clear.
pub const CORE_EVENT_HOST_CLEAR: u64 = 0x0310;
/// Core host-event enable.
pub const CORE_EVENT_HOST_ENABLE: u64 = 0x0318;
/// Core events routed to the owning WM (normal operation).
pub const CORE_EVENT_WM_STATUS: u64 = 0x0320;
/// Core WM-event clear.
pub const CORE_EVENT_WM_CLEAR: u64 = 0x0328;
/// Core WM-event enable.
pub const CORE_EVENT_WM_ENABLE: u64 = 0x0330;
/// Core WM-event RAM-correction threshold.
pub const CORE_EVENT_WM_THRESHOLD: u64 = 0x0338;
/// Core host-event RAM-correction threshold.
pub const CORE_EVENT_HOST_THRESHOLD: u64 = 0x0340;

/// Core event: CNN pass complete.
pub const CORE_EVENT_CNN_COMPLETE_EN: u64 = 1 << 0;
/// Core event: CNN execution error.
pub const CORE_EVENT_CNN_ERROR_EN: u64 = 1 << 1;
/// Core event: multi-core sync error.
pub const CORE_EVENT_CORE_SYNC_ERROR_EN: u64 = 1 << 2;
/// Core event: high-level watchdog expired.
pub const CORE_EVENT_CORE_WDT_EN: u64 = 1 << 3;
/// Core event: memory watchdog expired.
pub const CORE_EVENT_CORE_MEM_WDT_EN: u64 = 1 << 4;
/// Core event: logic fault.
pub const CORE_EVENT_LOGIC_ERROR_EN: u64 = 1 << 5;
/// Core event: corrected RAM bit-flip.
pub const CORE_EVENT_RAM_CORRECTION_EN: u64 = 1 << 6;
/// Core event: uncorrectable RAM fault.
pub const CORE_EVENT_RAM_DETECTION_EN: u64 = 1 << 7;
/// Core event: memory bus reset done.
pub const CORE_EVENT_MEMBUS_RESET_DONE_EN: u64 = 1 << 16;
/// Core event: RAM initialisation done.
pub const CORE_EVENT_RAM_INIT_DONE_EN: u64 = 1 << 17;
/// Core event: LOCM scrub done.
pub const CORE_EVENT_LOCM_SCRUB_DONE_EN: u64 = 1 << 18;

/// Core error events (reset-class table input).
pub const CORE_ERR_EVENTS: u64 = CORE_EVENT_CNN_ERROR_EN
    | CORE_EVENT_CORE_SYNC_ERROR_EN
    | CORE_EVENT_CORE_WDT_EN
    | CORE_EVENT_CORE_MEM_WDT_EN
    | CORE_EVENT_LOGIC_ERROR_EN
    | CORE_EVENT_RAM_CORRECTION_EN
    | CORE_EVENT_RAM_DETECTION_EN;
/// Core events enabled during normal operation.
pub const CORE_EVENTS_DEFAULT: u64 = CORE_EVENT_CNN_COMPLETE_EN | CORE_ERR_EVENTS;

/// Core-level clock control.
pub const CLK_CTRL0: u64 = 0x0348;
/// `CLK_CTRL0` CNN core-logic clock field.
pub const CLK_CNN_CORE_SHIFT: u32 = 0;
/// `CLK_CTRL0` CNN command-decoder clock field.
pub const CLK_CNN_CMD_SHIFT: u32 = 2;
/// `CLK_CTRL0` memory-bus clock field.
pub const CLK_MEMBUS_SHIFT: u32 = 4;
/// `CLK_CTRL0` LOCM clock field.
pub const CLK_LOCM_SHIFT: u32 = 6;
/// `CLK_CNN_CMD` field mask within `CLK_CTRL0`.
pub const CLK_CNN_CMD_MASK: u64 = 0x3 << 2;

/// Core clock control word with every unit in `mode`.
pub const fn main_clocks_default(mode: u64) -> u64 {
    (mode << CLK_CNN_CORE_SHIFT)
        | (mode << CLK_CNN_CMD_SHIFT)
        | (mode << CLK_MEMBUS_SHIFT)
        | (mode << CLK_LOCM_SHIFT)
}

/// Core-level clock status.
pub const CLK_STATUS0: u64 = 0x0350;
/// `CLK_STATUS0` full mask (all-zero when clocks are gated).
pub const CLK_STATUS0_MASKFULL: u64 = 0xff;

/// Core soft-reset strobe.
pub const CORE_SOFT_RESET: u64 = 0x0358;
/// `CORE_SOFT_RESET` reset bit.
pub const CORE_SOFT_RESET_CORE_RESET_EN: u64 = 1 << 0;

/// Functional-safety control (ECC init kick).
pub const FUSA_CONTROL: u64 = 0x0360;
/// `FUSA_CONTROL` ECC initialisation kick.
pub const FUSA_CONTROL_ECC_INIT_KICK_EN: u64 = 1 << 0;

/// LOCM scrub control.
pub const LOCM_SCRUB_CTRL: u64 = 0x0368;

/// Core high-level watchdog compare-match.
pub const CNN_WDT_COMPAREMATCH: u64 = 0x0370;
/// Core high-level watchdog control.
pub const CNN_WDT_CTRL: u64 = 0x0378;
/// Core memory watchdog compare-match.
pub const CNN_MEM_WDT_COMPAREMATCH: u64 = 0x0380;
/// `CNN_MEM_WDT_COMPAREMATCH` full mask.
pub const CNN_MEM_WDT_COMPAREMATCH_MASKFULL: u64 = 0xffff_ffff;
/// Core memory watchdog control.
pub const CNN_MEM_WDT_CTRL: u64 = 0x0388;
/// Core-sync watchdog control.
pub const CNN_CORE_SYNC_WDT_CTRL: u64 = 0x0390;
/// `CNN_CORE_SYNC_WDT_CTRL` enable bit.
pub const CNN_CORE_SYNC_WDT_CTRL_ENABLE_EN: u64 = 1 << 0;
/// `CNN_CORE_SYNC_WDT_CTRL` value field.
pub const CNN_CORE_SYNC_WDT_CTRL_VALUE_SHIFT: u32 = 8;
/// `CNN_CORE_SYNC_WDT_CTRL` value mask.
pub const CNN_CORE_SYNC_WDT_CTRL_VALUE_MASK: u64 = 0xffff_ff00;

/// Per-core command stream control.
pub const OS0_CNN_CONTROL: u64 = 0x0398;
/// `CNN_CONTROL` command-stream-size-minus-one field (32-byte units).
pub const OS0_CNN_CONTROL_CMD_SIZE_MIN1_SHIFT: u32 = 0;
/// `CNN_CONTROL` command-stream-size mask.
pub const OS0_CNN_CONTROL_CMD_SIZE_MIN1_MASK: u64 = 0xfff;
/// `CNN_CONTROL` model-requestor MMU context field.
pub const OS0_CNN_CONTROL_CTXT_PASID_SHIFT: u32 = 16;
/// `CNN_CONTROL` model-requestor MMU context mask.
pub const OS0_CNN_CONTROL_CTXT_PASID_MASK: u64 = 0xff_0000;
/// `CNN_CONTROL` IO-requestor MMU context field.
pub const OS0_CNN_CONTROL_CTXT_PASID_IO_SHIFT: u32 = 24;
/// `CNN_CONTROL` IO-requestor MMU context mask.
pub const OS0_CNN_CONTROL_CTXT_PASID_IO_MASK: u64 = 0xff00_0000;

/// Per-core command stream base address.
pub const OS0_CNN_CMD_BASE_ADDRESS: u64 = 0x03a0;

/// Indexed alternative-address registers (16 slots).
pub const fn os0_cnn_alt_address(idx: usize) -> u64 {
    0x03a8 + idx as u64 * 8
}

/// Alt-address usage mask plus per-slot buffer-type bits for the prefetcher.
pub const OS0_CNN_ALT_ADDRESS_USED: u64 = 0x0428;
/// Buffer-type field of `ALT_ADDRESS_USED` (one bit per slot, above the
/// usage mask).
pub const OS0_CNN_ALT_ADDRESS_USED_BUF_TYPE_SHIFT: u32 = 16;

/// LOCM base device-virtual address.
pub const OS0_LOCM_BASE_ADDR: u64 = 0x0430;
/// Virtual-core to physical-core mapping table (4 bits per virtual core).
pub const OS0_CNN_VCORE_MAPPING: u64 = 0x0438;
/// Stride between consecutive vcore fields.
pub const OS0_CNN_VCORE_MAPPING_STRIDE: u32 = 4;

/// Prefetch/preload control.
pub const OS0_CNN_PRELOAD_CONTROL: u64 = 0x0440;
/// Preload field: command buffer requests.
pub const OS0_CNN_PRELOAD_CBUF_N_REQS_SHIFT: u32 = 0;
/// Preload field: MMM read requests.
pub const OS0_CNN_PRELOAD_MMM_RD_N_REQS_SHIFT: u32 = 4;
/// Preload field: MMM write requests.
pub const OS0_CNN_PRELOAD_MMM_WR_N_REQS_SHIFT: u32 = 8;
/// Preload request count: 64 entries.
pub const CNN_PRELOAD_CTRL_N_64: u64 = 2;
/// Preload request count: 256 entries.
pub const CNN_PRELOAD_CTRL_N_256: u64 = 4;

/// Per-core CRC control.
pub const OS0_CNN_CRC_CONTROL: u64 = 0x0448;
/// Per-core CRC mask control.
pub const OS0_CNN_CRC_MASK_CTRL: u64 = 0x0450;
/// Per-core CRC buffer address.
pub const OS0_CNN_CRC_ADDRESS: u64 = 0x0458;
/// Per-core combined-CRC buffer address.
pub const OS0_COMBINED_CNN_CRC_ADDRESS: u64 = 0x0460;
/// Per-core debug buffer address.
pub const OS0_CNN_DEBUG_ADDRESS: u64 = 0x0468;
/// Per-core debug buffer size.
pub const OS0_CNN_DEBUG_SIZE: u64 = 0x0470;

/// SOCM buffer ownership (4-bit WM id per buffer, `0x7` = unallocated).
pub const SOCM_BUF_ASSIGNMENT: u64 = 0x0478;
/// SOCM base device-virtual address for the selected cores.
pub const SOCM_BASE_ADDR: u64 = 0x0480;
/// SOCM circular-buffer window size.
pub const SOCM_CIRCULAR_BUFFER_SIZE: u64 = 0x0488;
/// SOCM bank-7 XOR hash bits.
pub const SOCM_B7_XOR_BITS: u64 = 0x0490;
/// SOCM bank-8 XOR hash bits.
pub const SOCM_B8_XOR_BITS: u64 = 0x0498;
/// Per-WM low-level sync buffer base.
pub const LOW_LEVEL_SYNC_BASE_ADDR: u64 = 0x04a0;

/// Core-to-WM assignment (4-bit WM id per core, `0x7` = unallocated).
pub const CORE_ASSIGNMENT: u64 = 0x04a8;
/// Stride between per-core fields in the assignment registers.
pub const ASSIGNMENT_STRIDE: u32 = 4;
/// Field mask of a single assignment entry.
pub const ASSIGNMENT_FIELD_MASK: u64 = 0xf;
/// Unallocated marker in the assignment registers.
pub const ASSIGNMENT_UNALLOCATED: u64 = 0x7;
/// Assignment register image with every entry unallocated.
pub const ASSIGNMENT_ALL_UNALLOCATED: u64 = 0x7777_7777;

// ---------------------------------------------------------------------------
// Interconnect window (indirect via IC_CORE_INDIRECT)
// ---------------------------------------------------------------------------

/// Interconnect window selector.
pub const IC_CORE_INDIRECT: u64 = 0x0500;
/// Interconnect events routed to the host.
pub const INTERCONNECT_EVENT_HOST_STATUS: u64 = 0x0508;
/// Interconnect host-event clear.
pub const INTERCONNECT_EVENT_HOST_CLEAR: u64 = 0x0510;
/// Interconnect host-event enable.
pub const INTERCONNECT_EVENT_HOST_ENABLE: u64 = 0x0518;
/// Interconnect events routed to the owning WM.
pub const INTERCONNECT_EVENT_WM_STATUS: u64 = 0x0520;
/// Interconnect WM-event clear.
pub const INTERCONNECT_EVENT_WM_CLEAR: u64 = 0x0528;
/// Interconnect WM-event enable.
pub const INTERCONNECT_EVENT_WM_ENABLE: u64 = 0x0530;

/// Interconnect event: lockstep mismatch.
pub const IC_EVENT_LOCKSTEP_ERROR_EN: u64 = 1 << 0;
/// Interconnect event: logic fault.
pub const IC_EVENT_LOGIC_ERROR_EN: u64 = 1 << 1;
/// Interconnect event: SOCIF read mismatch.
pub const IC_EVENT_SOCIF_READ_MISMATCH_EN: u64 = 1 << 2;
/// Interconnect event: SOCIF read unresponsive.
pub const IC_EVENT_SOCIF_READ_UNRESPONSIVE_EN: u64 = 1 << 3;

/// Interconnect error events (reset-class table input).
pub const IC_ERR_EVENTS: u64 = IC_EVENT_LOCKSTEP_ERROR_EN
    | IC_EVENT_LOGIC_ERROR_EN
    | IC_EVENT_SOCIF_READ_MISMATCH_EN
    | IC_EVENT_SOCIF_READ_UNRESPONSIVE_EN;
/// Interconnect events enabled during normal operation.
pub const IC_EVENTS_DEFAULT: u64 = IC_ERR_EVENTS;

// ---------------------------------------------------------------------------
// Software pseudo-bits
// ---------------------------------------------------------------------------

/// Pseudo-bit: combined-CRC mismatch (software-detected).
pub const REG_COMBINED_CRC_ERROR_EN: u64 = 1 << 60;
/// Pseudo-bit: response workload-id mismatch (software-detected).
pub const REG_WL_ID_MISMATCH_ERROR_EN: u64 = 1 << 61;
/// Pseudo-bit: register parity failure (software-detected).
pub const REG_PARITY_ERROR_EN: u64 = 1 << 62;
/// Pseudo-bit: confirmation-write mismatch (software-detected).
pub const REG_CONF_ERROR_EN: u64 = 1 << 63;
/// Pseudo-bit in a WM event shadow: owned core reported an error.
pub const REG_WM_CORE_ERROR_EN: u64 = 1 << 24;
/// Pseudo-bit in a WM event shadow: owned interconnect reported an error.
pub const REG_WM_IC_ERROR_EN: u64 = 1 << 25;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_helpers_round_trip() {
        let v = set_field(0x3, HOST_EVENT_SOURCE_WM_SHIFT, HOST_EVENT_SOURCE_WM_MASK);
        assert_eq!(v, 0x0300);
        assert_eq!(
            get_field(v, HOST_EVENT_SOURCE_WM_SHIFT, HOST_EVENT_SOURCE_WM_MASK),
            0x3
        );
    }

    #[test]
    fn event_default_sets_contain_error_sets() {
        assert_eq!(SYS_EVENTS_DEFAULT & SYS_ERR_EVENTS, SYS_ERR_EVENTS);
        assert_eq!(WM_EVENTS_DEFAULT & WM_ERR_EVENTS, WM_ERR_EVENTS);
        assert_eq!(CORE_EVENTS_DEFAULT & CORE_ERR_EVENTS, CORE_ERR_EVENTS);
        assert_eq!(IC_EVENTS_DEFAULT & IC_ERR_EVENTS, IC_ERR_EVENTS);
    }

    #[test]
    fn pseudo_bits_do_not_overlap_hw_events() {
        let sw = REG_COMBINED_CRC_ERROR_EN
            | REG_WL_ID_MISMATCH_ERROR_EN
            | REG_PARITY_ERROR_EN
            | REG_CONF_ERROR_EN;
        assert_eq!(sw & SYS_EVENTS_DEFAULT, 0);
        assert_eq!(sw & WM_EVENTS_DEFAULT, 0);
        assert_eq!(sw & WM_RESPONSE_FIFO_WL_STATUS_MASKFULL, 0);
    }

    #[test]
    fn clocks_multi_spreads_two_bits_per_instance() {
        let v = clocks_multi(SYS_CLK_CORE0_SHIFT, CLK_MODE_ON, 0b0000_0101);
        assert_eq!(v, (CLK_MODE_ON << 0) | (CLK_MODE_ON << 4));
    }

    #[test]
    fn alt_address_bank_is_contiguous() {
        assert_eq!(os0_cnn_alt_address(0), 0x03a8);
        assert_eq!(os0_cnn_alt_address(15), 0x03a8 + 15 * 8);
        assert!(os0_cnn_alt_address(15) < OS0_CNN_ALT_ADDRESS_USED);
    }
}
