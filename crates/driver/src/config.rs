//! Driver configuration.
//!
//! This module defines every init-time tunable of the core. It provides:
//! 1. **Defaults:** baseline constants (watchdog budgets, memory layout).
//! 2. **Enums:** low-latency mode, MMU mode, MMU page size.
//! 3. **`Config`:** the process-wide tunable block, loadable from JSON.
//!
//! Configuration is read once at device construction and never changes at
//! runtime.

use serde::Deserialize;

use crate::common::{MAX_PRIORITIES, SCHED_SEQ_LEN_MAX};

/// Default configuration constants.
pub mod defaults {
    /// WM workload watchdog budget in core cycles.
    pub const WM_WL_WDT_CYCLES: u64 = 0x8000_0000;

    /// WM workload-idle watchdog budget in core cycles.
    pub const WM_IDLE_WDT_CYCLES: u64 = 0x4000_0000;

    /// WM SOCIF watchdog budget in core cycles.
    pub const WM_SOCIF_WDT_CYCLES: u64 = 0x2000_0000;

    /// System memory watchdog budget in core cycles.
    pub const SYS_MEM_WDT_CYCLES: u64 = 0x8000_0000;

    /// Core high-level watchdog budget in core cycles.
    pub const CORE_WDT_CYCLES: u64 = 0x4000_0000;

    /// Core memory watchdog budget in core cycles.
    pub const CORE_MEM_WDT_CYCLES: u64 = 0x2000_0000;

    /// Multi-core synchronisation watchdog budget in core cycles.
    pub const CORE_SYNC_WDT_CYCLES: u64 = 0x0010_0000;

    /// Delay before an idle core is powered down, in milliseconds.
    pub const PM_DELAY_MS: u32 = 100;

    /// Watchdog count used for one-shot clock calibration.
    pub const CALIBRATION_CYCLES: u32 = 20_000_000;

    /// Seed for the priority-lottery PRNG.
    pub const SCHED_RNG_SEED: u32 = 0x5eed_0001;

    /// Device-virtual base of the on-chip memory window (LOCM start).
    pub const OCM_VA_BASE: u64 = 0x1000_0000;

    /// Device-virtual base of heap 1 (buffer allocations).
    pub const VA_HEAP1_BASE: u64 = 0x4000_0000;

    /// Size of heap 1.
    pub const VA_HEAP1_SIZE: u64 = 0x4000_0000;

    /// Device-virtual base of heap 2.
    pub const VA_HEAP2_BASE: u64 = 0x8000_0000;

    /// Size of heap 2.
    pub const VA_HEAP2_SIZE: u64 = 0x4000_0000;

    /// Guard gap inserted between on-chip memory regions.
    pub const VA_GUARD_GAP: u64 = 0x1000;

    /// Size reserved for one WM's low-level sync buffer.
    pub const LLSYNC_SIZE: u64 = 0x1000;

    /// Software watchdog floor timeout in microseconds.
    pub const SWD_TIMEOUT_DEFAULT_US: u32 = 30_000;
}

/// Low-latency queueing mode.
///
/// Controls whether a second workload may be pre-configured on a busy WM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowLatency {
    /// One workload per WM; no queueing.
    #[default]
    Disabled,
    /// Software issues the follow-up kick when the pending workload retires.
    SwKick,
    /// Hardware promotes the queued workload on its own.
    SelfKick,
}

/// MMU operating mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MmuMode {
    /// Address translation bypassed.
    Disabled,
    /// 1:1 physical mapping; only valid for physically contiguous buffers.
    Direct,
    /// Full 40-bit translation.
    #[default]
    Mmu40bit,
}

/// MMU page size selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MmuPageSize {
    /// 4 KiB pages.
    #[default]
    Size4k,
    /// 16 KiB pages.
    Size16k,
    /// 64 KiB pages.
    Size64k,
    /// 256 KiB pages.
    Size256k,
    /// 1 MiB pages.
    Size1m,
    /// 2 MiB pages.
    Size2m,
}

impl MmuPageSize {
    /// Page size in bytes.
    pub fn bytes(self) -> u64 {
        match self {
            Self::Size4k => 4 << 10,
            Self::Size16k => 16 << 10,
            Self::Size64k => 64 << 10,
            Self::Size256k => 256 << 10,
            Self::Size1m => 1 << 20,
            Self::Size2m => 2 << 20,
        }
    }

    /// Encoding used by the MMU range registers (log2 relative to 4 KiB).
    pub fn range_encoding(self) -> u64 {
        match self {
            Self::Size4k => 0,
            Self::Size16k => 2,
            Self::Size64k => 4,
            Self::Size256k => 6,
            Self::Size1m => 8,
            Self::Size2m => 9,
        }
    }
}

/// Fault-injection switches for validation builds.
///
/// Consulted only at the documented probe points; never in the happy path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FaultInjectionConfig {
    /// Force the next confirm-config read-back to mismatch.
    pub conf_err: bool,
    /// Register offset whose parity polls should report corruption.
    pub parity_poll_err_reg: Option<u64>,
}

/// Process-wide driver tunables, loaded once at start.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Low-latency queueing mode.
    pub low_latency: LowLatency,
    /// MMU operating mode.
    pub mmu_mode: MmuMode,
    /// MMU page size.
    pub mmu_page_size: MmuPageSize,
    /// Model and IO requestors share one MMU hardware context.
    pub mmu_ctx_mirrored: bool,
    /// Delay before an idle core is powered down, in milliseconds. Zero
    /// means soft-stop immediately instead of arming the APM timer.
    pub pm_delay_ms: u32,
    /// Never gate clocks or power down cores.
    pub no_clock_disable: bool,
    /// Number of initial submissions to complete without touching hardware.
    pub hw_bypass: u32,
    /// Enable combined-CRC generation and checking.
    pub cnn_combined_crc_enable: bool,
    /// Disable register parity checking even when hardware supports it.
    pub parity_disable: bool,
    /// Read back every configuration register after a kick (functional
    /// safety).
    pub confirm_config_reg: bool,
    /// Forced `(wm_id << 8) | core_mask` pick order for debug. Empty means
    /// normal scheduling.
    pub scheduling_sequence: Vec<u16>,
    /// Priority window sizes, lowest priority first. All-zero selects
    /// strict priority scheduling.
    pub pri_windows: [u32; MAX_PRIORITIES],
    /// Perform the one-shot clock calibration at start.
    pub do_calibration: bool,
    /// Watchdog count used by the calibration kick.
    pub calibration_cycles: u32,
    /// Seed for the priority-lottery PRNG.
    pub sched_rng_seed: u32,
    /// Use the submission's estimated cycles (plus margin) for the WM
    /// workload watchdog instead of the static budget.
    pub use_estimated_cycles_for_wm_wdt: bool,
    /// Margin added to estimated cycles when
    /// [`use_estimated_cycles_for_wm_wdt`](Self::use_estimated_cycles_for_wm_wdt)
    /// is set.
    pub wm_wdt_estimated_cycles_margin: u64,
    /// WM workload watchdog budget.
    pub wm_wl_wdt_cycles: u64,
    /// Core high-level watchdog budget.
    pub core_wdt_cycles: u64,
    /// Core memory watchdog budget.
    pub core_mem_wdt_cycles: u64,
    /// SOCM bank-7/bank-8 XOR hash bits; zero leaves hardware defaults.
    pub socm_xor_bits: [u64; 2],
    /// SLC address-hash mode (0 = none).
    pub slc_hash_mode: u8,
    /// RAM-correction reporting threshold, system level.
    pub sys_ram_correction_threshold: u32,
    /// RAM-correction reporting threshold, core-to-WM events.
    pub core_wm_ram_correction_threshold: u32,
    /// RAM-correction reporting threshold, core-to-host events.
    pub core_host_ram_correction_threshold: u32,
    /// Harvest `WL_PERF` cycle counts from the response FIFO.
    pub wm_dbg_perf: bool,
    /// Harvest `WL_BW_*` bandwidth counters from the response FIFO.
    pub wm_dbg_band: bool,
    /// Host-bus stall ratio bring-up knob (0 = off).
    pub sysbus_host_stall_ratio: u64,
    /// Memory-bus stall ratio bring-up knob (0 = off).
    pub membus_sys_stall_ratio: u64,
    /// Software watchdog check period; zero disables the software
    /// watchdog. The periodic timer itself lives in the platform layer,
    /// which calls the device's watchdog poll.
    pub swd_period_ms: u32,
    /// Software watchdog floor timeout in microseconds.
    pub swd_timeout_default_us: u32,
    /// Percentage of the estimated execution time added to the budget.
    pub swd_timeout_m0_percent: u32,
    /// Constant microseconds added on top of the scaled estimate.
    pub swd_timeout_m1_us: u32,
    /// Test-only suspend cycling interval; accepted and ignored by the
    /// core (the cycling driver is platform glue).
    pub suspend_interval_ms: u32,
    /// Fault-injection switches.
    pub fault_inject: FaultInjectionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            low_latency: LowLatency::Disabled,
            mmu_mode: MmuMode::Mmu40bit,
            mmu_page_size: MmuPageSize::Size4k,
            mmu_ctx_mirrored: true,
            pm_delay_ms: defaults::PM_DELAY_MS,
            no_clock_disable: false,
            hw_bypass: 0,
            cnn_combined_crc_enable: false,
            parity_disable: false,
            confirm_config_reg: false,
            scheduling_sequence: Vec::new(),
            pri_windows: [0; MAX_PRIORITIES],
            do_calibration: false,
            calibration_cycles: defaults::CALIBRATION_CYCLES,
            sched_rng_seed: defaults::SCHED_RNG_SEED,
            use_estimated_cycles_for_wm_wdt: false,
            wm_wdt_estimated_cycles_margin: 0,
            wm_wl_wdt_cycles: defaults::WM_WL_WDT_CYCLES,
            core_wdt_cycles: defaults::CORE_WDT_CYCLES,
            core_mem_wdt_cycles: defaults::CORE_MEM_WDT_CYCLES,
            socm_xor_bits: [0, 0],
            slc_hash_mode: 0,
            sys_ram_correction_threshold: 0,
            core_wm_ram_correction_threshold: 0,
            core_host_ram_correction_threshold: 0,
            wm_dbg_perf: false,
            wm_dbg_band: false,
            sysbus_host_stall_ratio: 0,
            membus_sys_stall_ratio: 0,
            swd_period_ms: 0,
            swd_timeout_default_us: defaults::SWD_TIMEOUT_DEFAULT_US,
            swd_timeout_m0_percent: 100,
            swd_timeout_m1_us: 0,
            suspend_interval_ms: 0,
            fault_inject: FaultInjectionConfig::default(),
        }
    }
}

impl Config {
    /// Parses a configuration from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut cfg: Self = serde_json::from_str(json)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Clamps out-of-range values instead of failing the load.
    pub fn sanitize(&mut self) {
        self.scheduling_sequence.truncate(SCHED_SEQ_LEN_MAX);
    }

    /// Software watchdog budget for one workload, in microseconds.
    ///
    /// With a calibrated clock and a cycle estimate the budget is the
    /// scaled estimate (`m0` percent plus `m1`), floored at the default.
    pub fn swd_timeout_us(&self, estimated_cycles: u32, freq_khz: Option<u32>) -> u64 {
        let mut timeout = u64::from(self.swd_timeout_default_us);
        if let Some(freq) = freq_khz.filter(|f| *f > 0) {
            if estimated_cycles > 0 {
                let est_us = 1000 * u64::from(estimated_cycles) / u64::from(freq);
                let scaled = est_us * u64::from(self.swd_timeout_m0_percent) / 100
                    + u64::from(self.swd_timeout_m1_us);
                timeout = timeout.max(scaled);
            }
        }
        timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_strict_priority_no_latency() {
        let cfg = Config::default();
        assert_eq!(cfg.low_latency, LowLatency::Disabled);
        assert_eq!(cfg.pri_windows, [0; MAX_PRIORITIES]);
        assert!(!cfg.do_calibration);
    }

    #[test]
    fn json_overrides_selected_fields() {
        let cfg = Config::from_json(
            r#"{
                "low_latency": "sw_kick",
                "mmu_mode": "disabled",
                "pri_windows": [30, 90, 150],
                "hw_bypass": 1
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.low_latency, LowLatency::SwKick);
        assert_eq!(cfg.mmu_mode, MmuMode::Disabled);
        assert_eq!(cfg.pri_windows, [30, 90, 150]);
        assert_eq!(cfg.hw_bypass, 1);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.calibration_cycles, defaults::CALIBRATION_CYCLES);
    }

    #[test]
    fn scheduling_sequence_is_capped() {
        let mut cfg = Config::default();
        cfg.scheduling_sequence = (0..64).map(|i| i as u16).collect();
        cfg.sanitize();
        assert_eq!(cfg.scheduling_sequence.len(), SCHED_SEQ_LEN_MAX);
    }

    #[test]
    fn page_size_encodings() {
        assert_eq!(MmuPageSize::Size4k.bytes(), 4096);
        assert_eq!(MmuPageSize::Size2m.bytes(), 2 * 1024 * 1024);
        assert!(MmuPageSize::Size4k.range_encoding() < MmuPageSize::Size2m.range_encoding());
    }
}
