//! Device, core and Workload Manager statistics.
//!
//! This module tracks execution metrics for the scheduler core. It provides:
//! 1. **Kick counters:** total, queued, completed, cancelled, aborted —
//!    per device, per core and per WM.
//! 2. **Processing time:** last/total/average microseconds, plus averages
//!    estimated from hardware cycle counts when the clock is calibrated.
//! 3. **Utilization:** processing time over uptime, per core and per WM.
//! 4. **Scheduling latency:** running mean of submit-to-kick time per
//!    priority, weighted by kick count.
//!
//! All counters are monotonically non-decreasing over the device lifetime,
//! with the single exception of the cancel path's aborted-kick correction.

use crate::common::{mask_ids, MAX_CORES, MAX_PRIORITIES};

/// Kick counters shared by the per-core and per-WM blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KickStats {
    /// Workloads kicked.
    pub kicks: u32,
    /// Workloads queued behind a pending one (low-latency mode).
    pub kicks_queued: u32,
    /// Workloads completed (successfully or not).
    pub kicks_completed: u32,
    /// Workloads cancelled by user request.
    pub kicks_cancelled: u32,
    /// Workloads rolled back by resets or session teardown.
    pub kicks_aborted: u32,
}

/// Per-core statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoreStats {
    /// Kick counters.
    pub kick: KickStats,
    /// Accumulated processing time in microseconds.
    pub total_proc_us: u64,
    /// `total_proc_us / uptime_ms` at the last utilization update.
    pub utilization: u64,
}

/// Per-WM statistics, including the processing-time endpoints used to
/// compute workload spans.
#[derive(Clone, Copy, Debug, Default)]
pub struct WmStats {
    /// Kick counters.
    pub kick: KickStats,
    /// Accumulated processing time in microseconds.
    pub total_proc_us: u64,
    /// `total_proc_us / uptime_ms` at the last utilization update.
    pub utilization: u64,
    /// Timestamp of the last kick on this WM.
    pub hw_proc_start_ns: u64,
    /// Timestamp of the last completion interrupt.
    pub hw_proc_end_ns: u64,
    /// Previous completion timestamp; lower-bounds back-to-back spans.
    pub hw_proc_end_prev_ns: u64,
}

/// Memory bandwidth readout of the last completed workload
/// (`WL_BW_*` counters, harvested when the band debug mode is on).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Transaction counts: LOCM rd/wr/mwr, SOCM rd/wr/mwr, DDR rd/wr/mwr.
    pub transactions: [u64; 9],
    /// Word counts: LOCM rd/wr, SOCM rd/wr, DDR rd/wr.
    pub words: [u64; 6],
}

/// Device-level statistics.
#[derive(Clone, Debug, Default)]
pub struct DevStats {
    /// Accumulated powered-on time in milliseconds.
    pub uptime_ms: u64,
    /// Timestamp of the last power-on.
    pub hw_start_ns: u64,
    /// Workloads that completed with any failure flag.
    pub total_failures: u32,
    /// Device-wide kick counters.
    pub cnn_kicks: u32,
    /// Kicks queued behind a pending workload.
    pub cnn_kicks_queued: u32,
    /// Kicks completed.
    pub cnn_kicks_completed: u32,
    /// Kicks cancelled.
    pub cnn_kicks_cancelled: u32,
    /// Kicks aborted by rollback.
    pub cnn_kicks_aborted: u32,
    /// Span of the last completed workload in microseconds (raw, also fed
    /// by calibration).
    pub last_proc_us: u64,
    /// Span of the last completed CNN workload in microseconds.
    pub cnn_last_proc_us: u64,
    /// Accumulated CNN processing time in microseconds.
    pub cnn_total_proc_us: u64,
    /// `cnn_total_proc_us / cnn_kicks`.
    pub cnn_avg_proc_us: u64,
    /// Cycle count of the last completed workload.
    pub cnn_last_cycles: u64,
    /// Accumulated cycle count.
    pub cnn_total_cycles: u64,
    /// Last workload span estimated from cycles and the measured clock.
    pub cnn_last_est_proc_us: u64,
    /// Average workload span estimated from cycles and the measured clock.
    pub cnn_avg_est_proc_us: u64,
    /// Corrected RAM bit-flips observed (no reset performed).
    pub ram_corrections: u32,
    /// Per-core statistics.
    pub core_stats: [CoreStats; MAX_CORES],
    /// Per-WM statistics.
    pub wm_stats: [WmStats; MAX_CORES],
    /// Bandwidth readout of the last completed workload.
    pub last_mem_stats: MemStats,
    /// Running mean submit-to-kick latency per priority, in nanoseconds.
    pub sched_mean_ns: [u64; MAX_PRIORITIES],
    /// Kicks counted into [`sched_mean_ns`](Self::sched_mean_ns).
    pub sched_kicks: [u32; MAX_PRIORITIES],
}

impl DevStats {
    /// Bumps the kick counter selected by `pick` on every core in
    /// `core_mask` and on `wm_id`.
    fn update_kick<F: Fn(&mut KickStats) -> &mut u32>(
        &mut self,
        core_mask: u8,
        wm_id: u8,
        pick: F,
    ) {
        for id in mask_ids(core_mask) {
            *pick(&mut self.core_stats[id as usize].kick) += 1;
        }
        *pick(&mut self.wm_stats[wm_id as usize].kick) += 1;
    }

    /// Counts a kick on the given cores and WM.
    pub fn inc_kicks(&mut self, core_mask: u8, wm_id: u8) {
        self.cnn_kicks += 1;
        self.update_kick(core_mask, wm_id, |k| &mut k.kicks);
    }

    /// Counts a queued (low-latency) kick.
    pub fn inc_kicks_queued(&mut self, core_mask: u8, wm_id: u8) {
        self.update_kick(core_mask, wm_id, |k| &mut k.kicks_queued);
    }

    /// Counts a completion.
    pub fn inc_kicks_completed(&mut self, core_mask: u8, wm_id: u8) {
        self.update_kick(core_mask, wm_id, |k| &mut k.kicks_completed);
    }

    /// Counts a cancellation.
    pub fn inc_kicks_cancelled(&mut self, core_mask: u8, wm_id: u8) {
        self.cnn_kicks_cancelled += 1;
        self.update_kick(core_mask, wm_id, |k| &mut k.kicks_cancelled);
    }

    /// Counts a rollback.
    pub fn inc_kicks_aborted(&mut self, core_mask: u8, wm_id: u8) {
        self.cnn_kicks_aborted += 1;
        self.update_kick(core_mask, wm_id, |k| &mut k.kicks_aborted);
    }

    /// Reverts one rollback count after a cancel supersedes it.
    pub fn correct_kicks_aborted(&mut self, core_mask: u8, wm_id: u8) {
        self.cnn_kicks_aborted = self.cnn_kicks_aborted.saturating_sub(1);
        for id in mask_ids(core_mask) {
            let k = &mut self.core_stats[id as usize].kick.kicks_aborted;
            *k = k.saturating_sub(1);
        }
        let k = &mut self.wm_stats[wm_id as usize].kick.kicks_aborted;
        *k = k.saturating_sub(1);
    }

    /// Adds a workload span to the per-core and per-WM accumulators.
    pub fn add_wl_proc_us(&mut self, core_mask: u8, wm_id: u8, us: u64) {
        for id in mask_ids(core_mask) {
            self.core_stats[id as usize].total_proc_us += us;
        }
        self.wm_stats[wm_id as usize].total_proc_us += us;
    }

    /// Folds `last_proc_us` and `cnn_last_cycles` into the device-wide
    /// totals and averages.
    pub fn cnn_update(&mut self, freq_khz: Option<u32>) {
        self.cnn_last_proc_us = self.last_proc_us;
        self.cnn_total_proc_us += self.last_proc_us;

        if self.cnn_kicks > 0 {
            self.cnn_avg_proc_us = self.cnn_total_proc_us / u64::from(self.cnn_kicks);
        }

        if let Some(freq) = freq_khz.filter(|f| *f > 0) {
            if self.cnn_last_cycles > 0 {
                self.cnn_last_est_proc_us = 1000 * self.cnn_last_cycles / u64::from(freq);
            }
        }
        self.cnn_total_cycles += self.cnn_last_cycles;
        if let Some(freq) = freq_khz.filter(|f| *f > 0) {
            if self.cnn_kicks > 0 && self.cnn_total_cycles > 0 {
                self.cnn_avg_est_proc_us =
                    1000 * self.cnn_total_cycles / u64::from(self.cnn_kicks) / u64::from(freq);
            }
        }
    }

    /// Recomputes per-core and per-WM utilization against the current
    /// uptime.
    pub fn update_utilization(&mut self) {
        if self.uptime_ms == 0 {
            return;
        }
        for core in &mut self.core_stats {
            core.utilization = core.total_proc_us / self.uptime_ms;
        }
        for wm in &mut self.wm_stats {
            wm.utilization = wm.total_proc_us / self.uptime_ms;
        }
    }

    /// Rotates the completion timestamps of `wm_id` and stores a new end.
    pub fn record_proc_end(&mut self, wm_id: u8, end_ns: u64) {
        let wm = &mut self.wm_stats[wm_id as usize];
        wm.hw_proc_end_prev_ns = wm.hw_proc_end_ns;
        wm.hw_proc_end_ns = end_ns;
    }

    /// Folds one submit-to-kick span into the per-priority running mean.
    pub fn update_sched_mean(&mut self, priority: u8, span_ns: u64) {
        let pri = priority as usize;
        let n = u64::from(self.sched_kicks[pri]) + 1;
        self.sched_kicks[pri] = n as u32;
        let mean = self.sched_mean_ns[pri];
        // mean' = mean + (x - mean) / n, in integer arithmetic.
        self.sched_mean_ns[pri] = if span_ns >= mean {
            mean + (span_ns - mean) / n
        } else {
            mean - (mean - span_ns) / n
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kick_counters_fan_out_to_cores_and_wm() {
        let mut stats = DevStats::default();
        stats.inc_kicks(0b0101, 2);
        assert_eq!(stats.cnn_kicks, 1);
        assert_eq!(stats.core_stats[0].kick.kicks, 1);
        assert_eq!(stats.core_stats[2].kick.kicks, 1);
        assert_eq!(stats.core_stats[1].kick.kicks, 0);
        assert_eq!(stats.wm_stats[2].kick.kicks, 1);
    }

    #[test]
    fn averages_follow_totals() {
        let mut stats = DevStats::default();
        stats.cnn_kicks = 2;
        stats.last_proc_us = 100;
        stats.cnn_update(None);
        stats.last_proc_us = 300;
        stats.cnn_update(None);
        assert_eq!(stats.cnn_total_proc_us, 400);
        assert_eq!(stats.cnn_avg_proc_us, 200);
    }

    #[test]
    fn estimated_averages_need_calibration() {
        let mut stats = DevStats::default();
        stats.cnn_kicks = 1;
        stats.cnn_last_cycles = 500_000;
        stats.cnn_update(None);
        assert_eq!(stats.cnn_last_est_proc_us, 0);
        stats.cnn_update(Some(500_000));
        assert_eq!(stats.cnn_last_est_proc_us, 1000);
    }

    #[test]
    fn utilization_is_proc_over_uptime() {
        let mut stats = DevStats::default();
        stats.add_wl_proc_us(0b0001, 0, 50_000);
        stats.uptime_ms = 100;
        stats.update_utilization();
        assert_eq!(stats.core_stats[0].utilization, 500);
        assert_eq!(stats.wm_stats[0].utilization, 500);
    }

    #[test]
    fn sched_mean_converges_on_constant_input() {
        let mut stats = DevStats::default();
        for _ in 0..10 {
            stats.update_sched_mean(1, 4000);
        }
        assert_eq!(stats.sched_mean_ns[1], 4000);
        assert_eq!(stats.sched_kicks[1], 10);
    }

    #[test]
    fn proc_end_rotation_keeps_previous() {
        let mut stats = DevStats::default();
        stats.record_proc_end(3, 1000);
        stats.record_proc_end(3, 2500);
        assert_eq!(stats.wm_stats[3].hw_proc_end_prev_ns, 1000);
        assert_eq!(stats.wm_stats[3].hw_proc_end_ns, 2500);
    }
}
