//! Core and Workload Manager resource ledger.
//!
//! Tracks which cores and WMs are free, which assignment slots are live, and
//! which assignments carry a low-latency queued workload. It provides:
//! 1. **Allocation:** lowest-index-first WM + core selection.
//! 2. **Queueing:** reuse of a live assignment for a second workload in
//!    low-latency mode.
//! 3. **Release:** the inverse operation, with queued slots degrading to
//!    plain assignments instead of freeing resources.
//!
//! Invariants (checked by `debug_assert` and the test suite):
//! * `num_cores_free == free_core_mask.count_ones()`, same for WMs.
//! * No two non-queued assignments share a core bit.

use crate::common::{id_to_mask, mask_to_num, MAX_CORES};

/// The ledger slot a scheduled workload holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwSchedInfo {
    /// Index into the assignment table.
    pub assignment_id: u8,
    /// Workload Manager supervising the workload.
    pub wm_id: u8,
    /// Cores assigned to the WM.
    pub core_mask: u8,
    /// This workload occupies the queued (second) position of the slot.
    pub queued: bool,
    /// The slot has been returned to the ledger.
    pub freed: bool,
}

/// One assignment-table entry. A zero `core_mask` marks the slot empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Owning WM.
    pub wm_id: u8,
    /// Assigned cores.
    pub core_mask: u8,
    /// A second workload is queued on this assignment.
    pub queued: bool,
}

/// Free/busy accounting for cores and WMs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ledger {
    num_cores: u8,
    /// Bitmask of idle cores.
    pub free_core_mask: u8,
    /// Bitmask of idle WMs.
    pub free_wm_mask: u8,
    /// Redundant popcount of `free_core_mask`, kept for cheap checks.
    pub num_cores_free: u8,
    /// Redundant popcount of `free_wm_mask`.
    pub num_wms_free: u8,
    /// Assignment table; indexed by `HwSchedInfo::assignment_id`.
    pub assignments: [Assignment; MAX_CORES],
}

impl Ledger {
    /// Creates a ledger with `num_cores` cores and WMs, all free.
    pub fn new(num_cores: u8) -> Self {
        let mask = if num_cores as usize >= MAX_CORES {
            0xff
        } else {
            (1u8 << num_cores) - 1
        };
        Self {
            num_cores,
            free_core_mask: mask,
            free_wm_mask: mask,
            num_cores_free: num_cores,
            num_wms_free: num_cores,
            assignments: [Assignment::default(); MAX_CORES],
        }
    }

    /// Number of cores (and WMs) managed.
    pub fn num_cores(&self) -> u8 {
        self.num_cores
    }

    /// Whether any workload could possibly be accepted right now.
    ///
    /// In low-latency mode every live assignment can hold a second, queued
    /// workload, so capacity doubles.
    pub fn capacity_available(&self, low_latency: bool) -> bool {
        let mut used: u32 = 0;
        for a in &self.assignments {
            if a.core_mask != 0 {
                let n = u32::from(mask_to_num(a.core_mask));
                used += n;
                if low_latency && a.queued {
                    used += n;
                }
            }
        }
        let capacity = u32::from(self.num_cores) * if low_latency { 2 } else { 1 };
        used < capacity
    }

    /// Whether any core is currently allocated.
    pub fn any_busy(&self) -> bool {
        self.num_cores_free < self.num_cores
    }

    /// Allocates a free WM plus `num_cores` free cores, lowest index first.
    pub fn try_allocate(&mut self, num_cores: u8) -> Option<HwSchedInfo> {
        if num_cores == 0
            || self.num_cores_free < num_cores
            || self.num_wms_free == 0
        {
            return None;
        }
        let wm_id = self.free_wm_mask.trailing_zeros() as u8;
        let mut core_mask = 0u8;
        for _ in 0..num_cores {
            let core_id = (self.free_core_mask & !core_mask).trailing_zeros() as u8;
            core_mask |= id_to_mask(core_id);
        }
        self.commit(wm_id, core_mask)
    }

    /// Allocates an explicit WM/core set from the forced scheduling
    /// sequence. Fails when any requested resource is busy.
    pub fn try_allocate_forced(&mut self, wm_id: u8, core_mask: u8) -> Option<HwSchedInfo> {
        if core_mask == 0
            || self.free_wm_mask & id_to_mask(wm_id) == 0
            || self.free_core_mask & core_mask != core_mask
        {
            return None;
        }
        self.commit(wm_id, core_mask)
    }

    fn commit(&mut self, wm_id: u8, core_mask: u8) -> Option<HwSchedInfo> {
        let slot = self.assignments.iter().position(|a| a.core_mask == 0)?;
        self.assignments[slot] = Assignment {
            wm_id,
            core_mask,
            queued: false,
        };
        self.free_core_mask &= !core_mask;
        self.free_wm_mask &= !id_to_mask(wm_id);
        self.num_cores_free -= mask_to_num(core_mask);
        self.num_wms_free -= 1;
        self.debug_check();
        Some(HwSchedInfo {
            assignment_id: slot as u8,
            wm_id,
            core_mask,
            queued: false,
            freed: false,
        })
    }

    /// Queues a second workload on a live assignment with exactly
    /// `num_cores` cores (low-latency mode only).
    ///
    /// `excluded` vetoes candidate WMs; the dispatcher uses it to keep a
    /// workload off a WM whose pending command belongs to a different
    /// session sharing an MMU hardware context.
    pub fn try_queue(
        &mut self,
        num_cores: u8,
        mut excluded: impl FnMut(u8) -> bool,
    ) -> Option<HwSchedInfo> {
        for (slot, a) in self.assignments.iter_mut().enumerate() {
            if !a.queued && a.core_mask != 0 && mask_to_num(a.core_mask) == num_cores {
                if excluded(a.wm_id) {
                    continue;
                }
                a.queued = true;
                return Some(HwSchedInfo {
                    assignment_id: slot as u8,
                    wm_id: a.wm_id,
                    core_mask: a.core_mask,
                    queued: true,
                    freed: false,
                });
            }
        }
        None
    }

    /// Returns a slot to the ledger.
    ///
    /// When the slot currently carries a queued workload only the queued
    /// flag is cleared: the queued workload inherits the assignment and the
    /// cores stay busy. Returns `true` in that case.
    pub fn release(&mut self, info: &mut HwSchedInfo) -> bool {
        let slot = info.assignment_id as usize;
        info.freed = true;
        if self.assignments[slot].queued {
            self.assignments[slot].queued = false;
            return true;
        }
        let a = self.assignments[slot];
        debug_assert!(a.core_mask != 0, "releasing an empty assignment");
        self.free_core_mask |= a.core_mask;
        self.free_wm_mask |= id_to_mask(a.wm_id);
        self.num_cores_free += mask_to_num(a.core_mask);
        self.num_wms_free += 1;
        self.assignments[slot] = Assignment::default();
        self.debug_check();
        false
    }

    /// Whether the assignment behind `info` currently carries a queued
    /// workload.
    pub fn is_queued(&self, info: &HwSchedInfo) -> bool {
        self.assignments[info.assignment_id as usize].queued
    }

    /// Iterates over the WMs of all live assignments.
    pub fn live_wms(&self) -> impl Iterator<Item = u8> + '_ {
        self.assignments
            .iter()
            .filter(|a| a.core_mask != 0)
            .map(|a| a.wm_id)
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.num_cores_free, self.free_core_mask.count_ones() as u8);
        debug_assert_eq!(self.num_wms_free, self.free_wm_mask.count_ones() as u8);
        #[cfg(debug_assertions)]
        {
            let mut seen = 0u8;
            for a in &self.assignments {
                if a.core_mask != 0 {
                    debug_assert_eq!(seen & a.core_mask, 0, "core double-assigned");
                    seen |= a.core_mask;
                    debug_assert_eq!(self.free_core_mask & a.core_mask, 0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_picks_lowest_indices_first() {
        let mut ledger = Ledger::new(4);
        let a = ledger.try_allocate(1).unwrap();
        assert_eq!(a.wm_id, 0);
        assert_eq!(a.core_mask, 0b0001);
        let b = ledger.try_allocate(2).unwrap();
        assert_eq!(b.wm_id, 1);
        assert_eq!(b.core_mask, 0b0110);
        assert_eq!(ledger.num_cores_free, 1);
    }

    #[test]
    fn allocate_fails_without_cores_or_wms() {
        let mut ledger = Ledger::new(2);
        assert!(ledger.try_allocate(3).is_none());
        let _a = ledger.try_allocate(1).unwrap();
        let _b = ledger.try_allocate(1).unwrap();
        assert!(ledger.try_allocate(1).is_none());
        assert!(!ledger.capacity_available(false));
        assert!(ledger.capacity_available(true));
    }

    #[test]
    fn release_restores_counts() {
        let mut ledger = Ledger::new(4);
        let mut a = ledger.try_allocate(3).unwrap();
        assert_eq!(ledger.num_cores_free, 1);
        assert!(!ledger.release(&mut a));
        assert!(a.freed);
        assert_eq!(ledger.num_cores_free, 4);
        assert_eq!(ledger.num_wms_free, 4);
    }

    #[test]
    fn queue_reuses_matching_assignment_only() {
        let mut ledger = Ledger::new(4);
        let _two = ledger.try_allocate(2).unwrap();
        assert!(ledger.try_queue(1, |_| false).is_none());
        let q = ledger.try_queue(2, |_| false).unwrap();
        assert!(q.queued);
        // A queued slot cannot be queued twice.
        assert!(ledger.try_queue(2, |_| false).is_none());
    }

    #[test]
    fn queue_respects_exclusion() {
        let mut ledger = Ledger::new(4);
        let a = ledger.try_allocate(1).unwrap();
        assert!(ledger.try_queue(1, |wm| wm == a.wm_id).is_none());
    }

    #[test]
    fn releasing_pending_slot_of_queued_assignment_keeps_cores_busy() {
        let mut ledger = Ledger::new(4);
        let mut pend = ledger.try_allocate(2).unwrap();
        let mut queued = ledger.try_queue(2, |_| false).unwrap();
        // Pending workload retires first: cores stay busy, queued inherits.
        assert!(ledger.release(&mut pend));
        assert_eq!(ledger.num_cores_free, 2);
        // Second release actually frees.
        assert!(!ledger.release(&mut queued));
        assert_eq!(ledger.num_cores_free, 4);
    }

    #[test]
    fn forced_allocation_validates_resources() {
        let mut ledger = Ledger::new(4);
        let a = ledger.try_allocate_forced(2, 0b1100).unwrap();
        assert_eq!(a.wm_id, 2);
        assert!(ledger.try_allocate_forced(2, 0b0001).is_none());
        assert!(ledger.try_allocate_forced(0, 0b0100).is_none());
    }
}
