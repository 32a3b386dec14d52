//! MMU adapter: hardware-context management and TLB maintenance.
//!
//! The page-table library (page allocation, PTE writes, CPU cache flushes)
//! is an external collaborator reached through
//! [`MmuContext`](crate::session::MmuContext); this module owns what the
//! driver itself must do:
//! 1. **Context slots:** refcounted assignment of the 32 hardware
//!    page-catalogue bases to session software contexts.
//! 2. **Setup:** programming catalogue bases on a context switch, flushing
//!    the TLB when a hardware slot is shared between sessions.
//! 3. **Invalidate:** the pending-poll + invalidate-write sequence.
//! 4. **Fault decode:** human-readable dump of the per-core fault registers.

use tracing::{debug, error, warn};

use crate::common::{mask_ids, CoreError, MMU_HW_CTX_COUNT};
use crate::config::{Config, MmuMode};
use crate::io::{Platform, RegIo};
use crate::regs;
use crate::session::Session;

/// Flush poll retry budget (total wait ≈ 30 × 150 cycles).
const FLUSH_POLL_COUNT: u32 = 30;
/// Flush poll inter-read delay in device cycles.
const FLUSH_POLL_DELAY: u32 = 150;

/// Device-wide MMU bookkeeping.
#[derive(Clone, Debug)]
pub struct MmuState {
    refcounts: [u16; MMU_HW_CTX_COUNT],
    /// Software context id currently programmed (model requestor).
    pub active_ctx: Option<u32>,
}

impl Default for MmuState {
    fn default() -> Self {
        Self {
            refcounts: [0; MMU_HW_CTX_COUNT],
            active_ctx: None,
        }
    }
}

impl MmuState {
    /// Reserves a hardware context slot.
    ///
    /// Prefers an unused slot; when every slot is taken the least-shared one
    /// is reused (its TLB entries are flushed eagerly on the next setup,
    /// because the refcount is then above one).
    pub fn acquire_ctx(&mut self) -> Result<u8, CoreError> {
        let slot = match self.refcounts.iter().position(|&rc| rc == 0) {
            Some(free) => free,
            None => self
                .refcounts
                .iter()
                .enumerate()
                .min_by_key(|(_, &rc)| rc)
                .map(|(i, _)| i)
                .ok_or(CoreError::MmuCtxExhausted)?,
        };
        self.refcounts[slot] = self.refcounts[slot]
            .checked_add(1)
            .ok_or(CoreError::MmuCtxExhausted)?;
        Ok(slot as u8)
    }

    /// Releases a hardware context slot.
    pub fn release_ctx(&mut self, hw_id: u8) {
        let rc = &mut self.refcounts[hw_id as usize];
        *rc = rc.saturating_sub(1);
    }

    /// Number of software contexts bound to `hw_id`.
    pub fn refcount(&self, hw_id: u8) -> u16 {
        self.refcounts[hw_id as usize]
    }
}

/// Invalidates the TLB entries of one hardware context (`None` = all).
///
/// A no-op while the device is off. Waits for any in-flight invalidation
/// first; on parity-capable hardware the pending bit carries a parity
/// companion.
pub fn flush_ctx<P: Platform>(
    io: &mut RegIo<P>,
    device_on: bool,
    ctx: Option<u8>,
) -> Result<(), CoreError> {
    if !device_on {
        return Ok(());
    }

    let mut pend = regs::OS0_MMU_CTRL_INVAL_STATUS_PENDING_EN;
    if io.parity {
        // If the pending bit is set the parity bit must be set as well.
        pend |= regs::OS0_MMU_CTRL_INVAL_STATUS_PARITY_EN;
    }
    io.poll64_parity(
        regs::OS0_MMU_CTRL_INVAL_STATUS,
        0,
        pend,
        FLUSH_POLL_COUNT,
        FLUSH_POLL_DELAY,
    )
    .map_err(|err| {
        error!(?ctx, %err, "error during MMU context flush");
        err
    })?;

    let mut inval = regs::OS0_MMU_CTRL_INVAL_PC_EN
        | regs::OS0_MMU_CTRL_INVAL_PD_EN
        | regs::OS0_MMU_CTRL_INVAL_PT_EN;
    match ctx {
        Some(id) => {
            inval |= regs::set_field(
                u64::from(id),
                regs::OS0_MMU_CTRL_INVAL_CONTEXT_SHIFT,
                regs::OS0_MMU_CTRL_INVAL_CONTEXT_MASK,
            );
        }
        None => inval |= regs::OS0_MMU_CTRL_INVAL_ALL_CONTEXTS_EN,
    }
    debug!(?ctx, inval, "MMU invalidate TLB caches");
    io.comment("-- MMU invalidate TLB caches");
    io.write64_pdump(regs::OS0_MMU_CTRL_INVAL, inval);
    Ok(())
}

/// Switches the MMU to `session`'s contexts before a kick.
///
/// In bypass mode only the bypass bit is written. Otherwise, when the
/// session is not already active, both catalogue bases are programmed and
/// any hardware slot shared with another session is flushed.
pub fn setup<P: Platform>(
    io: &mut RegIo<P>,
    state: &mut MmuState,
    config: &Config,
    device_on: bool,
    session: &Session,
) -> Result<(), CoreError> {
    if config.mmu_mode == MmuMode::Disabled {
        io.comment("-- MMU bypass ON");
        io.write64_pdump(regs::OS0_MMU_CTRL, regs::OS0_MMU_CTRL_BYPASS_EN);
        return Ok(());
    }

    // The model context tracks the active address space.
    let model = &session.mmu_ctxs[crate::session::MMU_REQ_MODEL];
    if state.active_ctx == Some(model.id) {
        return Ok(());
    }

    io.comment("-- MMU_SETUP_BEGIN");
    io.comment("-- MMU bypass OFF");
    io.write64_pdump(regs::OS0_MMU_CTRL, 0);

    for ctx in &session.mmu_ctxs {
        io.comment(format!("-- Setup MMU context:{}", ctx.hw_id));
        io.write64_pdump(regs::OS0_MMU_CBASE_MAPPING_CONTEXT, u64::from(ctx.hw_id));
        io.write64(
            regs::OS0_MMU_CBASE_MAPPING,
            ctx.pc_baddr >> regs::OS0_MMU_CBASE_MAPPING_ALIGNSHIFT,
        );

        // Sessions beyond the hardware slot count share contexts; flush the
        // previous owner's entries.
        if state.refcount(ctx.hw_id) > 1 {
            debug!(hw_id = ctx.hw_id, "flushing shared MMU context");
            flush_ctx(io, device_on, Some(ctx.hw_id)).map_err(|err| {
                io.comment("-- MMU_SETUP_END");
                err
            })?;
        }
    }

    state.active_ctx = Some(model.id);
    debug!(active = model.id, "MMU context switched");
    io.comment("-- MMU_SETUP_END");
    Ok(())
}

/// Decodes and logs the fault registers of every core in `core_mask`.
///
/// Called from the interrupt bottom half before the MMU reset path.
pub fn fault_dump<P: Platform>(io: &mut RegIo<P>, core_mask: u8) {
    const LEVELS: [&str; 4] = ["PT", "PD", "PC", "BASE"];

    for id in mask_ids(core_mask) {
        let status1 = io.read64(regs::core_mmu_fault_status1(id));
        let status2 = io.read64(regs::core_mmu_fault_status2(id));

        if status1 & regs::MMU_FAULT_STATUS1_FAULT_EN == 0 {
            // False alarm.
            return;
        }

        let addr = regs::get_field(
            status1,
            regs::MMU_FAULT_STATUS1_ADDRESS_SHIFT,
            regs::MMU_FAULT_STATUS1_ADDRESS_MASK,
        ) << 4;
        let level = regs::get_field(
            status1,
            regs::MMU_FAULT_STATUS1_LEVEL_SHIFT,
            regs::MMU_FAULT_STATUS1_LEVEL_MASK,
        ) as usize;
        let req_id = regs::get_field(
            status1,
            regs::MMU_FAULT_STATUS1_REQ_ID_SHIFT,
            regs::MMU_FAULT_STATUS1_REQ_ID_MASK,
        );
        let ctx = regs::get_field(
            status1,
            regs::MMU_FAULT_STATUS1_CONTEXT_SHIFT,
            regs::MMU_FAULT_STATUS1_CONTEXT_MASK,
        );
        let rnw = status1 & regs::MMU_FAULT_STATUS1_RNW_EN != 0;
        let fault_type = regs::get_field(
            status1,
            regs::MMU_FAULT_STATUS1_TYPE_SHIFT,
            regs::MMU_FAULT_STATUS1_TYPE_MASK,
        );
        let tlb_entry = regs::get_field(
            status2,
            regs::MMU_FAULT_STATUS2_TLB_ENTRY_SHIFT,
            regs::MMU_FAULT_STATUS2_TLB_ENTRY_MASK,
        );
        let bank = regs::get_field(
            status2,
            regs::MMU_FAULT_STATUS2_BANK_SHIFT,
            regs::MMU_FAULT_STATUS2_BANK_MASK,
        );

        // Current catalogue base of the faulted context.
        io.write64(regs::OS0_MMU_CBASE_MAPPING_CONTEXT, ctx);
        let mapping = io.read64(regs::OS0_MMU_CBASE_MAPPING);

        debug!(core = id, status1, status2, "core MMU fault raw status");
        warn!(
            core = id,
            addr,
            direction = if rnw { "reading" } else { "writing" },
            level = LEVELS.get(level).copied().unwrap_or("?"),
            requestor = req_id,
            context = ctx,
            fault_type = match fault_type {
                0 => "VALID",
                2 => "READ-ONLY",
                _ => "UNKNOWN",
            },
            tlb_entry,
            slc_bank = bank,
            mapping = mapping << regs::OS0_MMU_CBASE_MAPPING_ALIGNSHIFT,
            "MMU fault"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_prefers_free_slots() {
        let mut state = MmuState::default();
        let a = state.acquire_ctx().unwrap();
        let b = state.acquire_ctx().unwrap();
        assert_ne!(a, b);
        assert_eq!(state.refcount(a), 1);
    }

    #[test]
    fn exhausted_slots_are_shared_least_loaded_first() {
        let mut state = MmuState::default();
        for _ in 0..MMU_HW_CTX_COUNT {
            state.acquire_ctx().unwrap();
        }
        let shared = state.acquire_ctx().unwrap();
        assert_eq!(state.refcount(shared), 2);
        // The next reuse must pick a different, still-single slot.
        let other = state.acquire_ctx().unwrap();
        assert_ne!(shared, other);
    }

    #[test]
    fn release_undoes_acquire() {
        let mut state = MmuState::default();
        let a = state.acquire_ctx().unwrap();
        state.release_ctx(a);
        assert_eq!(state.refcount(a), 0);
    }
}
