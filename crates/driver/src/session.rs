//! Sessions, buffers and the command/response model.
//!
//! A session represents one user of the device: a set of registered buffers,
//! two MMU software contexts (model and IO requestors), per-priority command
//! queues and a response queue. It provides:
//! 1. **`Session`:** the owning container (device owns sessions; sessions own
//!    commands and buffers — no ownership cycles).
//! 2. **`Cmd` / `SubmitMulti`:** the workload submission payload and its
//!    in-driver lifecycle state.
//! 3. **`Response`:** the completion record surfaced back to user space.
//! 4. **Capabilities:** the `MemCtx` and `MmuContext` collaborator traits.

use std::collections::VecDeque;

use crate::common::{CoreError, MAX_CORES, MAX_PRIORITIES};
use crate::sched::ledger::HwSchedInfo;

/// Session identifier.
pub type SessionId = u32;

/// Command flag: compare per-core combined CRCs against golden values.
pub const CMD_FLAG_CHECK_CRC: u32 = 1 << 0;

/// Memory-manager capability owned by each session.
///
/// The allocator itself (import/export/carveout/fences) is an external
/// collaborator; the core only needs cache maintenance, usage accounting and
/// word access to driver-owned debug buffers.
pub trait MemCtx {
    /// Flushes CPU caches for `buf_id` before device access.
    fn sync_cpu_to_device(&mut self, buf_id: u32);
    /// Invalidates CPU caches for `buf_id` after device writes.
    fn sync_device_to_cpu(&mut self, buf_id: u32);
    /// Current memory usage of the session in bytes.
    fn usage_bytes(&mut self) -> u64 {
        0
    }
    /// Reads a 32-bit word from a kernel-mapped buffer.
    fn read_u32(&mut self, _buf_id: u32, _offset: u64) -> u32 {
        0
    }
}

/// No-op memory context.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMemCtx;

impl MemCtx for NullMemCtx {
    fn sync_cpu_to_device(&mut self, _buf_id: u32) {}
    fn sync_device_to_cpu(&mut self, _buf_id: u32) {}
}

/// Page-table library capability owned by each session.
///
/// Page allocation, PTE writes and cache flushes live outside the core; the
/// driver only asks for on-chip mappings and carries opaque map ids.
pub trait MmuContext {
    /// Maps pages of `buf_id` at `vaddr`; returns a map id.
    fn map_to_onchip(
        &mut self,
        buf_id: u32,
        vaddr: u64,
        page_size: u64,
        page_indices: &[u32],
    ) -> Result<u32, CoreError>;
    /// Releases a mapping created by
    /// [`map_to_onchip`](Self::map_to_onchip).
    fn unmap(&mut self, map_id: u32) -> Result<(), CoreError>;
}

/// No-op page-table context handing out sequential map ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMmuContext {
    next_map: u32,
}

impl MmuContext for NullMmuContext {
    fn map_to_onchip(
        &mut self,
        _buf_id: u32,
        _vaddr: u64,
        _page_size: u64,
        _page_indices: &[u32],
    ) -> Result<u32, CoreError> {
        self.next_map += 1;
        Ok(self.next_map)
    }
    fn unmap(&mut self, _map_id: u32) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Which hardware requestor a buffer serves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReqType {
    /// Model data (weights, command streams).
    #[default]
    Model = 0,
    /// Input/output activations.
    Io = 1,
}

/// Fill state of a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufStatus {
    /// Never written.
    #[default]
    Unfilled,
    /// Written by software (needs flush before device reads).
    FilledBySw,
    /// Written by hardware (needs invalidate before CPU reads).
    FilledByHw,
}

/// A device buffer registered with a session.
#[derive(Clone, Debug)]
pub struct Buffer {
    /// Buffer id, unique within the session, never zero.
    pub id: u32,
    /// Size in bytes.
    pub size: u64,
    /// Device-virtual address.
    pub devvirt: u64,
    /// Requestor the buffer serves.
    pub req_type: ReqType,
    /// Fill state.
    pub status: BufStatus,
    /// The buffer lives in on-chip memory.
    pub ocm: bool,
    /// CPU caches must be flushed before device access.
    pub needs_flush: bool,
    /// CPU caches must be invalidated after device writes.
    pub needs_inval: bool,
}

/// One session's view of an MMU software context.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionMmuCtx {
    /// Software context id, unique across the device lifetime.
    pub id: u32,
    /// Hardware context slot programmed into the MMU.
    pub hw_id: u8,
    /// Physical address of the page catalogue.
    pub pc_baddr: u64,
}

/// Index of the model-requestor MMU context in
/// [`Session::mmu_ctxs`].
pub const MMU_REQ_MODEL: usize = 0;
/// Index of the IO-requestor MMU context in [`Session::mmu_ctxs`].
pub const MMU_REQ_IO: usize = 1;

/// Multi-core CNN submission payload (`CNN_SUBMIT_MULTI`).
#[derive(Clone, Debug, Default)]
pub struct SubmitMulti {
    /// User-assigned command id.
    pub cmd_id: u32,
    /// Command flags ([`CMD_FLAG_CHECK_CRC`]).
    pub flags: u32,
    /// Scheduling priority, clamped to the supported range at enqueue.
    pub priority: u8,
    /// Number of input buffers (command streams included).
    pub num_inbufs: u8,
    /// Total number of referenced buffers.
    pub num_bufs: u8,
    /// Number of cores this workload needs.
    pub num_cores: u8,
    /// Per-core command-stream buffer ids; the first zero terminates the
    /// list.
    pub cmdbuf: [u32; MAX_CORES],
    /// Remaining buffer ids (inputs then outputs), parallel to
    /// [`regidx`](Self::regidx)/[`bufoffsets`](Self::bufoffsets)/
    /// [`bufsizes`](Self::bufsizes).
    pub bufs: Vec<u32>,
    /// Alt-address register slot per buffer.
    pub regidx: Vec<u8>,
    /// Byte offset into each buffer.
    pub bufoffsets: Vec<u32>,
    /// Mapped size of each buffer.
    pub bufsizes: Vec<u32>,
    /// On-chip RAM buffer ids: `[LOCM, SOCM]`, zero when unused.
    pub onchipram_bufs: [u32; 2],
    /// Circular sub-region offset within the SOCM chunk (0 = disabled).
    pub shared_circ_buf_offs: u32,
    /// Compiler-estimated execution cycles.
    pub estimated_cycles: u32,
    /// Hardware bug workaround bitmap.
    pub hw_brns: u64,
    /// Golden per-core CRCs when [`CMD_FLAG_CHECK_CRC`] is set.
    pub crcs: Vec<u32>,
}

/// Driver-side state of a queued or in-flight workload.
#[derive(Clone, Debug)]
pub struct Cmd {
    /// The user submission.
    pub user: SubmitMulti,
    /// The workload is currently programmed into hardware.
    pub in_hw: bool,
    /// The workload occupies a low-latency queued slot.
    pub queued: bool,
    /// The workload was rolled back and needs rescheduling.
    pub rolled_back: bool,
    /// Ledger slot held by this workload, if any.
    pub sched_info: Option<HwSchedInfo>,
    /// Hardware workload id programmed into `WM_WL_ID`.
    pub wm_cmd_id: u16,
    /// Timestamp of the kick.
    pub hw_proc_start_ns: u64,
    /// Timestamp of the enqueue.
    pub submit_ns: u64,
    /// Confirm-config mismatch on a top-level register.
    pub conf_top_error: bool,
    /// Confirm-config mismatch mask, one bit per core.
    pub conf_core_error: u8,
}

impl Cmd {
    /// Wraps a submission in its initial lifecycle state.
    pub fn new(user: SubmitMulti) -> Self {
        Self {
            user,
            in_hw: false,
            queued: false,
            rolled_back: false,
            sched_info: None,
            wm_cmd_id: 0,
            hw_proc_start_ns: 0,
            submit_ns: 0,
            conf_top_error: false,
            conf_core_error: 0,
        }
    }

    /// Whether this command still holds a live (non-freed) ledger slot.
    pub fn holds_hw_slot(&self) -> bool {
        self.sched_info
            .as_ref()
            .is_some_and(|info| info.core_mask != 0 && !info.freed)
    }
}

/// Completion record delivered back to the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Command id this response answers.
    pub cmd_id: u32,
    /// POSIX-style error number (0 on success).
    pub err_no: i32,
    /// Accumulated per-workload error flags
    /// ([`rsp_err`](crate::common::error::rsp_err)).
    pub rsp_err_flags: u64,
    /// Processing time of the workload in microseconds.
    pub last_proc_us: u64,
    /// Hardware cycle count of the workload.
    pub hw_cycles: u64,
    /// Session memory usage at completion.
    pub mem_usage: u64,
}

/// One user of the device.
pub struct Session {
    /// Session id, unique per device.
    pub id: SessionId,
    /// Per-priority command queues.
    pub cmds: [VecDeque<Cmd>; MAX_PRIORITIES],
    /// Completed responses awaiting user reads.
    pub rsps: VecDeque<Response>,
    /// Registered buffers.
    pub bufs: Vec<Buffer>,
    /// Model and IO MMU contexts.
    pub mmu_ctxs: [SessionMmuCtx; 2],
    /// Memory-manager capability.
    pub mem_ctx: Box<dyn MemCtx + Send>,
    /// Page-table capability.
    pub mmu: Box<dyn MmuContext + Send>,
    /// Combined-CRC capture buffer, when CRC support is enabled.
    pub combined_crc_buf: Option<u32>,
    /// On-chip map ids handed out by [`Session::mmu`].
    pub onchip_maps: Vec<u32>,
}

impl Session {
    /// Creates an empty session with null capabilities.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            cmds: Default::default(),
            rsps: VecDeque::new(),
            bufs: Vec::new(),
            mmu_ctxs: [SessionMmuCtx::default(); 2],
            mem_ctx: Box::new(NullMemCtx),
            mmu: Box::<NullMmuContext>::default(),
            combined_crc_buf: None,
            onchip_maps: Vec::new(),
        }
    }

    /// Looks up a buffer by id.
    pub fn find_buf(&self, buf_id: u32) -> Option<&Buffer> {
        self.bufs.iter().find(|b| b.id == buf_id)
    }

    /// Looks up a buffer by id, mutably.
    pub fn find_buf_mut(&mut self, buf_id: u32) -> Option<&mut Buffer> {
        self.bufs.iter_mut().find(|b| b.id == buf_id)
    }

    /// Registers a buffer. Ids must be unique and non-zero.
    pub fn add_buf(&mut self, buf: Buffer) -> Result<(), CoreError> {
        if buf.id == 0 || self.find_buf(buf.id).is_some() {
            return Err(CoreError::UnknownBuffer(buf.id));
        }
        self.bufs.push(buf);
        Ok(())
    }

    /// Finds a queued command by id, searching every priority.
    pub fn find_cmd_mut(&mut self, cmd_id: u32) -> Option<&mut Cmd> {
        self.cmds
            .iter_mut()
            .flat_map(|q| q.iter_mut())
            .find(|c| c.user.cmd_id == cmd_id)
    }

    /// Total number of queued commands across all priorities.
    pub fn queued_cmds(&self) -> usize {
        self.cmds.iter().map(VecDeque::len).sum()
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("queued_cmds", &self.queued_cmds())
            .field("rsps", &self.rsps.len())
            .field("bufs", &self.bufs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(id: u32) -> Buffer {
        Buffer {
            id,
            size: 0x1000,
            devvirt: 0x4000_0000,
            req_type: ReqType::Model,
            status: BufStatus::Unfilled,
            ocm: false,
            needs_flush: false,
            needs_inval: false,
        }
    }

    #[test]
    fn buffer_ids_are_unique_and_non_zero() {
        let mut session = Session::new(1);
        assert!(session.add_buf(buf(1)).is_ok());
        assert!(session.add_buf(buf(1)).is_err());
        assert!(session.add_buf(buf(0)).is_err());
        assert!(session.find_buf(1).is_some());
        assert!(session.find_buf(2).is_none());
    }

    #[test]
    fn fresh_cmd_holds_no_slot() {
        let cmd = Cmd::new(SubmitMulti::default());
        assert!(!cmd.holds_hw_slot());
        assert!(!cmd.in_hw);
    }
}
